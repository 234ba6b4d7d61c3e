//! Builds the wire-format adaptor for the channel SELECT just picked
//! (spec §4.5/§4.6 CONVERT_REQUEST). One match arm per [`ProviderKind`];
//! adding a provider to the matrix means adding a crate and an arm here,
//! nowhere else.

use relay_core::adapter::{HTTPLLMProvider, LLMProviderFromHTTP};
use relay_core::chat::Tool;
use relay_core::error::GatewayError;
use relay_core::model::{Channel, ProviderKind};
use std::sync::Arc;
use url::Url;

/// Azure requires an explicit `api-version` query parameter; channels don't
/// carry one today (spec §3 lists no such field), so every Azure channel
/// dispatches against this pinned version. A future channel-level override
/// would live in `model_configs` or a dedicated field.
const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Per-request dispatch parameters layered onto the channel's static
/// configuration during CONVERT_REQUEST.
pub struct DispatchParams {
    pub actual_model: String,
    pub is_stream: bool,
    pub tools: Option<Vec<Tool>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

pub fn build_provider(channel: &Channel, params: &DispatchParams) -> Result<LLMProviderFromHTTP, GatewayError> {
    let inner: Arc<dyn HTTPLLMProvider> = match channel.provider {
        ProviderKind::OpenAI => {
            let base = base_url(channel, relay_provider_openai::OpenAI::default_base_url())?;
            let mut p = relay_provider_openai::OpenAI::new(&channel.key, base, &params.actual_model);
            p.stream = params.is_stream;
            p.tools = params.tools.clone();
            p.max_tokens = params.max_tokens;
            p.temperature = params.temperature;
            Arc::new(p)
        }

        ProviderKind::Azure => {
            let base = channel.base_url.as_deref().ok_or_else(|| {
                GatewayError::Internal("Azure channels require base_url (resource endpoint)".into())
            })?;
            let base = Url::parse(base)?;
            let mut p = relay_provider_azure::Azure::new(
                &channel.key,
                base,
                &params.actual_model,
                &params.actual_model,
                DEFAULT_AZURE_API_VERSION,
            );
            p.stream = params.is_stream;
            p.tools = params.tools.clone();
            p.max_tokens = params.max_tokens;
            p.temperature = params.temperature;
            Arc::new(p)
        }

        ProviderKind::Anthropic => {
            let base = base_url(channel, relay_provider_anthropic::Anthropic::default_base_url())?;
            let mut p = relay_provider_anthropic::Anthropic::new(&channel.key, base, &params.actual_model);
            p.stream = params.is_stream;
            p.tools = params.tools.clone();
            if let Some(mt) = params.max_tokens {
                p.max_tokens = mt;
            }
            if let Some(t) = params.temperature {
                p.temperature = t;
            }
            Arc::new(p)
        }

        ProviderKind::Gemini => {
            let base = base_url(channel, relay_provider_gemini::Gemini::default_base_url())?;
            let mut p = relay_provider_gemini::Gemini::new(&channel.key, base, &params.actual_model);
            p.stream = params.is_stream;
            p.tools = params.tools.clone();
            p.max_tokens = params.max_tokens;
            p.temperature = params.temperature;
            Arc::new(p)
        }

        ProviderKind::DeepSeek => {
            let mut p = match &channel.base_url {
                Some(raw) => {
                    relay_provider_deepseek::Deepseek::with_base_url(&channel.key, Url::parse(raw)?, &params.actual_model)
                }
                None => relay_provider_deepseek::Deepseek::new(&channel.key, &params.actual_model),
            };
            p.set_tools(params.tools.clone());
            p.set_stream(params.is_stream);
            p.set_max_tokens(params.max_tokens);
            p.set_temperature(params.temperature);
            Arc::new(p)
        }

        ProviderKind::Bedrock => {
            let parts: Vec<&str> = channel.key.splitn(3, '|').collect();
            let [access_key_id, secret_access_key, region] = parts[..] else {
                return Err(GatewayError::Internal("Bedrock channel key must be AK|SK|region".into()));
            };
            let mut p = relay_provider_bedrock::Bedrock::new(access_key_id, secret_access_key, region, &params.actual_model);
            if let Some(mt) = params.max_tokens {
                p.max_tokens = mt;
            }
            p.temperature = params.temperature;
            p.tools = params.tools.clone();
            Arc::new(p)
        }
    };

    Ok(LLMProviderFromHTTP::new(inner))
}

fn base_url(channel: &Channel, default: Url) -> Result<Url, GatewayError> {
    match &channel.base_url {
        Some(raw) => Url::parse(raw).map_err(GatewayError::from),
        None => Ok(default),
    }
}
