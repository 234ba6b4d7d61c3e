//! AWS Bedrock runtime adaptor (spec §4.5 C5): Anthropic-on-Bedrock's
//! `InvokeModel` surface, signed with AWS SigV4 rather than a bearer token.
//! No teacher counterpart exists for this vendor; see DESIGN.md for the
//! grounding note. Streaming (`InvokeModelWithResponseStream`, which frames
//! its body as `application/vnd.amazon.eventstream` rather than SSE) is out
//! of scope for this first cut — `supports_streaming` reports `false` and
//! the orchestrator falls back to COLLECT_RESPONSE for Bedrock channels.

mod api;
mod sigv4;

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, Tool};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;

/// One channel's worth of Bedrock configuration. `model_id` is the
/// Bedrock model identifier (e.g. `anthropic.claude-3-sonnet-20240229-v1:0`),
/// distinct from the upstream vendor's own model name.
pub struct Bedrock {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub system: Option<String>,
    pub tools: Option<Vec<Tool>>,
}

impl Bedrock {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>, region: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            region: region.into(),
            model_id: model_id.into(),
            max_tokens: 4096,
            temperature: None,
            top_p: None,
            system: None,
            tools: None,
        }
    }
}

impl HTTPChatProvider for Bedrock {
    fn chat_request(&self, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<http::Request<Vec<u8>>, GatewayError> {
        api::chat_request(self, messages, tools)
    }

    fn parse_chat(&self, resp: http::Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
        api::parse_chat(resp)
    }
}

impl HTTPEmbeddingProvider for Bedrock {
    fn embed_request(&self, _inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("this Bedrock channel is not configured for an embedding model".into()))
    }

    fn parse_embed(&self, _resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        Err(GatewayError::Internal("this Bedrock channel is not configured for an embedding model".into()))
    }
}

impl HTTPCompletionProvider for Bedrock {
    fn complete_request(&self, _req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("Bedrock has no legacy /v1/completions surface".into()))
    }

    fn parse_complete(&self, _resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        Err(GatewayError::Internal("Bedrock has no legacy /v1/completions surface".into()))
    }
}

impl HTTPLLMProvider for Bedrock {
    fn tools(&self) -> Option<&[Tool]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_streaming_by_default() {
        let bedrock = Bedrock::new("ak", "sk", "us-east-1", "anthropic.claude-3-sonnet-20240229-v1:0");
        assert!(!bedrock.supports_streaming());
    }
}
