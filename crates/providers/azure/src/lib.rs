//! Azure OpenAI wire-format adaptor (spec §4.5 C5). Reuses the OpenAI
//! request/response JSON shape via `relay-provider-openai`'s shared body
//! builders, but routes through a per-resource deployment path and
//! authenticates with the `api-key` header instead of a bearer token —
//! Azure has no teacher counterpart, so this crate is new (see DESIGN.md).

mod api;

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, StreamChunk, Tool, ToolChoice};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;
use relay_provider_openai::api::ToolStreamState;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// One channel's worth of Azure OpenAI configuration. `base_url` is the
/// resource endpoint (`https://{resource}.openai.azure.com/`); the model
/// actually dispatched is selected by `deployment`, not `model`.
pub struct Azure {
    pub api_key: String,
    pub base_url: Url,
    pub deployment: String,
    pub embedding_deployment: Option<String>,
    pub api_version: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stream: bool,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    tool_states: Mutex<HashMap<usize, ToolStreamState>>,
}

impl Azure {
    pub fn new(api_key: impl Into<String>, base_url: Url, deployment: impl Into<String>, model: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url,
            deployment: deployment.into(),
            embedding_deployment: None,
            api_version: api_version.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: false,
            tools: None,
            tool_choice: None,
            tool_states: Mutex::new(HashMap::new()),
        }
    }
}

impl HTTPChatProvider for Azure {
    fn chat_request(&self, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<http::Request<Vec<u8>>, GatewayError> {
        api::chat_request(self, messages, tools)
    }

    fn parse_chat(&self, resp: http::Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
        api::parse_chat(resp)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, GatewayError> {
        api::parse_stream_line(line, &self.tool_states)
    }
}

impl HTTPEmbeddingProvider for Azure {
    fn embed_request(&self, inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        api::embed_request(self, inputs)
    }

    fn parse_embed(&self, resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        api::parse_embed(resp)
    }
}

impl HTTPCompletionProvider for Azure {
    fn complete_request(&self, _req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("Azure OpenAI legacy /completions is not exposed by this channel type".into()))
    }

    fn parse_complete(&self, _resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        Err(GatewayError::Internal("Azure OpenAI legacy /completions is not exposed by this channel type".into()))
    }
}

impl HTTPLLMProvider for Azure {
    fn tools(&self) -> Option<&[Tool]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_request_falls_back_to_chat_deployment() {
        let azure = Azure::new("key123", Url::parse("https://my-resource.openai.azure.com/").unwrap(), "gpt-4o-deployment", "gpt-4o", "2024-06-01");
        let req = azure.embed_request(&["hello".into()]).unwrap();
        assert_eq!(req.uri().path(), "/openai/deployments/gpt-4o-deployment/embeddings");
    }

    #[test]
    fn embed_request_uses_dedicated_deployment_when_set() {
        let mut azure = Azure::new("key123", Url::parse("https://my-resource.openai.azure.com/").unwrap(), "gpt-4o-deployment", "gpt-4o", "2024-06-01");
        azure.embedding_deployment = Some("text-embedding-3-small-deployment".into());
        let req = azure.embed_request(&["hello".into()]).unwrap();
        assert_eq!(req.uri().path(), "/openai/deployments/text-embedding-3-small-deployment/embeddings");
    }
}
