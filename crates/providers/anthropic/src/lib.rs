//! Anthropic Messages API wire-format adaptor (spec §4.5 C5).

mod api;

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, StreamChunk, Tool, ToolChoice};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;
use url::Url;

/// One channel's worth of Anthropic wire-format configuration.
pub struct Anthropic {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
    pub stream: bool,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub reasoning: bool,
    pub thinking_budget_tokens: u32,
}

impl Anthropic {
    pub fn new(api_key: impl Into<String>, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
            system: None,
            stream: false,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            reasoning: false,
            thinking_budget_tokens: 16000,
        }
    }

    pub fn default_base_url() -> Url {
        Url::parse("https://api.anthropic.com/v1/").unwrap()
    }
}

impl HTTPChatProvider for Anthropic {
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
        api::parse_sse_line(line)
    }
}

impl HTTPEmbeddingProvider for Anthropic {
    fn embed_request(&self, _inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("Anthropic does not expose an embeddings endpoint".into()))
    }

    fn parse_embed(&self, _resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        Err(GatewayError::Internal("Anthropic does not expose an embeddings endpoint".into()))
    }
}

impl HTTPCompletionProvider for Anthropic {
    fn complete_request(&self, _req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("Anthropic has no legacy /v1/completions surface".into()))
    }

    fn parse_complete(&self, _resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        Err(GatewayError::Internal("Anthropic has no legacy /v1/completions surface".into()))
    }
}

impl HTTPLLMProvider for Anthropic {
    fn tools(&self) -> Option<&[Tool]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_targets_messages_endpoint() {
        let provider = Anthropic::new("sk-ant-test", Anthropic::default_base_url(), "claude-3-5-sonnet-latest");
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        assert_eq!(req.uri().path(), "/v1/messages");
        assert!(req.headers().get("x-api-key").is_some());
        assert!(req.headers().get("anthropic-version").is_some());
    }

    #[test]
    fn reasoning_pins_temperature_to_one() {
        let mut provider = Anthropic::new("sk-ant-test", Anthropic::default_base_url(), "claude-3-5-sonnet-latest");
        provider.reasoning = true;
        provider.temperature = 0.2;
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        let body: serde_json::Value = serde_json::from_slice(req.body()).unwrap();
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["thinking"]["type"], "enabled");
    }
}
