//! OpenAI-compatible wire-format adaptor (spec §4.5 C5). Also backs any
//! channel whose `type` is the OpenAI-compatible proxy, since the request
//! shape at `/chat/completions` is shared.

pub mod api;

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, StreamChunk, Tool, ToolChoice};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// One channel's worth of OpenAI wire-format configuration. Built by the
/// orchestrator's CONVERT_REQUEST step from the selected `Channel`.
pub struct OpenAI {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stream: bool,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    tool_states: Mutex<HashMap<usize, api::ToolStreamState>>,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url,
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

    pub fn default_base_url() -> Url {
        Url::parse("https://api.openai.com/v1/").unwrap()
    }
}

impl HTTPChatProvider for OpenAI {
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
        api::parse_sse_line(line, &self.tool_states)
    }
}

impl HTTPEmbeddingProvider for OpenAI {
    fn embed_request(&self, inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        api::embed_request(self, inputs)
    }

    fn parse_embed(&self, resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        api::parse_embed(resp)
    }
}

impl HTTPCompletionProvider for OpenAI {
    fn complete_request(&self, _req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        Err(GatewayError::Internal("OpenAI legacy /v1/completions is not exposed by this channel type".into()))
    }

    fn parse_complete(&self, _resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        Err(GatewayError::Internal("OpenAI legacy /v1/completions is not exposed by this channel type".into()))
    }
}

impl HTTPLLMProvider for OpenAI {
    fn tools(&self) -> Option<&[Tool]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::chat::ChatMessage;

    #[test]
    fn chat_request_targets_chat_completions_path() {
        let provider = OpenAI::new("sk-test", OpenAI::default_base_url(), "gpt-4o-mini");
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        assert_eq!(req.uri().path(), "/v1/chat/completions");
        assert!(req.headers().get("authorization").is_some());
    }

    #[test]
    fn embed_request_targets_embeddings_path() {
        let provider = OpenAI::new("sk-test", OpenAI::default_base_url(), "text-embedding-3-small");
        let req = provider.embed_request(&["hello".into()]).unwrap();
        assert_eq!(req.uri().path(), "/v1/embeddings");
    }
}
