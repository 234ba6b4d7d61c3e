//! DeepSeek adaptor (spec §4.5 C5). DeepSeek's `/chat/completions` wire
//! format is byte-for-byte OpenAI's, so this crate contributes only the
//! base URL and model defaults and otherwise delegates to
//! [`relay_provider_openai::OpenAI`].

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, StreamChunk, Tool, ToolChoice};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;
use relay_provider_openai::OpenAI;
use url::Url;

pub struct Deepseek {
    inner: OpenAI,
}

impl Deepseek {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, Deepseek::default_base_url(), model)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: Url, model: impl Into<String>) -> Self {
        Self { inner: OpenAI::new(api_key, base_url, model) }
    }

    pub fn default_base_url() -> Url {
        Url::parse("https://api.deepseek.com/").unwrap()
    }

    pub fn set_tools(&mut self, tools: Option<Vec<Tool>>) {
        self.inner.tools = tools;
    }

    pub fn set_tool_choice(&mut self, choice: Option<ToolChoice>) {
        self.inner.tool_choice = choice;
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.inner.stream = stream;
    }

    pub fn set_max_tokens(&mut self, max_tokens: Option<u32>) {
        self.inner.max_tokens = max_tokens;
    }

    pub fn set_temperature(&mut self, temperature: Option<f32>) {
        self.inner.temperature = temperature;
    }
}

impl HTTPChatProvider for Deepseek {
    fn chat_request(&self, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<http::Request<Vec<u8>>, GatewayError> {
        self.inner.chat_request(messages, tools)
    }

    fn parse_chat(&self, resp: http::Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
        self.inner.parse_chat(resp)
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, GatewayError> {
        self.inner.parse_stream_line(line)
    }
}

impl HTTPEmbeddingProvider for Deepseek {
    fn embed_request(&self, inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        self.inner.embed_request(inputs)
    }

    fn parse_embed(&self, resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        self.inner.parse_embed(resp)
    }
}

impl HTTPCompletionProvider for Deepseek {
    fn complete_request(&self, req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        self.inner.complete_request(req)
    }

    fn parse_complete(&self, resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        self.inner.parse_complete(resp)
    }
}

impl HTTPLLMProvider for Deepseek {
    fn tools(&self) -> Option<&[Tool]> {
        self.inner.tools()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_targets_deepseek_host() {
        let provider = Deepseek::new("sk-test", "deepseek-chat");
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        assert_eq!(req.uri().host(), Some("api.deepseek.com"));
        assert_eq!(req.uri().path(), "/chat/completions");
    }
}
