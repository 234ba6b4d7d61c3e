//! Gemini `generateContent`/`streamGenerateContent` wire-format adaptor
//! (spec §4.5 C5). Gemini folds usage into the same JSON body the model
//! output lives in (`usageMetadata`), so unlike the token-delimited
//! providers there is no separate usage frame to special-case in the
//! streaming path — the final SSE frame simply carries both.

mod api;

use relay_core::adapter::HTTPLLMProvider;
use relay_core::chat::{ChatMessage, ChatResponse, HTTPChatProvider, StreamChunk, Tool};
use relay_core::completion::{CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use relay_core::embedding::{EmbeddingResponse, HTTPEmbeddingProvider};
use relay_core::error::GatewayError;
use url::Url;

/// One channel's worth of Gemini wire-format configuration.
pub struct Gemini {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stream: bool,
    pub tools: Option<Vec<Tool>>,
}

impl Gemini {
    pub fn new(api_key: impl Into<String>, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stream: false,
            tools: None,
        }
    }

    pub fn default_base_url() -> Url {
        Url::parse("https://generativelanguage.googleapis.com/v1beta/models/").unwrap()
    }
}

impl HTTPChatProvider for Gemini {
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

impl HTTPEmbeddingProvider for Gemini {
    fn embed_request(&self, inputs: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError> {
        api::embed_request(self, inputs)
    }

    fn parse_embed(&self, resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
        api::parse_embed(resp)
    }
}

impl HTTPCompletionProvider for Gemini {
    fn complete_request(&self, req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, GatewayError> {
        let message = ChatMessage::user(req.prompt.clone());
        api::chat_request(self, &[message], None)
    }

    fn parse_complete(&self, resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, GatewayError> {
        let parsed = api::parse_chat(resp)?;
        Ok(CompletionResponse {
            text: parsed.text().unwrap_or_default(),
            finish_reason: parsed.finish_reason(),
            usage: parsed.usage(),
        })
    }
}

impl HTTPLLMProvider for Gemini {
    fn tools(&self) -> Option<&[Tool]> {
        self.tools.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_targets_generate_content() {
        let provider = Gemini::new("key123", Gemini::default_base_url(), "gemini-1.5-flash");
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        assert!(req.uri().path().ends_with(":generateContent"));
        assert!(req.uri().query().unwrap().contains("key=key123"));
    }

    #[test]
    fn streaming_request_uses_sse_endpoint() {
        let mut provider = Gemini::new("key123", Gemini::default_base_url(), "gemini-1.5-flash");
        provider.stream = true;
        let req = provider.chat_request(&[ChatMessage::user("hi")], None).unwrap();
        assert!(req.uri().path().ends_with(":streamGenerateContent"));
        assert!(req.uri().query().unwrap().contains("alt=sse"));
    }
}
