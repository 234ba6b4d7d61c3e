//! Legacy text-completion surface (`/v1/completions`), kept alongside chat
//! because several providers (DeepSeek, Azure) still expose the older
//! completion endpoint behind the same key.

use crate::chat::{ChatResponse, FinishReason, ToolCall};
use crate::usage::Usage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    pub fn builder(model: impl Into<String>, prompt: impl Into<String>) -> CompletionRequestBuilder {
        CompletionRequestBuilder {
            request: CompletionRequest::new(model, prompt),
        }
    }
}

pub struct CompletionRequestBuilder {
    request: CompletionRequest,
}

impl CompletionRequestBuilder {
    pub fn max_tokens(mut self, val: u32) -> Self {
        self.request.max_tokens = Some(val);
        self
    }

    pub fn temperature(mut self, val: f32) -> Self {
        self.request.temperature = Some(val);
        self
    }

    pub fn build(self) -> CompletionRequest {
        self.request
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl ChatResponse for CompletionResponse {
    fn text(&self) -> Option<String> {
        Some(self.text.clone())
    }

    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        None
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

impl std::fmt::Display for CompletionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Implemented by the async, trait-object-friendly side of an adaptor
/// (spec §4.5). HTTP-level adaptors implement `HttpCompletionAdaptor`
/// instead and are lifted into this trait by `LLMProviderFromHTTP`.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, crate::error::GatewayError>;
}

pub trait HTTPCompletionProvider: Send + Sync {
    fn complete_request(&self, req: &CompletionRequest) -> Result<http::Request<Vec<u8>>, crate::error::GatewayError>;
    fn parse_complete(&self, resp: http::Response<Vec<u8>>) -> Result<CompletionResponse, crate::error::GatewayError>;
}
