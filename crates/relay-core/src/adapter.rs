//! Bridges the sync, wire-format half of a provider adaptor
//! ([`HTTPChatProvider`] et al.) into the async trait objects the Relay
//! Orchestrator dispatches against. One [`LLMProviderFromHTTP`] wraps each
//! channel's adaptor; constructing it is the last step of CONVERT_REQUEST
//! before DISPATCH (spec §4.5/§4.6).

use crate::chat::{ChatMessage, ChatProvider, ChatResponse, HTTPChatProvider, StreamChunk, Tool};
use crate::completion::{CompletionProvider, CompletionRequest, CompletionResponse, HTTPCompletionProvider};
use crate::embedding::{EmbeddingProvider, EmbeddingResponse, HTTPEmbeddingProvider};
use crate::error::GatewayError;
use crate::outbound::call_outbound;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Combined wire-format surface a provider crate must implement. Each
/// `relay-provider-*` crate exposes one concrete type behind this trait.
pub trait HTTPLLMProvider: HTTPChatProvider + HTTPCompletionProvider + HTTPEmbeddingProvider {
    fn tools(&self) -> Option<&[Tool]> {
        None
    }
}

pub struct LLMProviderFromHTTP {
    inner: Arc<dyn HTTPLLMProvider>,
}

impl LLMProviderFromHTTP {
    pub fn new(inner: Arc<dyn HTTPLLMProvider>) -> Self {
        Self { inner }
    }

    async fn do_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Box<dyn ChatResponse>, GatewayError> {
        let req = self.inner.chat_request(messages, tools)?;
        let resp = call_outbound(req).await?;
        self.inner.parse_chat(resp)
    }
}

#[async_trait]
impl ChatProvider for LLMProviderFromHTTP {
    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Box<dyn ChatResponse>, GatewayError> {
        self.do_chat(messages, tools).await
    }

    async fn chat_stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>, GatewayError> {
        if !self.inner.supports_streaming() {
            return Err(GatewayError::Internal("streaming not supported by this adaptor".into()));
        }

        let req = self.inner.chat_request(messages, tools)?;
        let (parts, body) = req.into_parts();
        let mut builder = reqwest::Client::new().request(
            parts.method.as_str().parse().map_err(|e| GatewayError::Internal(format!("{e}")))?,
            parts.uri.to_string(),
        );
        for (name, value) in parts.headers.iter() {
            builder = builder.header(
                name.as_str(),
                value.to_str().map_err(|e| GatewayError::Internal(e.to_string()))?,
            );
        }
        let resp = builder.body(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamPermanent(format!("{status}: {text}")));
        }

        let byte_stream = resp.bytes_stream();
        let inner = self.inner.clone();
        let stream = byte_stream
            .map(|chunk| chunk.map_err(GatewayError::from))
            .scan(String::new(), move |buf, chunk_result| {
                let inner = inner.clone();
                let out: Vec<Result<StreamChunk, GatewayError>> = match chunk_result {
                    Err(e) => vec![Err(e)],
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        let mut events = Vec::new();
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            *buf = buf[pos + 1..].to_string();
                            if line.is_empty() {
                                continue;
                            }
                            match inner.parse_stream_line(&line) {
                                Ok(Some(chunk)) => events.push(Ok(chunk)),
                                Ok(None) => {}
                                Err(e) => events.push(Err(e)),
                            }
                        }
                        events
                    }
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl CompletionProvider for LLMProviderFromHTTP {
    async fn complete(&self, req_obj: &CompletionRequest) -> Result<CompletionResponse, GatewayError> {
        let req = self.inner.complete_request(req_obj)?;
        let resp = call_outbound(req).await?;
        self.inner.parse_complete(resp)
    }
}

#[async_trait]
impl EmbeddingProvider for LLMProviderFromHTTP {
    async fn embed(&self, inputs: Vec<String>) -> Result<EmbeddingResponse, GatewayError> {
        let req = self.inner.embed_request(&inputs)?;
        let resp = call_outbound(req).await?;
        self.inner.parse_embed(resp)
    }
}
