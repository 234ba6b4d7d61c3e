//! `/v1/embeddings` surface.

use crate::error::GatewayError;
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, input: Vec<String>) -> Result<EmbeddingResponse, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<crate::usage::Usage>,
}

pub trait HTTPEmbeddingProvider: Send + Sync {
    fn embed_request(&self, input: &[String]) -> Result<http::Request<Vec<u8>>, GatewayError>;
    fn parse_embed(&self, resp: http::Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError>;
}
