use http::{header::CONTENT_TYPE, Method, Request, Response};
use relay_core::chat::{ChatMessage, ChatResponse, StreamChunk, Tool};
use relay_core::embedding::EmbeddingResponse;
use relay_core::error::GatewayError;
use relay_provider_openai::api as oai;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::Azure;

const API_KEY_HEADER: &str = "api-key";

fn deployment_url(azure: &Azure, deployment: &str, op: &str) -> Result<url::Url, GatewayError> {
    let path = format!("openai/deployments/{deployment}/{op}");
    let mut url = azure.base_url.join(&path)?;
    url.set_query(Some(&format!("api-version={}", azure.api_version)));
    Ok(url)
}

pub(crate) fn chat_request(azure: &Azure, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<Request<Vec<u8>>, GatewayError> {
    if azure.api_key.is_empty() {
        return Err(GatewayError::Auth("missing Azure OpenAI API key".into()));
    }

    let request_tools = tools.or(azure.tools.as_deref());
    let json_body = oai::build_chat_body(
        &azure.model,
        messages,
        request_tools,
        azure.max_tokens,
        azure.temperature,
        azure.stream,
        azure.top_p,
        azure.tool_choice.as_ref(),
    )?;

    let url = deployment_url(azure, &azure.deployment, "chat/completions")?;
    Ok(Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, &azure.api_key)
        .body(json_body)?)
}

pub(crate) fn parse_chat(resp: Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
    oai::parse_chat(resp)
}

pub(crate) fn embed_request(azure: &Azure, inputs: &[String]) -> Result<Request<Vec<u8>>, GatewayError> {
    if azure.api_key.is_empty() {
        return Err(GatewayError::Auth("missing Azure OpenAI API key".into()));
    }
    let embed_deployment = azure.embedding_deployment.as_deref().unwrap_or(&azure.deployment);
    let json_body = oai::build_embed_body(&azure.model, inputs)?;

    let url = deployment_url(azure, embed_deployment, "embeddings")?;
    Ok(Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, &azure.api_key)
        .body(json_body)?)
}

pub(crate) fn parse_embed(resp: Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
    oai::parse_embed(resp)
}

pub(crate) fn parse_stream_line(line: &str, tool_states: &Mutex<HashMap<usize, oai::ToolStreamState>>) -> Result<Option<StreamChunk>, GatewayError> {
    oai::parse_sse_line(line, tool_states)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_targets_deployment_path() {
        let azure = Azure::new("key123", url::Url::parse("https://my-resource.openai.azure.com/").unwrap(), "gpt-4o-deployment", "gpt-4o", "2024-06-01");
        let req = chat_request(&azure, &[ChatMessage::user("hi")], None).unwrap();
        assert_eq!(req.uri().path(), "/openai/deployments/gpt-4o-deployment/chat/completions");
        assert_eq!(req.uri().query(), Some("api-version=2024-06-01"));
        assert_eq!(req.headers().get(API_KEY_HEADER).unwrap(), "key123");
        assert!(req.headers().get(http::header::AUTHORIZATION).is_none());
    }
}
