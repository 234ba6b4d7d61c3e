//! Wire-format shaping for the OpenAI chat/embeddings endpoints. Adapted
//! from the teacher's OpenAI adaptor: request/response shapes, SSE delta
//! assembly and the snake_case fix-up for `api.openai.com`'s `extra_body`
//! are all carried over, scoped down to what the gateway's canonical chat
//! vocabulary actually needs.

use either::*;
use http::{
    Method, Request, Response,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use relay_core::chat::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, MessageType, StreamChunk, Tool, ToolCall,
    ToolChoice,
};
use relay_core::error::GatewayError;
use relay_core::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::OpenAI;

#[derive(Serialize, Debug)]
struct OaiMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none", with = "either::serde_untagged_optional")]
    content: Option<Either<Vec<OaiContentPart<'a>>, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize, Debug)]
struct OaiContentPart<'a> {
    #[serde(rename = "type")]
    part_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<OaiImageUrl<'a>>,
}

#[derive(Serialize, Debug)]
struct OaiImageUrl<'a> {
    url: &'a str,
}

#[derive(Serialize, Debug)]
struct OaiFunctionPayload<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize, Debug)]
struct OaiToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: OaiFunctionPayload<'a>,
}

#[derive(Serialize, Debug)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
}

#[derive(Serialize)]
struct OaiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize, Debug, Clone, Default)]
struct OaiPromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[derive(Deserialize, Debug, Clone)]
struct OaiRawUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<OaiPromptTokensDetails>,
}

impl OaiRawUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            cached_input_tokens: self.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            estimated: false,
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Debug)]
struct OaiChatResponse {
    choices: Vec<OaiChatChoice>,
    usage: Option<OaiRawUsage>,
}

#[derive(Deserialize, Debug)]
struct OaiChatChoice {
    finish_reason: String,
    message: OaiChatMsg,
}

#[derive(Deserialize, Debug)]
struct OaiChatMsg {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

impl std::fmt::Debug for OaiChatResponseParsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OaiChatResponseParsed").finish()
    }
}

pub struct OaiChatResponseParsed(OaiChatResponse);

impl ChatResponse for OaiChatResponseParsed {
    fn text(&self) -> Option<String> {
        self.0.choices.first().and_then(|c| c.message.content.clone())
    }

    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        self.0.choices.first().and_then(|c| c.message.tool_calls.clone())
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.0.choices.first().map(|c| match c.finish_reason.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        })
    }

    fn usage(&self) -> Option<Usage> {
        self.0.usage.clone().map(|u| u.into_usage())
    }
}

fn chat_role(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::System => "system",
        ChatRole::Tool => "tool",
    }
}

fn message_to_wire(msg: &ChatMessage) -> OaiMessage<'_> {
    if let Some(call_id) = msg.tool_call_id.as_deref() {
        return OaiMessage {
            role: "tool",
            content: Some(Right(msg.content.clone())),
            tool_calls: None,
            tool_call_id: Some(call_id),
        };
    }

    match &msg.message_type {
        MessageType::ToolUse(calls) => OaiMessage {
            role: chat_role(&msg.role),
            content: if msg.content.is_empty() { None } else { Some(Right(msg.content.clone())) },
            tool_calls: Some(
                calls
                    .iter()
                    .map(|c| OaiToolCall {
                        id: &c.id,
                        call_type: "function",
                        function: OaiFunctionPayload { name: &c.function.name, arguments: &c.function.arguments },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        },
        MessageType::ImageURL(url) => OaiMessage {
            role: chat_role(&msg.role),
            content: Some(Left(vec![
                OaiContentPart { part_type: "text", text: Some(&msg.content), image_url: None },
                OaiContentPart { part_type: "image_url", text: None, image_url: Some(OaiImageUrl { url }) },
            ])),
            tool_calls: None,
            tool_call_id: None,
        },
        _ => OaiMessage {
            role: chat_role(&msg.role),
            content: Some(Right(msg.content.clone())),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

/// Builds the OpenAI-shaped chat request body shared by every adaptor that
/// speaks this wire format (OpenAI itself, Azure OpenAI, DeepSeek).
pub fn build_chat_body(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[Tool]>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    stream: bool,
    top_p: Option<f32>,
    tool_choice: Option<&ToolChoice>,
) -> Result<Vec<u8>, GatewayError> {
    let wire_messages: Vec<OaiMessage> = messages.iter().map(message_to_wire).collect();
    let request_tool_choice = if tools.is_some() { tool_choice } else { None };

    let body = OaiChatRequest {
        model,
        messages: wire_messages,
        max_tokens,
        temperature,
        stream,
        top_p,
        tools,
        tool_choice: request_tool_choice,
    };
    Ok(serde_json::to_vec(&body)?)
}

pub fn chat_request(cfg: &OpenAI, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<Request<Vec<u8>>, GatewayError> {
    let request_tools = tools.or(cfg.tools.as_deref());
    let json_body = build_chat_body(
        &cfg.model,
        messages,
        request_tools,
        cfg.max_tokens,
        cfg.temperature,
        cfg.stream,
        cfg.top_p,
        cfg.tool_choice.as_ref(),
    )?;

    let url = cfg.base_url.join("chat/completions")?;
    let builder = Request::builder()
        .method(Method::POST)
        .uri(url.to_string())
        .header(CONTENT_TYPE, "application/json");
    Ok(auth_header(builder, &cfg.api_key)?.body(json_body).map_err(GatewayError::from)?)
}

pub fn parse_chat(resp: Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
    check_status(&resp)?;
    let parsed: OaiChatResponse = serde_json::from_slice(resp.body())?;
    Ok(Box::new(OaiChatResponseParsed(parsed)))
}

/// Builds the OpenAI-shaped embeddings request body.
pub fn build_embed_body(model: &str, inputs: &[String]) -> Result<Vec<u8>, GatewayError> {
    let body = OaiEmbeddingRequest { model, input: inputs };
    Ok(serde_json::to_vec(&body)?)
}

pub fn embed_request(cfg: &OpenAI, inputs: &[String]) -> Result<Request<Vec<u8>>, GatewayError> {
    let json_body = build_embed_body(&cfg.model, inputs)?;
    let url = cfg.base_url.join("embeddings")?;
    let builder = Request::builder()
        .method(Method::POST)
        .uri(url.to_string())
        .header(CONTENT_TYPE, "application/json");
    Ok(auth_header(builder, &cfg.api_key)?.body(json_body).map_err(GatewayError::from)?)
}

#[derive(Deserialize)]
struct OaiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OaiEmbeddingResponse {
    data: Vec<OaiEmbeddingData>,
    usage: Option<OaiRawUsage>,
}

pub fn parse_embed(resp: Response<Vec<u8>>) -> Result<relay_core::embedding::EmbeddingResponse, GatewayError> {
    check_status(&resp)?;
    let parsed: OaiEmbeddingResponse = serde_json::from_slice(resp.body())?;
    Ok(relay_core::embedding::EmbeddingResponse {
        vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        usage: parsed.usage.map(|u| u.into_usage()),
    })
}

fn auth_header(builder: http::request::Builder, api_key: &str) -> Result<http::request::Builder, GatewayError> {
    if api_key.is_empty() {
        return Ok(builder);
    }
    Ok(builder.header(AUTHORIZATION, format!("Bearer {api_key}")))
}

pub fn check_status(resp: &Response<Vec<u8>>) -> Result<(), GatewayError> {
    if resp.status().is_success() {
        return Ok(());
    }
    let status = resp.status().as_u16();
    let message = serde_json::from_slice::<Value>(resp.body())
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(resp.body()).to_string());

    Err(match status {
        401 | 403 => GatewayError::ChannelFault(message),
        429 => GatewayError::UpstreamTransient(message),
        400..=499 => GatewayError::UpstreamPermanent(message),
        _ => GatewayError::UpstreamTransient(message),
    })
}

#[derive(Deserialize, Debug)]
struct OaiStreamChunk {
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    usage: Option<OaiRawUsage>,
}

#[derive(Deserialize, Debug)]
struct OaiStreamChoice {
    delta: OaiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct OaiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiStreamToolCall>>,
}

#[derive(Deserialize, Debug)]
struct OaiStreamToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    function: OaiStreamFunction,
}

#[derive(Deserialize, Debug, Default)]
struct OaiStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

#[derive(Default)]
pub struct ToolStreamState {
    id: String,
    name: String,
    started: bool,
}

/// Parses a single SSE `data:` line into at most one [`StreamChunk`]. Tool
/// calls need incremental reassembly across lines, so the caller owns a
/// `tool_states` buffer for the lifetime of one stream.
pub fn parse_sse_line(line: &str, tool_states: &Mutex<HashMap<usize, ToolStreamState>>) -> Result<Option<StreamChunk>, GatewayError> {
    let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(StreamChunk::Done { finish_reason: FinishReason::Stop }));
    }

    let chunk: OaiStreamChunk = serde_json::from_str(data)?;
    if let Some(usage) = chunk.usage {
        return Ok(Some(StreamChunk::Usage(usage.into_usage())));
    }

    let Some(choice) = chunk.choices.into_iter().next() else { return Ok(None) };

    if let Some(content) = choice.delta.content {
        if !content.is_empty() {
            return Ok(Some(StreamChunk::Text(content)));
        }
    }

    if let Some(tool_calls) = choice.delta.tool_calls {
        let mut states = tool_states.lock().expect("tool state lock poisoned");
        for tc in tool_calls {
            let index = tc.index.unwrap_or(0);
            let entry = states.entry(index).or_default();
            if let Some(id) = tc.id {
                entry.id = id;
            }
            if let Some(name) = tc.function.name {
                entry.name = name.clone();
                if !entry.started {
                    entry.started = true;
                    return Ok(Some(StreamChunk::ToolUseStart { index, id: entry.id.clone(), name }));
                }
            }
            if !tc.function.arguments.is_empty() {
                return Ok(Some(StreamChunk::ToolUseInputDelta { index, partial_json: tc.function.arguments }));
            }
        }
        return Ok(None);
    }

    if let Some(reason) = choice.finish_reason {
        let finish_reason = match reason.as_str() {
            "tool_calls" => FinishReason::ToolCalls,
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        };
        return Ok(Some(StreamChunk::Done { finish_reason }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text_delta() {
        let states = Mutex::new(HashMap::new());
        let line = r#"data: {"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#;
        let chunk = parse_sse_line(line, &states).unwrap().unwrap();
        matches!(chunk, StreamChunk::Text(t) if t == "hi");
    }

    #[test]
    fn parses_done_sentinel() {
        let states = Mutex::new(HashMap::new());
        let chunk = parse_sse_line("data: [DONE]", &states).unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::Done { .. }));
    }

    #[test]
    fn ignores_non_data_lines() {
        let states = Mutex::new(HashMap::new());
        assert!(parse_sse_line("event: ping", &states).unwrap().is_none());
    }
}
