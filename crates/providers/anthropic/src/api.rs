use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http::{header::CONTENT_TYPE, Method, Request, Response};
use relay_core::chat::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, FunctionCall, MessageType, StreamChunk,
    Tool, ToolCall, ToolChoice,
};
use relay_core::error::GatewayError;
use relay_core::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::Anthropic;

#[derive(Serialize, Debug)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "input_schema")]
    schema: &'a Value,
}

#[derive(Serialize, Debug)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Serialize, Debug)]
struct AnthropicChatRequest<'a> {
    messages: Vec<AnthropicMessage<'a>>,
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<HashMap<&'static str, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Serialize, Debug)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<MessageContent<'a>>,
}

#[derive(Serialize, Debug)]
struct MessageContent<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ImageSource>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "id")]
    tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "name")]
    tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "input")]
    tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "tool_use_id")]
    tool_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "content")]
    tool_output: Option<String>,
}

impl<'a> MessageContent<'a> {
    fn text(message_type: &'a str, text: &'a str) -> Self {
        MessageContent {
            message_type,
            text: Some(text),
            source: None,
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            tool_output: None,
        }
    }
}

#[derive(Serialize, Debug)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

fn anthropic_content<'a>(msg: &'a ChatMessage) -> Vec<MessageContent<'a>> {
    match &msg.message_type {
        MessageType::Text => vec![MessageContent::text("text", &msg.content)],
        MessageType::Pdf(bytes) => vec![MessageContent {
            message_type: "document",
            text: None,
            source: Some(ImageSource {
                source_type: "base64",
                media_type: "application/pdf".into(),
                data: BASE64.encode(bytes),
            }),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            tool_output: None,
        }],
        MessageType::Image((mime, bytes)) => vec![MessageContent {
            message_type: "image",
            text: None,
            source: Some(ImageSource {
                source_type: "base64",
                media_type: mime.mime_type().into(),
                data: BASE64.encode(bytes),
            }),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            tool_output: None,
        }],
        MessageType::ImageURL(_) => vec![MessageContent::text("text", &msg.content)],
        MessageType::ToolUse(calls) => {
            let mut content = Vec::new();
            if !msg.content.is_empty() {
                content.push(MessageContent::text("text", &msg.content));
            }
            content.extend(calls.iter().map(|c| MessageContent {
                message_type: "tool_use",
                text: None,
                source: None,
                tool_use_id: Some(c.id.clone()),
                tool_name: Some(c.function.name.clone()),
                tool_input: Some(serde_json::from_str(&c.function.arguments).unwrap_or_else(|_| serde_json::json!({}))),
                tool_result_id: None,
                tool_output: None,
            }));
            content
        }
        MessageType::ToolResult(results) => results
            .iter()
            .map(|r| MessageContent {
                message_type: "tool_result",
                text: None,
                source: None,
                tool_use_id: None,
                tool_name: None,
                tool_input: None,
                tool_result_id: Some(r.id.clone()),
                tool_output: Some(r.function.arguments.clone()),
            })
            .collect(),
    }
}

fn tool_choice_map(choice: &ToolChoice) -> HashMap<&'static str, String> {
    match choice {
        ToolChoice::Auto => HashMap::from([("type", "auto".to_string())]),
        ToolChoice::Any => HashMap::from([("type", "any".to_string())]),
        ToolChoice::None => HashMap::from([("type", "none".to_string())]),
        ToolChoice::Tool(name) => HashMap::from([("type", "tool".to_string()), ("name", name.clone())]),
    }
}

pub(crate) fn chat_request(
    anthropic: &Anthropic,
    messages: &[ChatMessage],
    tools: Option<&[Tool]>,
) -> Result<Request<Vec<u8>>, GatewayError> {
    if anthropic.api_key.is_empty() {
        return Err(GatewayError::Auth("missing Anthropic API key".into()));
    }

    let anthropic_messages = messages
        .iter()
        .map(|m| AnthropicMessage {
            role: match m.role {
                ChatRole::User | ChatRole::Tool | ChatRole::System => "user",
                ChatRole::Assistant => "assistant",
            },
            content: anthropic_content(m),
        })
        .collect();

    let tool_slice = tools.or(anthropic.tools.as_deref());
    let anthropic_tools = tool_slice.map(|slice| {
        slice
            .iter()
            .map(|tool| AnthropicTool {
                name: &tool.function.name,
                description: &tool.function.description,
                schema: &tool.function.parameters,
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = if anthropic_tools.is_some() {
        anthropic.tool_choice.as_ref().map(tool_choice_map)
    } else {
        None
    };

    let thinking = if anthropic.reasoning {
        Some(ThinkingConfig { thinking_type: "enabled".into(), budget_tokens: anthropic.thinking_budget_tokens })
    } else {
        None
    };

    let temperature = if anthropic.reasoning { 1.0 } else { anthropic.temperature };

    let body = AnthropicChatRequest {
        messages: anthropic_messages,
        model: &anthropic.model,
        max_tokens: anthropic.max_tokens,
        temperature,
        system: anthropic.system.as_deref(),
        stream: Some(anthropic.stream),
        top_p: anthropic.top_p,
        top_k: anthropic.top_k,
        tools: anthropic_tools,
        tool_choice,
        thinking,
    };

    let json_body = serde_json::to_vec(&body)?;
    let url = anthropic.base_url.join("messages")?;

    Ok(Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .header("x-api-key", &anthropic.api_key)
        .header("anthropic-version", "2023-06-01")
        .body(json_body)?)
}

/// Anthropic's own usage shape, parsed separately from the canonical
/// [`Usage`] struct because `cache_creation` is a nested TTL breakdown the
/// generic `serde(alias = ...)` scheme can't reach into.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_creation: Option<AnthropicCacheCreation>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
struct AnthropicCacheCreation {
    #[serde(default)]
    ephemeral_5m_input_tokens: u32,
    #[serde(default)]
    ephemeral_1h_input_tokens: u32,
}

impl AnthropicUsage {
    fn into_usage(self) -> Usage {
        let (write_5m, write_1h) = match self.cache_creation {
            Some(c) => (c.ephemeral_5m_input_tokens, c.ephemeral_1h_input_tokens),
            // Older responses report one undifferentiated total; the default
            // cache TTL is five minutes, so attribute it there.
            None => (self.cache_creation_input_tokens, 0),
        };
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cached_input_tokens: self.cache_read_input_tokens,
            cache_write_5m_tokens: write_5m,
            cache_write_1h_tokens: write_1h,
            estimated: false,
        }
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct AnthropicChatResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
struct AnthropicContentBlock {
    text: Option<String>,
    #[serde(rename = "type")]
    content_type: Option<String>,
    name: Option<String>,
    input: Option<Value>,
    id: Option<String>,
}

impl ChatResponse for AnthropicChatResponse {
    fn text(&self) -> Option<String> {
        let joined: String = self
            .content
            .iter()
            .filter(|c| c.content_type.as_deref() == Some("text") || c.content_type.is_none())
            .filter_map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        Some(joined)
    }

    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        let calls: Vec<ToolCall> = self
            .content
            .iter()
            .filter(|c| c.content_type.as_deref() == Some("tool_use"))
            .map(|c| ToolCall {
                id: c.id.clone().unwrap_or_default(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: c.name.clone().unwrap_or_default(),
                    arguments: serde_json::to_string(&c.input.clone().unwrap_or(Value::Null)).unwrap_or_default(),
                },
            })
            .collect();
        if calls.is_empty() {
            None
        } else {
            Some(calls)
        }
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.stop_reason.as_deref().map(map_stop_reason)
    }

    fn usage(&self) -> Option<Usage> {
        self.usage.map(|u| u.into_usage())
    }
}

fn map_stop_reason(raw: &str) -> FinishReason {
    match raw {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Other,
    }
}

pub(crate) fn parse_chat(resp: Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
    check_status(&resp)?;
    let parsed: AnthropicChatResponse = serde_json::from_slice(resp.body())?;
    Ok(Box::new(parsed))
}

fn check_status(resp: &Response<Vec<u8>>) -> Result<(), GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(resp.body()).to_string();
    match status.as_u16() {
        401 | 403 => Err(GatewayError::ChannelFault(format!("anthropic auth rejected: {body}"))),
        429 => Err(GatewayError::UpstreamTransient(format!("anthropic rate limited: {body}"))),
        529 => Err(GatewayError::UpstreamTransient(format!("anthropic overloaded: {body}"))),
        500..=599 => Err(GatewayError::UpstreamTransient(format!("anthropic {status}: {body}"))),
        _ => Err(GatewayError::UpstreamPermanent(format!("anthropic {status}: {body}"))),
    }
}

#[derive(Deserialize, Debug)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: Option<usize>,
    content_block: Option<StreamContentBlock>,
    delta: Option<StreamDelta>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    text: Option<String>,
    partial_json: Option<String>,
    thinking: Option<String>,
    stop_reason: Option<String>,
}

/// Parses one `data: {...}` SSE line from the Messages API's streaming
/// response. Anthropic's stream is a sequence of typed envelopes
/// (`content_block_start`/`_delta`/`_stop`, `message_delta`, `message_stop`)
/// rather than the OpenAI-style repeated delta object.
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<StreamChunk>, GatewayError> {
    let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let event: StreamEvent = serde_json::from_str(data)?;

    match event.event_type.as_str() {
        "content_block_start" => {
            if let (Some(index), Some(block)) = (event.index, event.content_block) {
                if block.block_type == "tool_use" {
                    return Ok(Some(StreamChunk::ToolUseStart {
                        index,
                        id: block.id.unwrap_or_default(),
                        name: block.name.unwrap_or_default(),
                    }));
                }
            }
            Ok(None)
        }
        "content_block_delta" => {
            let Some(delta) = event.delta else { return Ok(None) };
            if let Some(text) = delta.text {
                Ok(Some(StreamChunk::Text(text)))
            } else if let Some(thinking) = delta.thinking {
                Ok(Some(StreamChunk::Text(thinking)))
            } else if let (Some(index), Some(partial_json)) = (event.index, delta.partial_json) {
                Ok(Some(StreamChunk::ToolUseInputDelta { index, partial_json }))
            } else {
                Ok(None)
            }
        }
        "message_delta" => {
            if let Some(usage) = event.usage {
                return Ok(Some(StreamChunk::Usage(usage.into_usage())));
            }
            let stop_reason = event.delta.and_then(|d| d.stop_reason);
            Ok(stop_reason.map(|r| StreamChunk::Done { finish_reason: map_stop_reason(&r) }))
        }
        "message_stop" => Ok(None),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::Text(t) if t == "hi"));
    }

    #[test]
    fn parses_tool_use_start() {
        let line = r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"call_1","name":"lookup"}}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::ToolUseStart { id, .. } if id == "call_1"));
    }

    #[test]
    fn parses_message_delta_stop_reason() {
        let line = r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::Done { finish_reason: FinishReason::Stop }));
    }
}
