use http::{header::CONTENT_TYPE, Method, Request, Response};
use relay_core::chat::{ChatMessage, ChatResponse, ChatRole, FinishReason, FunctionCall, MessageType, Tool, ToolCall};
use relay_core::error::GatewayError;
use relay_core::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sigv4::{self, SigV4Credentials};
use crate::Bedrock;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

#[derive(Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    messages: Vec<InvokeMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<InvokeTool<'a>>>,
}

#[derive(Serialize)]
struct InvokeMessage<'a> {
    role: &'a str,
    content: Vec<InvokeContent<'a>>,
}

#[derive(Serialize)]
struct InvokeContent<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
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

impl<'a> InvokeContent<'a> {
    fn text(text: &'a str) -> Self {
        InvokeContent {
            content_type: "text",
            text: Some(text),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            tool_result_id: None,
            tool_output: None,
        }
    }
}

#[derive(Serialize)]
struct InvokeTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

fn content_for(msg: &ChatMessage) -> Vec<InvokeContent<'_>> {
    match &msg.message_type {
        MessageType::ToolUse(calls) => {
            let mut parts = Vec::new();
            if !msg.content.is_empty() {
                parts.push(InvokeContent::text(&msg.content));
            }
            parts.extend(calls.iter().map(|c| InvokeContent {
                content_type: "tool_use",
                text: None,
                tool_use_id: Some(c.id.clone()),
                tool_name: Some(c.function.name.clone()),
                tool_input: Some(serde_json::from_str(&c.function.arguments).unwrap_or_else(|_| serde_json::json!({}))),
                tool_result_id: None,
                tool_output: None,
            }));
            parts
        }
        MessageType::ToolResult(results) => results
            .iter()
            .map(|r| InvokeContent {
                content_type: "tool_result",
                text: None,
                tool_use_id: None,
                tool_name: None,
                tool_input: None,
                tool_result_id: Some(r.id.clone()),
                tool_output: Some(r.function.arguments.clone()),
            })
            .collect(),
        // Image/PDF/URL attachments are out of scope for the Bedrock adaptor's
        // first cut; fall back to the message's text so the conversation
        // still round-trips.
        _ => vec![InvokeContent::text(&msg.content)],
    }
}

pub(crate) fn chat_request(bedrock: &Bedrock, messages: &[ChatMessage], tools: Option<&[Tool]>) -> Result<Request<Vec<u8>>, GatewayError> {
    if bedrock.access_key_id.is_empty() || bedrock.secret_access_key.is_empty() {
        return Err(GatewayError::Auth("missing AWS credentials for Bedrock".into()));
    }

    let invoke_messages = messages
        .iter()
        .map(|m| InvokeMessage {
            role: match m.role {
                ChatRole::User | ChatRole::Tool | ChatRole::System => "user",
                ChatRole::Assistant => "assistant",
            },
            content: content_for(m),
        })
        .collect();

    let tool_slice = tools.or(bedrock.tools.as_deref());
    let invoke_tools = tool_slice.map(|slice| {
        slice
            .iter()
            .map(|t| InvokeTool { name: &t.function.name, description: &t.function.description, input_schema: &t.function.parameters })
            .collect::<Vec<_>>()
    });

    let body = InvokeRequest {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens: bedrock.max_tokens,
        messages: invoke_messages,
        system: bedrock.system.as_deref(),
        temperature: bedrock.temperature,
        top_p: bedrock.top_p,
        tools: invoke_tools,
    };
    let json_body = serde_json::to_vec(&body)?;

    let host = format!("bedrock-runtime.{}.amazonaws.com", bedrock.region);
    let path = format!("/model/{}/invoke", bedrock.model_id);

    let creds = SigV4Credentials {
        access_key_id: bedrock.access_key_id.clone(),
        secret_access_key: bedrock.secret_access_key.clone(),
        session_token: bedrock.session_token.clone(),
        region: bedrock.region.clone(),
    };
    let signed = sigv4::sign(&creds, "POST", &host, &path, &json_body)?;

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("https://{host}{path}"))
        .header(CONTENT_TYPE, "application/json")
        .header("host", &host)
        .header("x-amz-date", &signed.x_amz_date)
        .header("authorization", &signed.authorization);
    if let Some(token) = &signed.x_amz_security_token {
        builder = builder.header("x-amz-security-token", token);
    }
    Ok(builder.body(json_body)?)
}

#[derive(Deserialize, Debug)]
pub(crate) struct InvokeResponse {
    content: Vec<ResponseContent>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(rename = "type")]
    content_type: Option<String>,
    text: Option<String>,
    name: Option<String>,
    input: Option<Value>,
    id: Option<String>,
}

impl ChatResponse for InvokeResponse {
    fn text(&self) -> Option<String> {
        Some(
            self.content
                .iter()
                .filter(|c| c.content_type.as_deref() == Some("text") || c.content_type.is_none())
                .filter_map(|c| c.text.clone())
                .collect::<Vec<_>>()
                .join("\n"),
        )
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
        self.stop_reason.as_deref().map(|r| match r {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        })
    }

    fn usage(&self) -> Option<Usage> {
        self.usage
    }
}

pub(crate) fn parse_chat(resp: Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
    check_status(&resp)?;
    let parsed: InvokeResponse = serde_json::from_slice(resp.body())?;
    Ok(Box::new(parsed))
}

fn check_status(resp: &Response<Vec<u8>>) -> Result<(), GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(resp.body()).to_string();
    match status.as_u16() {
        400 if body.contains("AccessDeniedException") => Err(GatewayError::ChannelFault(body)),
        401 | 403 => Err(GatewayError::ChannelFault(format!("bedrock auth rejected: {body}"))),
        429 => Err(GatewayError::UpstreamTransient(format!("bedrock throttled: {body}"))),
        500..=599 => Err(GatewayError::UpstreamTransient(format!("bedrock {status}: {body}"))),
        _ => Err(GatewayError::UpstreamPermanent(format!("bedrock {status}: {body}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_targets_invoke_path_and_signs() {
        let mut bedrock = Bedrock::new("AKIDEXAMPLE", "secret", "us-east-1", "anthropic.claude-3-sonnet-20240229-v1:0");
        bedrock.max_tokens = 512;
        let req = chat_request(&bedrock, &[ChatMessage::user("hi")], None).unwrap();
        assert_eq!(req.uri().path(), "/model/anthropic.claude-3-sonnet-20240229-v1:0/invoke");
        assert!(req.headers().get("authorization").unwrap().to_str().unwrap().starts_with("AWS4-HMAC-SHA256"));
    }
}
