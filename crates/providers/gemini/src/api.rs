use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http::{header::CONTENT_TYPE, Method, Request, Response};
use relay_core::chat::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, FunctionCall, MessageType, StreamChunk,
    Tool, ToolCall,
};
use relay_core::embedding::EmbeddingResponse;
use relay_core::error::GatewayError;
use relay_core::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Gemini;

#[derive(Serialize)]
struct GenChatRequest<'a> {
    contents: Vec<GenContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GenTool>>,
}

#[derive(Serialize)]
struct GenContent<'a> {
    role: &'a str,
    parts: Vec<GenPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum GenPart<'a> {
    #[serde(rename = "text")]
    Text(&'a str),
    InlineData(GenInlineData),
    FunctionCall(GenFunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(GenFunctionResponse),
}

#[derive(Serialize)]
struct GenInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topK")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct GenTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GenFunctionDeclaration>,
}

#[derive(Serialize)]
struct GenFunctionDeclaration {
    name: String,
    description: String,
    parameters: GenFunctionParameters,
}

impl From<&Tool> for GenFunctionDeclaration {
    fn from(tool: &Tool) -> Self {
        GenFunctionDeclaration {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: GenFunctionParameters {
                schema_type: "object".into(),
                parameters: tool.function.parameters.clone(),
            },
        }
    }
}

#[derive(Serialize)]
struct GenFunctionParameters {
    #[serde(rename = "type")]
    schema_type: String,
    #[serde(flatten)]
    parameters: Value,
}

#[derive(Serialize, Deserialize, Debug)]
struct GenFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize, Debug)]
struct GenFunctionResponse {
    name: String,
    response: GenFunctionResponseContent,
}

#[derive(Serialize, Deserialize, Debug)]
struct GenFunctionResponseContent {
    name: String,
    content: Value,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct GenChatResponse {
    #[serde(default)]
    candidates: Vec<GenCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct GenCandidate {
    content: GenResponseContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct GenResponseContent {
    #[serde(default)]
    parts: Vec<GenResponsePart>,
}

#[derive(Deserialize, Debug)]
struct GenResponsePart {
    #[serde(default)]
    text: String,
    #[serde(rename = "functionCall")]
    function_call: Option<GenFunctionCall>,
}

impl GenChatResponse {
    fn to_tool_calls(&self) -> Option<Vec<ToolCall>> {
        let calls: Vec<ToolCall> = self
            .candidates
            .first()?
            .content
            .parts
            .iter()
            .filter_map(|part| {
                part.function_call.as_ref().map(|f| ToolCall {
                    id: format!("call_{}", f.name),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: f.name.clone(),
                        arguments: serde_json::to_string(&f.args).unwrap_or_default(),
                    },
                })
            })
            .collect();
        if calls.is_empty() {
            None
        } else {
            Some(calls)
        }
    }

    fn map_finish_reason(&self) -> Option<FinishReason> {
        let raw = self.candidates.first()?.finish_reason.as_deref()?;
        Some(match raw {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => FinishReason::ContentFilter,
            _ if self.to_tool_calls().is_some() => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        })
    }
}

impl ChatResponse for GenChatResponse {
    fn text(&self) -> Option<String> {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
    }

    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        self.to_tool_calls()
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.map_finish_reason()
    }

    fn usage(&self) -> Option<Usage> {
        self.usage_metadata
    }
}

fn role_for(msg: &ChatMessage) -> &'static str {
    match &msg.message_type {
        MessageType::ToolResult(_) => "function",
        _ => match msg.role {
            ChatRole::User | ChatRole::System | ChatRole::Tool => "user",
            ChatRole::Assistant => "model",
        },
    }
}

fn parts_for(msg: &ChatMessage) -> Vec<GenPart<'_>> {
    match &msg.message_type {
        MessageType::Text => vec![GenPart::Text(&msg.content)],
        MessageType::Image((mime, bytes)) => vec![GenPart::InlineData(GenInlineData {
            mime_type: mime.mime_type().to_string(),
            data: BASE64.encode(bytes),
        })],
        MessageType::ImageURL(_) => vec![GenPart::Text(&msg.content)],
        MessageType::Pdf(bytes) => vec![GenPart::InlineData(GenInlineData {
            mime_type: "application/pdf".into(),
            data: BASE64.encode(bytes),
        })],
        MessageType::ToolUse(calls) => calls
            .iter()
            .map(|call| {
                GenPart::FunctionCall(GenFunctionCall {
                    name: call.function.name.clone(),
                    args: serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null),
                })
            })
            .collect(),
        MessageType::ToolResult(results) => results
            .iter()
            .map(|result| {
                let content = serde_json::from_str(&result.function.arguments).unwrap_or(Value::Null);
                GenPart::FunctionResponse(GenFunctionResponse {
                    name: result.function.name.clone(),
                    response: GenFunctionResponseContent {
                        name: result.function.name.clone(),
                        content,
                    },
                })
            })
            .collect(),
    }
}

fn endpoint(gemini: &Gemini, verb: &str) -> Result<url::Url, GatewayError> {
    let mut url = gemini
        .base_url
        .join(&format!("{}:{verb}", gemini.model))?;
    url.set_query(Some(&format!("key={}", gemini.api_key)));
    Ok(url)
}

pub(crate) fn chat_request(
    gemini: &Gemini,
    messages: &[ChatMessage],
    tools: Option<&[Tool]>,
) -> Result<Request<Vec<u8>>, GatewayError> {
    if gemini.api_key.is_empty() {
        return Err(GatewayError::Auth("missing Gemini API key".into()));
    }

    let contents = messages.iter().map(|m| GenContent { role: role_for(m), parts: parts_for(m) }).collect();
    let generation_config = Some(GenerationConfig {
        max_output_tokens: gemini.max_tokens,
        temperature: gemini.temperature,
        top_p: gemini.top_p,
        top_k: gemini.top_k,
    });
    let gen_tools = tools.map(|t| {
        vec![GenTool {
            function_declarations: t.iter().map(GenFunctionDeclaration::from).collect(),
        }]
    });

    let body = GenChatRequest { contents, generation_config, tools: gen_tools };
    let json_body = serde_json::to_vec(&body)?;

    let verb = if gemini.stream { "streamGenerateContent" } else { "generateContent" };
    let mut url = endpoint(gemini, verb)?;
    if gemini.stream {
        let query = format!("{}&alt=sse", url.query().unwrap_or_default());
        url.set_query(Some(&query));
    }

    Ok(Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .body(json_body)?)
}

pub(crate) fn parse_chat(resp: Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError> {
    check_status(&resp)?;
    let parsed: GenChatResponse = serde_json::from_slice(resp.body())?;
    Ok(Box::new(parsed))
}

fn check_status(resp: &Response<Vec<u8>>) -> Result<(), GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(resp.body()).to_string();
    match status.as_u16() {
        401 | 403 => Err(GatewayError::ChannelFault(format!("gemini auth rejected: {body}"))),
        429 => Err(GatewayError::UpstreamTransient(format!("gemini rate limited: {body}"))),
        500..=599 => Err(GatewayError::UpstreamTransient(format!("gemini {status}: {body}"))),
        _ => Err(GatewayError::UpstreamPermanent(format!("gemini {status}: {body}"))),
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<GenPart<'a>>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

const EMBEDDING_MODEL: &str = "text-embedding-004";

pub(crate) fn embed_request(gemini: &Gemini, inputs: &[String]) -> Result<Request<Vec<u8>>, GatewayError> {
    if gemini.api_key.is_empty() {
        return Err(GatewayError::Auth("missing Gemini API key".into()));
    }
    if inputs.len() != 1 {
        return Err(GatewayError::Internal(
            "gemini embedContent accepts exactly one input per request".into(),
        ));
    }

    let body = EmbedRequest {
        model: &format!("models/{EMBEDDING_MODEL}"),
        content: EmbedContent { parts: vec![GenPart::Text(&inputs[0])] },
    };
    let json_body = serde_json::to_vec(&body)?;

    let mut url = gemini.base_url.join(&format!("{EMBEDDING_MODEL}:embedContent"))?;
    url.set_query(Some(&format!("key={}", gemini.api_key)));

    Ok(Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .body(json_body)?)
}

pub(crate) fn parse_embed(resp: Response<Vec<u8>>) -> Result<EmbeddingResponse, GatewayError> {
    check_status(&resp)?;
    let parsed: EmbedResponse = serde_json::from_slice(resp.body())?;
    Ok(EmbeddingResponse { vectors: vec![parsed.embedding.values], usage: None })
}

#[derive(Deserialize)]
struct GenStreamChunk {
    #[serde(default)]
    candidates: Vec<GenStreamCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<Usage>,
}

#[derive(Deserialize)]
struct GenStreamCandidate {
    content: GenResponseContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

/// Parses one `data: {...}` SSE line from `streamGenerateContent?alt=sse`.
/// Each frame is a complete JSON object carrying whatever text/tool-call
/// delta and (on the final frame) `usageMetadata` the model has produced so
/// far; unlike OpenAI's chunk stream there is no separate `[DONE]` sentinel,
/// so completion is inferred from `finishReason` being present.
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<StreamChunk>, GatewayError> {
    let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let chunk: GenStreamChunk = serde_json::from_str(data)?;

    if let Some(usage) = chunk.usage_metadata {
        if chunk.candidates.iter().any(|c| c.finish_reason.is_some()) {
            return Ok(Some(StreamChunk::Usage(usage)));
        }
    }

    let Some(candidate) = chunk.candidates.first() else {
        return Ok(None);
    };

    if let Some(raw) = &candidate.finish_reason {
        let finish_reason = match raw.as_str() {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        };
        return Ok(Some(StreamChunk::Done { finish_reason }));
    }

    let text: String = candidate.content.parts.iter().map(|p| p.text.as_str()).collect();
    if !text.is_empty() {
        return Ok(Some(StreamChunk::Text(text)));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_delta() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        matches!(chunk, StreamChunk::Text(t) if t == "hi");
    }

    #[test]
    fn parses_finish_reason() {
        let line = r#"data: {"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#;
        let chunk = parse_sse_line(line).unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::Done { finish_reason: FinishReason::Stop }));
    }

    #[test]
    fn ignores_blank_lines() {
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
    }
}
