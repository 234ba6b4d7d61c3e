//! OpenAI-compatible wire shapes for the public routes. Decoding is
//! deliberately permissive (unknown fields ignored) and encoding only emits
//! what the OpenAI clients in the wild actually read.

use relay_core::chat::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, MessageType, StreamChunk, Tool, ToolCall, ToolChoice,
};
use relay_core::completion::CompletionResponse;
use relay_core::embedding::EmbeddingResponse;
use relay_core::usage::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl From<IncomingMessage> for ChatMessage {
    fn from(m: IncomingMessage) -> Self {
        let role = match m.role.as_str() {
            "system" => ChatRole::System,
            "assistant" => ChatRole::Assistant,
            "tool" => ChatRole::Tool,
            _ => ChatRole::User,
        };
        ChatMessage { role, message_type: MessageType::Text, content: m.content, tool_call_id: m.tool_call_id }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct UsageDto {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<Usage> for UsageDto {
    fn from(u: Usage) -> Self {
        UsageDto { prompt_tokens: u.input_tokens, completion_tokens: u.output_tokens, total_tokens: u.total_tokens() }
    }
}

pub fn finish_reason_str(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "length",
        Some(FinishReason::ContentFilter) => "content_filter",
        Some(FinishReason::ToolCalls) => "tool_calls",
        Some(FinishReason::Stop) | Some(FinishReason::Error) | Some(FinishReason::Other) | None => "stop",
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: UsageDto,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: OutgoingMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OutgoingMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatCompletionResponse {
    pub fn from_provider(request_id: String, created: i64, model: String, response: &dyn ChatResponse) -> Self {
        let tool_calls = response.tool_calls();
        ChatCompletionResponse {
            id: request_id,
            object: "chat.completion",
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: OutgoingMessage { role: "assistant", content: response.text(), tool_calls },
                finish_reason: finish_reason_str(response.finish_reason()),
            }],
            usage: response.usage().unwrap_or_default().into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Serialize)]
pub struct DeltaToolCall {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<DeltaFunctionCall>,
}

#[derive(Debug, Serialize)]
pub struct DeltaFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

/// One `StreamChunk` rarely maps to exactly one SSE frame (a `Usage` chunk
/// never reaches the wire, `ToolUseComplete` is a no-op since the deltas
/// already carried the payload); this returns zero or one rendered chunk.
pub fn render_chunk(id: &str, created: i64, model: &str, chunk: &StreamChunk) -> Option<ChatCompletionChunk> {
    let choice = match chunk {
        StreamChunk::Text(text) => {
            ChunkChoice { index: 0, delta: ChunkDelta { content: Some(text.clone()), ..Default::default() }, finish_reason: None }
        }
        StreamChunk::ToolUseStart { index, id: call_id, name } => ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                tool_calls: Some(vec![DeltaToolCall {
                    index: *index as u32,
                    id: Some(call_id.clone()),
                    function: Some(DeltaFunctionCall { name: Some(name.clone()), arguments: String::new() }),
                }]),
                ..Default::default()
            },
            finish_reason: None,
        },
        StreamChunk::ToolUseInputDelta { index, partial_json } => ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                tool_calls: Some(vec![DeltaToolCall {
                    index: *index as u32,
                    id: None,
                    function: Some(DeltaFunctionCall { name: None, arguments: partial_json.clone() }),
                }]),
                ..Default::default()
            },
            finish_reason: None,
        },
        StreamChunk::ToolUseComplete { .. } | StreamChunk::Usage(_) => return None,
        StreamChunk::Done { finish_reason } => {
            ChunkChoice { index: 0, delta: ChunkDelta::default(), finish_reason: Some(finish_reason_str(Some(*finish_reason))) }
        }
    };

    Some(ChatCompletionChunk { id: id.to_string(), object: "chat.completion.chunk", created, model: model.to_string(), choices: vec![choice] })
}

#[derive(Debug, Deserialize)]
pub struct LegacyCompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct LegacyCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<LegacyChoice>,
    pub usage: UsageDto,
}

#[derive(Debug, Serialize)]
pub struct LegacyChoice {
    pub index: u32,
    pub text: String,
    pub finish_reason: &'static str,
}

impl LegacyCompletionResponse {
    pub fn from_provider(request_id: String, created: i64, model: String, response: &CompletionResponse) -> Self {
        LegacyCompletionResponse {
            id: request_id,
            object: "text_completion",
            created,
            model,
            choices: vec![LegacyChoice {
                index: 0,
                text: response.text().unwrap_or_default(),
                finish_reason: finish_reason_str(response.finish_reason()),
            }],
            usage: response.usage().unwrap_or_default().into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: EmbeddingInput,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(v) => v,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: UsageDto,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingData {
    pub object: &'static str,
    pub index: usize,
    pub embedding: Vec<f32>,
}

impl EmbeddingsResponse {
    pub fn from_provider(model: String, response: EmbeddingResponse) -> Self {
        let usage = response.usage.unwrap_or_default().into();
        let data = response
            .vectors
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| EmbeddingData { object: "embedding", index, embedding })
            .collect();
        EmbeddingsResponse { object: "list", data, model, usage }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::chat::{FunctionCall, ToolCall};

    #[test]
    fn incoming_message_defaults_unknown_role_to_user() {
        let msg = IncomingMessage { role: "narrator".into(), content: "hi".into(), tool_call_id: None };
        let chat: ChatMessage = msg.into();
        assert_eq!(chat.role, ChatRole::User);
        assert_eq!(chat.content, "hi");
    }

    #[test]
    fn incoming_message_maps_known_roles() {
        for (wire, role) in [("system", ChatRole::System), ("assistant", ChatRole::Assistant), ("tool", ChatRole::Tool)] {
            let msg = IncomingMessage { role: wire.into(), content: String::new(), tool_call_id: None };
            let chat: ChatMessage = msg.into();
            assert_eq!(chat.role, role);
        }
    }

    #[test]
    fn finish_reason_str_maps_to_openai_vocabulary() {
        assert_eq!(finish_reason_str(Some(FinishReason::Length)), "length");
        assert_eq!(finish_reason_str(Some(FinishReason::ContentFilter)), "content_filter");
        assert_eq!(finish_reason_str(Some(FinishReason::ToolCalls)), "tool_calls");
        assert_eq!(finish_reason_str(Some(FinishReason::Stop)), "stop");
        assert_eq!(finish_reason_str(None), "stop");
    }

    #[test]
    fn embedding_input_normalizes_single_string_to_one_element_vec() {
        let input: EmbeddingInput = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(input.into_vec(), vec!["hello".to_string()]);

        let input: EmbeddingInput = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(input.into_vec(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn render_chunk_skips_usage_and_tool_complete_frames() {
        let usage_chunk = StreamChunk::Usage(Usage::default());
        assert!(render_chunk("id", 0, "model", &usage_chunk).is_none());

        let complete = StreamChunk::ToolUseComplete {
            index: 0,
            tool_call: ToolCall {
                id: "call_1".into(),
                call_type: "function".into(),
                function: FunctionCall { name: "lookup".into(), arguments: "{}".into() },
            },
        };
        assert!(render_chunk("id", 0, "model", &complete).is_none());
    }

    #[test]
    fn render_chunk_done_carries_finish_reason() {
        let chunk = StreamChunk::Done { finish_reason: FinishReason::ToolCalls };
        let rendered = render_chunk("id", 0, "model", &chunk).unwrap();
        assert_eq!(rendered.choices[0].finish_reason, Some("tool_calls"));
    }
}
