//! Canonical chat request/response vocabulary shared by every provider adaptor.
//!
//! These types are the "canonical request" and "canonical response" referred
//! to throughout spec.md §4.5 — each adaptor converts between this shape and
//! its provider's wire format.

use crate::error::GatewayError;
use async_trait::async_trait;
use futures::Stream;
use schemars::JsonSchema;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ImageMime {
    JPEG,
    PNG,
    GIF,
    WEBP,
}

impl ImageMime {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageMime::JPEG => "image/jpeg",
            ImageMime::PNG => "image/png",
            ImageMime::GIF => "image/gif",
            ImageMime::WEBP => "image/webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    Text,
    Image((ImageMime, Vec<u8>)),
    Pdf(Vec<u8>),
    ImageURL(String),
    ToolUse(Vec<ToolCall>),
    ToolResult(Vec<ToolCall>),
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub message_type: MessageType,
    pub content: String,
    /// Tool-result linkage: the id of the tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            message_type: MessageType::Text,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            message_type: MessageType::Text,
            content: content.into(),
            tool_call_id: None,
        }
    }
}

/// Tool call as reported by or sent to an upstream provider.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub property_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterProperty>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "enum")]
    pub enum_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParametersSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: HashMap<String, ParameterProperty>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool the model may call. `name` must match an entry in the channel's
/// tooling whitelist (when non-empty) for the request to pass SELECT.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionTool,
}

impl Tool {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// How the model should use the available tools. Standardized across
/// providers; each adaptor renders it into its own wire shape.
#[derive(Debug, Clone, Default)]
pub enum ToolChoice {
    Any,
    #[default]
    Auto,
    Tool(String),
    None,
}

impl Serialize for ToolChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ToolChoice::Any => serializer.serialize_str("required"),
            ToolChoice::Auto => serializer.serialize_str("auto"),
            ToolChoice::None => serializer.serialize_str("none"),
            ToolChoice::Tool(name) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "function")?;
                let mut function_obj = HashMap::new();
                function_obj.insert("name", name.as_str());
                map.serialize_entry("function", &function_obj)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ToolChoice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ToolChoiceVisitor;

        impl<'de> Visitor<'de> for ToolChoiceVisitor {
            type Value = ToolChoice;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string (`required`, `auto`, `none`) or a function object")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match value {
                    "required" => Ok(ToolChoice::Any),
                    "auto" => Ok(ToolChoice::Auto),
                    "none" => Ok(ToolChoice::None),
                    other => Err(de::Error::unknown_variant(other, &["required", "auto", "none"])),
                }
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut seen_name: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "function" => {
                            let func_map: serde_json::Map<String, Value> = map.next_value()?;
                            if let Some(Value::String(name)) = func_map.get("name") {
                                seen_name = Some(name.clone());
                            }
                        }
                        _ => {
                            let _ignored: Value = map.next_value()?;
                        }
                    }
                }
                seen_name
                    .map(ToolChoice::Tool)
                    .ok_or_else(|| de::Error::missing_field("function"))
            }
        }

        deserializer.deserialize_any(ToolChoiceVisitor)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

/// One incremental event from a provider's streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    Text(String),
    ToolUseStart { index: usize, id: String, name: String },
    ToolUseInputDelta { index: usize, partial_json: String },
    ToolUseComplete { index: usize, tool_call: ToolCall },
    /// Usage accounting emitted inline by providers that report it mid-stream
    /// (rather than only in a final frame).
    Usage(crate::usage::Usage),
    Done { finish_reason: FinishReason },
}

/// A parsed, non-streaming response from a provider adaptor.
pub trait ChatResponse: std::fmt::Debug + Send {
    fn text(&self) -> Option<String>;
    fn tool_calls(&self) -> Option<Vec<ToolCall>>;
    fn finish_reason(&self) -> Option<FinishReason>;
    fn usage(&self) -> Option<crate::usage::Usage>;
}

/// Unified per-provider chat capability, implemented by
/// [`crate::adapter::LLMProviderFromHTTP`] for every adaptor in the matrix
/// (spec §4.5). The orchestrator only ever talks to this trait object.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<Box<dyn ChatResponse>, GatewayError> {
        self.chat_with_tools(messages, None).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Box<dyn ChatResponse>, GatewayError>;

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>, GatewayError> {
        self.chat_stream_with_tools(messages, None).await
    }

    async fn chat_stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>, GatewayError> {
        let _ = (messages, tools);
        Err(GatewayError::Internal("streaming not supported by this adaptor".into()))
    }
}

/// Sync, wire-format half of an adaptor (spec §4.5): builds the outbound
/// `http::Request` and parses the raw response bytes. Kept deliberately free
/// of async so adaptors can be written and unit-tested without a runtime.
pub trait HTTPChatProvider: Send + Sync {
    fn chat_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
    ) -> Result<http::Request<Vec<u8>>, GatewayError>;

    fn parse_chat(&self, resp: http::Response<Vec<u8>>) -> Result<Box<dyn ChatResponse>, GatewayError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    fn parse_stream_line(&self, _line: &str) -> Result<Option<StreamChunk>, GatewayError> {
        Ok(None)
    }
}

impl From<&dyn ChatResponse> for ChatMessage {
    fn from(response: &dyn ChatResponse) -> Self {
        let content = response.text().unwrap_or_default();
        let message_type = match response.tool_calls() {
            Some(calls) if !calls.is_empty() => MessageType::ToolUse(calls),
            _ => MessageType::Text,
        };
        ChatMessage {
            role: ChatRole::Assistant,
            message_type,
            content,
            tool_call_id: None,
        }
    }
}
