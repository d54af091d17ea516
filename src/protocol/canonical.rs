//! The canonical dialect (spec §3): the gateway's own request/response
//! schema, modeled on Anthropic's `/v1/messages`. Every inbound request is
//! parsed into [`CanonicalRequest`] and every outbound response is rendered
//! from [`CanonicalResponse`] or a stream of [`CanonicalStreamEvent`]s,
//! regardless of which provider actually served it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::GatewayError;

/// Message role in the canonical conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tagged content block (spec §3 `ContentBlock`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: serde_json::Value },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A message's content: a plain string (single text block, spec §6) or a
/// sequence of content blocks.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Blocks(SmallVec<[ContentBlock; 2]>),
}

impl MessageContent {
    /// Normalize into a flat sequence of content blocks.
    #[must_use]
    pub fn into_blocks(self) -> SmallVec<[ContentBlock; 2]> {
        match self {
            MessageContent::Text(text) => smallvec::smallvec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    #[must_use]
    pub fn as_blocks(&self) -> SmallVec<[ContentBlock; 2]> {
        match self {
            MessageContent::Text(text) => {
                smallvec::smallvec![ContentBlock::Text { text: text.clone() }]
            }
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Whitelisted pass-through parameters that may be carried on a request or
/// injected by a route override (spec §3, §4.4).
pub const PARAMETER_WHITELIST: &[&str] = &[
    "temperature",
    "top_p",
    "top_k",
    "max_tokens",
    "stop_sequences",
    "frequency_penalty",
    "presence_penalty",
];

/// The fully-decoded, provider-agnostic request (spec §3 `Canonical Request`).
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub request_id: uuid::Uuid,
    /// Raw `model` field as given by the client, before override parsing.
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub tools: Arc<[ToolSpec]>,
    pub max_tokens: u64,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub stop_sequences: Vec<String>,
    pub stream: bool,
    pub thinking: bool,
    /// Extra fields outside the whitelist, preserved verbatim for providers
    /// whose dialect accepts them (guarded by the whitelist at the router
    /// boundary, per spec §3).
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CanonicalRequest {
    /// Total textual length across system prompt and message text parts,
    /// used by the Token Counter (C1) as a cheap pre-check before running
    /// the BPE tokenizer, and by tests asserting "has any textual content".
    #[must_use]
    pub fn has_textual_content(&self) -> bool {
        if self.system.as_deref().is_some_and(|s| !s.is_empty()) {
            return true;
        }
        self.messages.iter().any(|m| match &m.content {
            MessageContent::Text(t) => !t.is_empty(),
            MessageContent::Blocks(blocks) => blocks.iter().any(|b| match b {
                ContentBlock::Text { text } => !text.is_empty(),
                ContentBlock::ToolResult { content, .. } => !content.is_empty(),
                _ => false,
            }),
        })
    }
}

/// The fully-decoded, provider-agnostic non-streaming response
/// (spec §3 `Canonical Response`).
#[derive(Debug, Clone)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// A single event in a canonical stream (spec §3 `Canonical Stream Event`).
/// Every variant that targets content carries the `index` into the content
/// array so that events for the same index stay strictly ordered.
#[derive(Debug, Clone)]
pub enum CanonicalStreamEvent {
    MessageStart { id: String, model: String },
    ContentBlockStart { index: usize, block: ContentBlockStart },
    ContentBlockDelta { index: usize, delta: ContentDelta },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: StopReason, usage: Usage },
    MessageStop,
    Ping,
    Error { status: u16, message: String },
}

#[derive(Debug, Clone)]
pub enum ContentBlockStart {
    Text,
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone)]
pub enum ContentDelta {
    TextDelta(String),
    InputJsonDelta(String),
}

/// Parse a client's raw JSON body into a [`CanonicalRequest`] (spec §4
/// "Wire protocol — canonical request"). Required: `model`, `messages`,
/// `max_tokens`.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if a required field is missing
/// or a present field has the wrong shape.
pub fn parse_request(body: &Value) -> Result<CanonicalRequest, GatewayError> {
    let model = body["model"]
        .as_str()
        .ok_or_else(|| GatewayError::InvalidRequest("missing required field 'model'".into()))?
        .to_string();
    let max_tokens = body["max_tokens"]
        .as_u64()
        .ok_or_else(|| GatewayError::InvalidRequest("missing required field 'max_tokens'".into()))?;
    let raw_messages = body["messages"]
        .as_array()
        .ok_or_else(|| GatewayError::InvalidRequest("missing required field 'messages'".into()))?;
    if raw_messages.is_empty() {
        return Err(GatewayError::InvalidRequest("'messages' must not be empty".into()));
    }
    let messages = raw_messages.iter().map(parse_message).collect::<Result<Vec<_>, _>>()?;

    let system = match &body["system"] {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text = blocks
                .iter()
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n");
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    };

    let thinking = match &body["thinking"] {
        Value::Bool(b) => *b,
        Value::Object(obj) => obj.get("type").and_then(Value::as_str) == Some("enabled"),
        _ => false,
    };

    let mut extra = Map::new();
    if let Some(tool_choice) = body.get("tool_choice") {
        if !tool_choice.is_null() {
            extra.insert("tool_choice".to_string(), tool_choice.clone());
        }
    }

    Ok(CanonicalRequest {
        request_id: uuid::Uuid::new_v4(),
        model,
        messages,
        system,
        tools: Arc::from(parse_tools(&body["tools"])?),
        max_tokens,
        temperature: body["temperature"].as_f64(),
        top_p: body["top_p"].as_f64(),
        top_k: body["top_k"].as_u64(),
        stop_sequences: body["stop_sequences"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        stream: body["stream"].as_bool().unwrap_or(false),
        thinking,
        extra,
    })
}

fn parse_message(value: &Value) -> Result<Message, GatewayError> {
    let role = match value["role"].as_str() {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some("system") => Role::System,
        Some("tool") => Role::Tool,
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid message role: {other:?}"
            )))
        }
    };
    let content = match &value["content"] {
        Value::String(s) => MessageContent::Text(s.clone()),
        Value::Array(_) => {
            let blocks: Vec<ContentBlock> = serde_json::from_value(value["content"].clone())
                .map_err(|e| GatewayError::InvalidRequest(format!("invalid content block: {e}")))?;
            MessageContent::Blocks(blocks.into())
        }
        _ => {
            return Err(GatewayError::InvalidRequest(
                "message 'content' must be a string or an array of content blocks".into(),
            ))
        }
    };
    Ok(Message { role, content })
}

fn parse_tools(value: &Value) -> Result<Vec<ToolSpec>, GatewayError> {
    let Some(array) = value.as_array() else {
        return Ok(Vec::new());
    };
    array
        .iter()
        .map(|tool| {
            let name = tool["name"]
                .as_str()
                .ok_or_else(|| GatewayError::InvalidRequest("tool is missing 'name'".into()))?
                .to_string();
            let description = tool["description"].as_str().map(str::to_string);
            let input_schema = tool.get("input_schema").cloned().unwrap_or_else(|| Value::Object(Map::new()));
            Ok(ToolSpec { name, description, input_schema })
        })
        .collect()
}
