//! Anthropic messages dialect (spec §6: `POST {base}/v1/messages`,
//! `anthropic-version: 2023-06-01`). Since the canonical dialect is itself
//! modeled on this wire format, encoding and decoding are close to the
//! identity transform — the `anthropic` built-in transformer (spec §4.3)
//! is largely a pass-through.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::canonical::{
    CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, ContentBlock, ContentBlockStart,
    ContentDelta, Message, MessageContent, Role, StopReason, Usage,
};
use crate::error::GatewayError;

#[must_use]
pub fn encode_request(req: &CanonicalRequest, model: &str) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(encode_message)
        .collect();

    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("max_tokens".into(), json!(req.max_tokens));
    body.insert("messages".into(), Value::Array(messages));
    body.insert("stream".into(), json!(req.stream));
    if let Some(system) = &req.system {
        body.insert("system".into(), json!(system));
    }
    if let Some(t) = req.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        body.insert("top_p".into(), json!(p));
    }
    if let Some(k) = req.top_k {
        body.insert("top_k".into(), json!(k));
    }
    if !req.stop_sequences.is_empty() {
        body.insert("stop_sequences".into(), json!(req.stop_sequences));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body.insert("tools".into(), json!(tools));
    }
    Value::Object(body)
}

fn encode_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let blocks: Vec<Value> = msg
        .content
        .as_blocks()
        .into_iter()
        .map(encode_block)
        .collect();
    json!({ "role": role, "content": blocks })
}

fn encode_block(block: ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { source } => json!({ "type": "image", "source": source }),
        ContentBlock::ToolUse { id, name, input } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        ContentBlock::ToolResult { tool_use_id, content } => {
            json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content })
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<BlockWire>,
    stop_reason: Option<String>,
    stop_sequence: Option<String>,
    usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockWire {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Deserialize, Default)]
struct UsageWire {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] if the body doesn't parse.
pub fn decode_response(body: &Value) -> Result<CanonicalResponse, GatewayError> {
    let parsed: MessagesResponse = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::BadProviderResponse(format!("anthropic response: {e}")))?;

    let content = parsed
        .content
        .into_iter()
        .map(|b| match b {
            BlockWire::Text { text } => ContentBlock::Text { text },
            BlockWire::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
        })
        .collect();

    let stop_reason = match parsed.stop_reason.as_deref() {
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = parsed.usage.unwrap_or_default();
    Ok(CanonicalResponse {
        id: parsed.id,
        model: parsed.model,
        content,
        stop_reason,
        stop_sequence: parsed.stop_sequence,
        usage: Usage {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
        },
    })
}

/// Anthropic stream events already carry the canonical shape almost
/// verbatim; this is the narrow JSON-field translation, not a semantic one.
#[derive(Debug, Default)]
pub struct StreamState {
    _private: (),
}

/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] on an unrecognized event.
pub fn decode_stream_event(
    event_type: &str,
    data: &Value,
    state: &mut StreamState,
) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
    let mut out = Vec::new();
    match event_type {
        "message_start" => {
            let id = data["message"]["id"].as_str().unwrap_or_default().to_string();
            let model = data["message"]["model"].as_str().unwrap_or_default().to_string();
            out.push(CanonicalStreamEvent::MessageStart { id, model });
        }
        "content_block_start" => {
            let index = data["index"].as_u64().unwrap_or(0) as usize;
            let block = &data["content_block"];
            let is_tool = block["type"] == "tool_use";
            let start = if is_tool {
                ContentBlockStart::ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                }
            } else {
                ContentBlockStart::Text
            };
            out.push(CanonicalStreamEvent::ContentBlockStart { index, block: start });
        }
        "content_block_delta" => {
            let index = data["index"].as_u64().unwrap_or(0) as usize;
            let delta = &data["delta"];
            let canonical_delta = match delta["type"].as_str() {
                Some("input_json_delta") => ContentDelta::InputJsonDelta(
                    delta["partial_json"].as_str().unwrap_or_default().to_string(),
                ),
                _ => ContentDelta::TextDelta(delta["text"].as_str().unwrap_or_default().to_string()),
            };
            out.push(CanonicalStreamEvent::ContentBlockDelta { index, delta: canonical_delta });
        }
        "content_block_stop" => {
            let index = data["index"].as_u64().unwrap_or(0) as usize;
            out.push(CanonicalStreamEvent::ContentBlockStop { index });
        }
        "message_delta" => {
            let stop_reason = match data["delta"]["stop_reason"].as_str() {
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                Some("tool_use") => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            let usage = Usage {
                input_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0),
                output_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0),
            };
            out.push(CanonicalStreamEvent::MessageDelta { stop_reason, usage });
        }
        "message_stop" => out.push(CanonicalStreamEvent::MessageStop),
        "ping" => out.push(CanonicalStreamEvent::Ping),
        "error" => {
            out.push(CanonicalStreamEvent::Error {
                status: 502,
                message: data["error"]["message"].as_str().unwrap_or("upstream error").to_string(),
            });
        }
        other => {
            return Err(GatewayError::BadProviderResponse(format!(
                "unrecognized anthropic stream event: {other}"
            )))
        }
    }
    Ok(out)
}
