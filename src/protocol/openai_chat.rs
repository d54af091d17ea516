//! OpenAI chat-completions dialect (spec §6: `POST {base}/chat/completions`).
//!
//! `deepseek` and `openrouter` are OpenAI-dialect subsets/pass-throughs
//! (spec §4.3); their transformers in [`crate::transform::builtins`] reuse
//! these functions directly rather than duplicating the wire shape.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::canonical::{
    CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, ContentBlock, ContentBlockStart,
    ContentDelta, Message, MessageContent, Role, StopReason, Usage,
};
use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Request encoding
// ---------------------------------------------------------------------------

/// Encode a canonical request into an OpenAI chat-completions body.
///
/// Adjacent text blocks within one message are merged into a single
/// `content` string (spec §4.3 `openai` transformer). `tool_use` /
/// `tool_result` blocks become `tool_calls` / `role: "tool"` messages.
#[must_use]
pub fn encode_request(req: &CanonicalRequest, model: &str) -> Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for msg in &req.messages {
        encode_message(msg, &mut messages);
    }

    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("messages".into(), Value::Array(messages));
    body.insert("max_tokens".into(), json!(req.max_tokens));
    body.insert("stream".into(), json!(req.stream));

    if let Some(t) = req.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        body.insert("top_p".into(), json!(p));
    }
    if !req.stop_sequences.is_empty() {
        body.insert("stop".into(), json!(req.stop_sequences));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body.insert("tools".into(), json!(tools));
    }

    Value::Object(body)
}

fn encode_message(msg: &Message, out: &mut Vec<Value>) {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let blocks = msg.content.as_blocks();

    // role=tool messages: one OpenAI message per tool_result block, keyed by tool_call_id.
    if msg.role == Role::Tool {
        for block in &blocks {
            if let ContentBlock::ToolResult { tool_use_id, content } = block {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
        }
        return;
    }

    let mut merged_text = String::new();
    let mut tool_calls = Vec::new();
    for block in &blocks {
        match block {
            ContentBlock::Text { text } => {
                if !merged_text.is_empty() {
                    merged_text.push('\n');
                }
                merged_text.push_str(text);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(input).unwrap_or_default(),
                    }
                }));
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
            ContentBlock::Image { source } => {
                out.push(json!({
                    "role": role,
                    "content": [{ "type": "image_url", "image_url": source }],
                }));
            }
        }
    }

    if !merged_text.is_empty() || tool_calls.is_empty() {
        let mut m = Map::new();
        m.insert("role".into(), json!(role));
        m.insert("content".into(), json!(merged_text));
        if !tool_calls.is_empty() {
            m.insert("tool_calls".into(), json!(tool_calls));
        }
        out.push(Value::Object(m));
    } else if !tool_calls.is_empty() {
        out.push(json!({
            "role": role,
            "content": Value::Null,
            "tool_calls": tool_calls,
        }));
    }
}

// ---------------------------------------------------------------------------
// Non-streaming response decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallWire>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallWire {
    id: String,
    function: FunctionCallWire,
}

#[derive(Debug, Deserialize)]
struct FunctionCallWire {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Default)]
struct UsageWire {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

/// Decode an OpenAI chat-completions response body into the canonical shape
/// (spec §4.3 tool-call translation contract).
///
/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] if the body doesn't parse,
/// or if a tool call's `arguments` is non-empty but not valid JSON.
pub fn decode_response(body: &Value) -> Result<CanonicalResponse, GatewayError> {
    let parsed: ChatCompletion = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::BadProviderResponse(format!("openai response: {e}")))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::BadProviderResponse("no choices in response".into()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(ContentBlock::Text { text });
    }

    let mut saw_tool_use = false;
    if let Some(tool_calls) = choice.message.tool_calls {
        for call in tool_calls {
            saw_tool_use = true;
            let input = parse_tool_arguments(&call.function.arguments)?;
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") => StopReason::StopSequence,
        _ if saw_tool_use => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = parsed.usage.unwrap_or_default();
    Ok(CanonicalResponse {
        id: parsed.id.unwrap_or_default(),
        model: parsed.model.unwrap_or_default(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
        },
    })
}

/// Parse a tool call's serialized `arguments` string into JSON.
///
/// Per spec §4.3: an empty or structurally-empty string decodes to `{}`; a
/// non-empty string that fails to parse is a dialect violation.
fn parse_tool_arguments(arguments: &str) -> Result<Value, GatewayError> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| GatewayError::BadProviderResponse(format!("invalid tool arguments: {e}")))
}

// ---------------------------------------------------------------------------
// Streaming response decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
    usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDeltaWire>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDeltaWire {
    index: u32,
    id: Option<String>,
    function: Option<FunctionDeltaWire>,
}

#[derive(Debug, Deserialize, Default)]
struct FunctionDeltaWire {
    name: Option<String>,
    arguments: Option<String>,
}

/// Per-stream mutable state for translating OpenAI chunks into canonical
/// events. One instance lives for the duration of a single streaming
/// response (owned by the Streaming Relay, spec §4.6).
#[derive(Debug, Default)]
pub struct StreamState {
    text_index: Option<usize>,
    reasoning_index: Option<usize>,
    tool_index_of: FxHashMap<u32, usize>,
    tool_args: FxHashMap<usize, String>,
    next_index: usize,
    /// Whether surfacing `delta.reasoning_content` as a distinct text block
    /// is enabled. Only the `deepseek` transformer turns this on (spec §9).
    pub surface_reasoning: bool,
}

impl StreamState {
    #[must_use]
    pub fn new(surface_reasoning: bool) -> Self {
        Self {
            surface_reasoning,
            ..Default::default()
        }
    }

    fn alloc_index(&mut self) -> usize {
        let i = self.next_index;
        self.next_index += 1;
        i
    }
}

/// Decode one OpenAI SSE `data:` JSON payload into zero or more canonical
/// stream events, using and mutating `state` across the whole stream.
///
/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] if the chunk body fails to
/// parse as a chat-completion chunk.
pub fn decode_stream_event(
    data: &Value,
    state: &mut StreamState,
) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
    let chunk: ChatCompletionChunk = serde_json::from_value(data.clone())
        .map_err(|e| GatewayError::BadProviderResponse(format!("openai chunk: {e}")))?;

    let mut out = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        if let Some(usage) = chunk.usage {
            out.push(CanonicalStreamEvent::MessageDelta {
                stop_reason: StopReason::EndTurn,
                usage: Usage {
                    input_tokens: usage.prompt_tokens.unwrap_or(0),
                    output_tokens: usage.completion_tokens.unwrap_or(0),
                },
            });
        }
        return Ok(out);
    };

    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
        let index = if let Some(existing) = state.text_index {
            existing
        } else {
            let i = state.alloc_index();
            state.text_index = Some(i);
            out.push(CanonicalStreamEvent::ContentBlockStart {
                index: i,
                block: ContentBlockStart::Text,
            });
            i
        };
        out.push(CanonicalStreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta(text),
        });
    }

    if state.surface_reasoning {
        if let Some(reasoning) = choice.delta.reasoning_content.filter(|t| !t.is_empty()) {
            let index = if let Some(existing) = state.reasoning_index {
                existing
            } else {
                let i = state.alloc_index();
                state.reasoning_index = Some(i);
                out.push(CanonicalStreamEvent::ContentBlockStart {
                    index: i,
                    block: ContentBlockStart::Text,
                });
                i
            };
            out.push(CanonicalStreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta(reasoning),
            });
        }
    }

    if let Some(tool_calls) = choice.delta.tool_calls {
        for call in tool_calls {
            let is_new = !state.tool_index_of.contains_key(&call.index);
            let index = if let Some(existing) = state.tool_index_of.get(&call.index) {
                *existing
            } else {
                let i = state.alloc_index();
                state.tool_index_of.insert(call.index, i);
                i
            };
            if is_new {
                let id = call.id.clone().unwrap_or_default();
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                out.push(CanonicalStreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlockStart::ToolUse { id, name },
                });
                state.tool_args.entry(index).or_default();
            }
            if let Some(fragment) = call.function.and_then(|f| f.arguments) {
                state.tool_args.entry(index).or_default().push_str(&fragment);
                out.push(CanonicalStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta(fragment),
                });
            }
        }
    }

    if let Some(reason) = choice.finish_reason.as_deref() {
        // Close every open content block before the final message_delta, in
        // content-block index order so sibling blocks never interleave.
        let mut open_indices: Vec<usize> = state.tool_args.keys().copied().collect();
        if let Some(i) = state.text_index {
            open_indices.push(i);
        }
        if let Some(i) = state.reasoning_index {
            open_indices.push(i);
        }
        open_indices.sort_unstable();
        open_indices.dedup();
        for index in open_indices {
            if let Some(buffered) = state.tool_args.get(&index) {
                if serde_json::from_str::<Value>(buffered).is_err() {
                    return Err(GatewayError::BadProviderResponse(format!(
                        "tool call at index {index} did not accumulate to valid JSON"
                    )));
                }
            }
            out.push(CanonicalStreamEvent::ContentBlockStop { index });
        }

        let stop_reason = match reason {
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        let usage = chunk.usage.unwrap_or_default();
        out.push(CanonicalStreamEvent::MessageDelta {
            stop_reason,
            usage: Usage {
                input_tokens: usage.prompt_tokens.unwrap_or(0),
                output_tokens: usage.completion_tokens.unwrap_or(0),
            },
        });
    }

    Ok(out)
}
