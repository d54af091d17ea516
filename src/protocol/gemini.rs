//! Google Generative Language dialect (spec §6: `:generateContent` /
//! `:streamGenerateContent`). Generation parameters are wrapped in
//! `generationConfig`; `max_tokens` maps to `maxOutputTokens` (spec §4.3).

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::canonical::{
    CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, ContentBlock, ContentBlockStart,
    ContentDelta, Message, MessageContent, Role, StopReason, Usage,
};
use crate::error::GatewayError;

#[must_use]
pub fn encode_request(req: &CanonicalRequest) -> Value {
    let contents: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(encode_message)
        .collect();

    let mut generation_config = Map::new();
    generation_config.insert("maxOutputTokens".into(), json!(req.max_tokens));
    if let Some(t) = req.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        generation_config.insert("topP".into(), json!(p));
    }
    if let Some(k) = req.top_k {
        generation_config.insert("topK".into(), json!(k));
    }
    if !req.stop_sequences.is_empty() {
        generation_config.insert("stopSequences".into(), json!(req.stop_sequences));
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    body.insert("generationConfig".into(), Value::Object(generation_config));
    if let Some(system) = &req.system {
        body.insert(
            "systemInstruction".into(),
            json!({ "parts": [{ "text": system }] }),
        );
    }
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body.insert("tools".into(), json!([{ "functionDeclarations": declarations }]));
    }
    Value::Object(body)
}

fn encode_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::Assistant => "model",
        _ => "user",
    };
    let parts: Vec<Value> = msg
        .content
        .as_blocks()
        .into_iter()
        .map(encode_part)
        .collect();
    json!({ "role": role, "parts": parts })
}

fn encode_part(block: ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::Image { source } => json!({ "inlineData": source }),
        ContentBlock::ToolUse { name, input, .. } => {
            json!({ "functionCall": { "name": name, "args": input } })
        }
        ContentBlock::ToolResult { content, .. } => {
            json!({ "functionResponse": { "response": { "content": content } } })
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ContentWire,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ContentWire {
    parts: Vec<PartWire>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PartWire {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCallWire,
    },
}

#[derive(Debug, Deserialize)]
struct FunctionCallWire {
    name: String,
    args: Value,
}

#[derive(Debug, Deserialize, Default)]
struct UsageWire {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] if the body doesn't parse.
pub fn decode_response(body: &Value, model: &str) -> Result<CanonicalResponse, GatewayError> {
    let parsed: GenerateContentResponse = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::BadProviderResponse(format!("gemini response: {e}")))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::BadProviderResponse("no candidates in response".into()))?;

    let mut content = Vec::new();
    let mut call_counter = 0u32;
    let mut saw_call = false;
    for part in candidate.content.parts {
        match part {
            PartWire::Text { text } => content.push(ContentBlock::Text { text }),
            PartWire::FunctionCall { function_call } => {
                saw_call = true;
                // Gemini doesn't assign call IDs; synthesize a stable one.
                let id = format!("call_{call_counter}");
                call_counter += 1;
                content.push(ContentBlock::ToolUse {
                    id,
                    name: function_call.name,
                    input: function_call.args,
                });
            }
        }
    }

    let stop_reason = match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        Some("STOP") if saw_call => StopReason::ToolUse,
        _ if saw_call => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = parsed.usage_metadata.unwrap_or_default();
    Ok(CanonicalResponse {
        id: uuid::Uuid::new_v4().to_string(),
        model: model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
        },
    })
}

/// Gemini's `:streamGenerateContent` stream is a JSON array of the same
/// candidate shape as the non-stream response, one element per chunk; the
/// relay parses each element as a standalone `GenerateContentResponse`.
#[derive(Debug, Default)]
pub struct StreamState {
    text_index: Option<usize>,
    next_index: usize,
    next_tool_call_id: u32,
}

impl StreamState {
    fn alloc_index(&mut self) -> usize {
        let i = self.next_index;
        self.next_index += 1;
        i
    }
}

/// # Errors
///
/// Returns [`GatewayError::BadProviderResponse`] if the chunk doesn't parse.
pub fn decode_stream_event(
    data: &Value,
    state: &mut StreamState,
) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
    let parsed: GenerateContentResponse = serde_json::from_value(data.clone())
        .map_err(|e| GatewayError::BadProviderResponse(format!("gemini chunk: {e}")))?;

    let mut out = Vec::new();
    let Some(candidate) = parsed.candidates.into_iter().next() else {
        return Ok(out);
    };

    for part in candidate.content.parts {
        match part {
            PartWire::Text { text } => {
                if text.is_empty() {
                    continue;
                }
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
            PartWire::FunctionCall { function_call } => {
                let index = state.alloc_index();
                let id = format!("call_{}", state.next_tool_call_id);
                state.next_tool_call_id += 1;
                out.push(CanonicalStreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlockStart::ToolUse {
                        id,
                        name: function_call.name,
                    },
                });
                out.push(CanonicalStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta(
                        serde_json::to_string(&function_call.args).unwrap_or_default(),
                    ),
                });
                out.push(CanonicalStreamEvent::ContentBlockStop { index });
            }
        }
    }

    if let Some(reason) = candidate.finish_reason {
        if let Some(index) = state.text_index {
            out.push(CanonicalStreamEvent::ContentBlockStop { index });
        }
        let stop_reason = match reason.as_str() {
            "MAX_TOKENS" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        let usage = parsed.usage_metadata.unwrap_or_default();
        out.push(CanonicalStreamEvent::MessageDelta {
            stop_reason,
            usage: Usage {
                input_tokens: usage.prompt_token_count.unwrap_or(0),
                output_tokens: usage.candidates_token_count.unwrap_or(0),
            },
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_generation_config() {
        use smallvec::smallvec;
        let req = CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            model: "gemini-1.5-pro".into(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(smallvec![ContentBlock::Text { text: "hi".into() }]),
            }],
            system: None,
            tools: std::sync::Arc::from(vec![]),
            max_tokens: 100,
            temperature: Some(0.5),
            top_p: None,
            top_k: None,
            stop_sequences: vec![],
            stream: false,
            thinking: false,
            extra: Default::default(),
        };
        let body = encode_request(&req);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn decodes_function_call() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "functionCall": { "name": "get_weather", "args": {"loc":"SF"} } }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2 }
        });
        let resp = decode_response(&body, "gemini-1.5-pro").unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert!(matches!(resp.content[0], ContentBlock::ToolUse { .. }));
    }
}
