//! Streaming Relay (spec §4.6): consumes an upstream SSE response, decodes
//! each frame per the provider's dialect, runs it through the transformer
//! chain's stream-event hook, and re-emits canonical SSE frames to the
//! client. Ordering (`content_block_start -> delta* -> stop` per index, one
//! `message_start`/`message_stop` pair per stream) is enforced here for the
//! dialects that don't already carry it end to end; `ping` keep-alives are
//! interleaved with upstream reads via a single `tokio::select!` loop so
//! neither starves the other.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Response as UpstreamResponse;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalStreamEvent, ContentBlockStart, ContentDelta, StopReason};
use crate::protocol::{anthropic, gemini, openai_chat};
use crate::registry::Dialect;
use crate::stream::sse::{encode_sse_event, is_done_sentinel, SseParser};
use crate::transform::CompiledChain;
use crate::transport::sanitize_text;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const RELAY_CHANNEL_CAPACITY: usize = 32;

/// Per-dialect decoder state, held for the lifetime of one streamed
/// response (spec §4.6 "Tool-call streaming", §6).
enum DialectState {
    Anthropic(anthropic::StreamState),
    OpenAiChat(openai_chat::StreamState),
    Gemini(gemini::StreamState),
}

impl DialectState {
    fn new(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Anthropic => DialectState::Anthropic(anthropic::StreamState::default()),
            Dialect::OpenAiChat | Dialect::OpenRouter => {
                DialectState::OpenAiChat(openai_chat::StreamState::new(false))
            }
            Dialect::DeepSeek => DialectState::OpenAiChat(openai_chat::StreamState::new(true)),
            Dialect::Gemini => DialectState::Gemini(gemini::StreamState::default()),
        }
    }

    fn decode(
        &mut self,
        event_type: Option<&str>,
        data: &Value,
    ) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
        match self {
            DialectState::Anthropic(state) => {
                anthropic::decode_stream_event(event_type.unwrap_or("message_delta"), data, state)
            }
            DialectState::OpenAiChat(state) => openai_chat::decode_stream_event(data, state),
            DialectState::Gemini(state) => gemini::decode_stream_event(data, state),
        }
    }
}

/// Consume `response` and drive `sender` with canonical SSE frame bytes
/// until the upstream stream ends, errors, or the client disconnects (the
/// receiver half drops, which a `send` surfaces immediately).
async fn run_relay(
    mut response: UpstreamResponse,
    dialect: Dialect,
    chain: Arc<CompiledChain>,
    model: String,
    sender: mpsc::Sender<Bytes>,
) {
    let mut parser = SseParser::new();
    let mut state = DialectState::new(dialect);
    let mut message_start_emitted = false;
    let mut message_stop_emitted = false;
    let mut ticker = time::interval(PING_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            chunk = response.chunk() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        let frames = parser.feed(&text);
                        for frame in frames {
                            if is_done_sentinel(&frame.data) {
                                continue;
                            }
                            let outcome = emit_frame(
                                &frame.data,
                                frame.event.as_deref(),
                                &chain,
                                &mut state,
                                &model,
                                &mut message_start_emitted,
                                &mut message_stop_emitted,
                                &sender,
                            )
                            .await;
                            match outcome {
                                Ok(true) => return,
                                Ok(false) => {}
                                Err(err) => {
                                    emit_error_and_stop(&err, &mut message_stop_emitted, &sender).await;
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let gateway_err = GatewayError::UpstreamFailure {
                            status: 0,
                            message: sanitize_text(&err.to_string()),
                        };
                        emit_error_and_stop(&gateway_err, &mut message_stop_emitted, &sender).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                let frame = encode_sse_event("ping", &json!({"type": "ping"}));
                if sender.send(Bytes::from(frame)).await.is_err() {
                    return;
                }
            }
        }
    }

    if !message_stop_emitted {
        let frame = encode_sse_event("message_stop", &json!({"type": "message_stop"}));
        let _ = sender.send(Bytes::from(frame)).await;
    }
}

/// Decode one SSE frame's `data:` payload into canonical events, run them
/// through the transformer chain, and write each to `sender` as a canonical
/// SSE frame. Returns `Ok(true)` if the stream should stop immediately,
/// either because an `error` event was relayed or because the client
/// disconnected (`sender` closed) mid-frame.
#[allow(clippy::too_many_arguments)]
async fn emit_frame(
    raw_data: &str,
    event_type: Option<&str>,
    chain: &CompiledChain,
    state: &mut DialectState,
    model: &str,
    message_start_emitted: &mut bool,
    message_stop_emitted: &mut bool,
    sender: &mpsc::Sender<Bytes>,
) -> Result<bool, GatewayError> {
    let raw: Value = serde_json::from_str(raw_data)
        .map_err(|e| GatewayError::BadProviderResponse(format!("malformed stream frame: {e}")))?;
    let raw = chain.apply_response_stream_event(raw)?;
    let events = state.decode(event_type, &raw)?;

    for event in events {
        if matches!(event, CanonicalStreamEvent::MessageStart { .. }) {
            if *message_start_emitted {
                continue;
            }
            *message_start_emitted = true;
            if !send_event(&event, sender).await {
                return Ok(true);
            }
            continue;
        }

        if !*message_start_emitted {
            *message_start_emitted = true;
            let synthetic = CanonicalStreamEvent::MessageStart {
                id: format!("msg_{}", uuid::Uuid::new_v4()),
                model: model.to_string(),
            };
            if !send_event(&synthetic, sender).await {
                return Ok(true);
            }
        }

        if matches!(event, CanonicalStreamEvent::MessageStop) {
            *message_stop_emitted = true;
        }

        let is_error = matches!(event, CanonicalStreamEvent::Error { .. });
        if !send_event(&event, sender).await {
            return Ok(true);
        }
        if is_error {
            let stop = CanonicalStreamEvent::MessageStop;
            *message_stop_emitted = true;
            send_event(&stop, sender).await;
            return Ok(true);
        }
    }
    Ok(false)
}

async fn emit_error_and_stop(
    err: &GatewayError,
    message_stop_emitted: &mut bool,
    sender: &mpsc::Sender<Bytes>,
) {
    let error_event = CanonicalStreamEvent::Error {
        status: crate::error::http_status(err.category()).as_u16(),
        message: sanitize_text(&err.to_string()),
    };
    send_event(&error_event, sender).await;
    if !*message_stop_emitted {
        *message_stop_emitted = true;
        send_event(&CanonicalStreamEvent::MessageStop, sender).await;
    }
}

/// Returns `false` if the client's receiver has been dropped, meaning the
/// client disconnected and the caller should stop driving this stream.
async fn send_event(event: &CanonicalStreamEvent, sender: &mpsc::Sender<Bytes>) -> bool {
    let (event_type, body) = encode_client_event(event);
    let frame = encode_sse_event(event_type, &body);
    sender.send(Bytes::from(frame)).await.is_ok()
}

/// Render one canonical stream event into the Anthropic-shaped wire JSON
/// the client sees (spec §3 "Canonical Stream Event", §4.6 "Encoding").
fn encode_client_event(event: &CanonicalStreamEvent) -> (&'static str, Value) {
    match event {
        CanonicalStreamEvent::MessageStart { id, model } => (
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": id,
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            }),
        ),
        CanonicalStreamEvent::ContentBlockStart { index, block } => {
            let content_block = match block {
                ContentBlockStart::Text => json!({"type": "text", "text": ""}),
                ContentBlockStart::ToolUse { id, name } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": {}})
                }
            };
            (
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": content_block,
                }),
            )
        }
        CanonicalStreamEvent::ContentBlockDelta { index, delta } => {
            let delta_json = match delta {
                ContentDelta::TextDelta(text) => json!({"type": "text_delta", "text": text}),
                ContentDelta::InputJsonDelta(partial) => {
                    json!({"type": "input_json_delta", "partial_json": partial})
                }
            };
            (
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": delta_json,
                }),
            )
        }
        CanonicalStreamEvent::ContentBlockStop { index } => (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        ),
        CanonicalStreamEvent::MessageDelta { stop_reason, usage } => (
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": stop_reason_str(*stop_reason),
                    "stop_sequence": null,
                },
                "usage": {
                    "input_tokens": usage.input_tokens,
                    "output_tokens": usage.output_tokens,
                },
            }),
        ),
        CanonicalStreamEvent::MessageStop => ("message_stop", json!({"type": "message_stop"})),
        CanonicalStreamEvent::Ping => ("ping", json!({"type": "ping"})),
        CanonicalStreamEvent::Error { status, message } => (
            "error",
            json!({
                "type": "error",
                "error": {"type": "api_error", "status": status, "message": message},
            }),
        ),
    }
}

fn stop_reason_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::StopSequence => "stop_sequence",
        StopReason::ToolUse => "tool_use",
    }
}

/// Drive `response` to completion in the background and return the axum
/// body stream the Gateway hands back to the client (spec §4.6, §4.7
/// "Streaming").
pub fn relay_stream(
    response: UpstreamResponse,
    dialect: Dialect,
    chain: Arc<CompiledChain>,
    model: String,
) -> impl futures_util::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send + 'static {
    let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(run_relay(response, dialect, chain, model, sender));
    futures_util::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|bytes| (Ok(bytes), receiver))
    })
}
