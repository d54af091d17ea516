//! Standalone mock upstream used by integration tests and local manual
//! testing: speaks just enough of the OpenAI chat-completions, Anthropic
//! messages, and Gemini generateContent wire formats to exercise the
//! gateway's transform and streaming-relay paths without a real API key.
//!
//! Controlled entirely through environment variables so test harnesses can
//! spawn it as a child process:
//!   `UPSTREAM_PORT`   - port to bind (default 19001)
//!   `MOCK_MODE`       - "nonstream" (default) or "stream"
//!   `MOCK_SCENARIO`   - "text" (default), "tools", or "error"

use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;

#[derive(Copy, Clone)]
enum MockMode {
    Nonstream,
    Stream,
}

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Tools,
    Error,
}

#[derive(Copy, Clone)]
enum ProviderApi {
    OpenAiChat,
    AnthropicMessages,
    GeminiGenerateContent,
}

struct RequestStats {
    total: AtomicU64,
}

impl RequestStats {
    const fn new() -> Self {
        Self { total: AtomicU64::new(0) }
    }

    fn record(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
    }
}

struct MockState {
    mode: MockMode,
    scenario: MockScenario,
    stats: RequestStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let mode = parse_mode();
    let scenario = parse_scenario();
    let state = Arc::new(MockState { mode, scenario, stats: RequestStats::new() });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));

    let conn_builder = AutoBuilder::new(TokioExecutor::new());

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_mode() -> MockMode {
    match env::var("MOCK_MODE").as_deref() {
        Ok("stream") => MockMode::Stream,
        Ok("nonstream") | Err(_) => MockMode::Nonstream,
        Ok(other) => {
            eprintln!("unknown MOCK_MODE '{other}', fallback to nonstream");
            MockMode::Nonstream
        }
    }
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("tools") => MockScenario::Tools,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    state.stats.record();
    drain_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        let body = format!("{{\"requests\":{}}}", state.stats.snapshot());
        return simple_response(StatusCode::OK, "application/json", Bytes::from(body.into_bytes()));
    }
    if method == Method::POST && path == "/_mock/reset" {
        state.stats.reset();
        return simple_response_static(StatusCode::OK, "application/json", br#"{"ok":true}"#);
    }
    if method != Method::POST {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    let Some(provider) = provider_for_path(path) else {
        return simple_response_static(StatusCode::NOT_FOUND, "application/json", br#"{"error":"not_found"}"#);
    };

    if matches!(state.scenario, MockScenario::Error) {
        return simple_response_static(
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json",
            br#"{"error":{"message":"mock_injected_error"}}"#,
        );
    }

    if matches!(state.mode, MockMode::Stream) {
        streaming_response(provider, state.scenario)
    } else {
        non_streaming_response(provider, state.scenario)
    }
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame) = body.frame().await {
        if frame.is_err() {
            break;
        }
    }
}

fn provider_for_path(path: &str) -> Option<ProviderApi> {
    match path {
        "/v1/chat/completions" | "/chat/completions" => Some(ProviderApi::OpenAiChat),
        "/v1/messages" | "/messages" => Some(ProviderApi::AnthropicMessages),
        _ if path.starts_with("/v1beta/models/")
            && (path.contains(":generateContent") || path.contains(":streamGenerateContent")) =>
        {
            Some(ProviderApi::GeminiGenerateContent)
        }
        _ => None,
    }
}

fn non_streaming_response(provider: ProviderApi, scenario: MockScenario) -> Response<Full<Bytes>> {
    let body: &[u8] = match (provider, scenario) {
        (ProviderApi::OpenAiChat, MockScenario::Text) => OPENAI_CHAT_TEXT,
        (ProviderApi::OpenAiChat, MockScenario::Tools) => OPENAI_CHAT_TOOL_CALL,
        (ProviderApi::AnthropicMessages, MockScenario::Text) => ANTHROPIC_TEXT,
        (ProviderApi::AnthropicMessages, MockScenario::Tools) => ANTHROPIC_TOOL_USE,
        (ProviderApi::GeminiGenerateContent, MockScenario::Text) => GEMINI_TEXT,
        (ProviderApi::GeminiGenerateContent, MockScenario::Tools) => GEMINI_FUNCTION_CALL,
        (_, MockScenario::Error) => br#"{"error":"mock_injected_error"}"#,
    };
    simple_response_static(StatusCode::OK, "application/json", body)
}

fn streaming_response(provider: ProviderApi, scenario: MockScenario) -> Response<Full<Bytes>> {
    let body: &[u8] = match (provider, scenario) {
        (ProviderApi::OpenAiChat, MockScenario::Text | MockScenario::Tools) => OPENAI_CHAT_STREAM_TEXT,
        (ProviderApi::AnthropicMessages, MockScenario::Text | MockScenario::Tools) => ANTHROPIC_STREAM_TEXT,
        (ProviderApi::GeminiGenerateContent, MockScenario::Text | MockScenario::Tools) => GEMINI_STREAM_TEXT,
        (_, MockScenario::Error) => b"data: {\"error\":\"mock_injected_error\"}\n\n",
    };
    let mut response = simple_response_static(StatusCode::OK, "text/event-stream", body);
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn simple_response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(status: StatusCode, content_type: &'static str, body: &'static [u8]) -> Response<Full<Bytes>> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const OPENAI_CHAT_TEXT: &[u8] = br#"{"id":"chatcmpl-mock","object":"chat.completion","created":1,"model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"pong"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#;
const OPENAI_CHAT_TOOL_CALL: &[u8] = br#"{"id":"chatcmpl-mock","object":"chat.completion","created":1,"model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":null,"tool_calls":[{"id":"call_mock","type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"nyc\"}"}}]},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":8,"completion_tokens":4,"total_tokens":12}}"#;
const OPENAI_CHAT_STREAM_TEXT: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"po\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":1,\"total_tokens\":6}}]}\n\ndata: [DONE]\n\n";

const ANTHROPIC_TEXT: &[u8] = br#"{"id":"msg_mock","type":"message","role":"assistant","model":"claude-3-5-haiku-latest","content":[{"type":"text","text":"pong"}],"stop_reason":"end_turn","stop_sequence":null,"usage":{"input_tokens":5,"output_tokens":1}}"#;
const ANTHROPIC_TOOL_USE: &[u8] = br#"{"id":"msg_mock","type":"message","role":"assistant","model":"claude-3-5-haiku-latest","content":[{"type":"tool_use","id":"toolu_mock","name":"get_weather","input":{"city":"nyc"}}],"stop_reason":"tool_use","stop_sequence":null,"usage":{"input_tokens":8,"output_tokens":4}}"#;
const ANTHROPIC_STREAM_TEXT: &[u8] = b"data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_mock\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-3-5-haiku-latest\",\"content\":[]}}\n\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"pong\"}}\n\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\ndata: {\"type\":\"message_stop\"}\n\n";

const GEMINI_TEXT: &[u8] = br#"{"candidates":[{"content":{"parts":[{"text":"pong"}],"role":"model"},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1,"totalTokenCount":6}}"#;
const GEMINI_FUNCTION_CALL: &[u8] = br#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"city":"nyc"}}}],"role":"model"},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":8,"candidatesTokenCount":4,"totalTokenCount":12}}"#;
const GEMINI_STREAM_TEXT: &[u8] = b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"po\"}],\"role\":\"model\"},\"index\":0}]}\n\ndata: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ng\"}],\"role\":\"model\"},\"finishReason\":\"STOP\",\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":1,\"totalTokenCount\":6}}\n\n";
