//! End-to-end streaming forwarding: a mock upstream that speaks SSE, driven
//! through the Pipeline's relay, decoded back into canonical SSE frames.

use std::collections::HashMap;

use axum::body::Body;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use ccproxy::config::{AppConfig, IpGatingConfig, PerformanceConfig, RouteConfig, ServerConfig};
use ccproxy::registry::{Dialect, ProviderDescriptor};
use ccproxy::{Pipeline, PipelineResponse};
use futures_util::StreamExt;
use serde_json::json;

const OPENAI_STREAM_BODY: &str = "data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"po\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-mini\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ng\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";

async fn spawn_sse_mock(body: &'static str) -> String {
    let app = Router::new().route(
        "/chat/completions",
        post(move || async move {
            Response::builder()
                .status(200)
                .header("content-type", "text/event-stream")
                .body(Body::from(body))
                .unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn config_for(provider: ProviderDescriptor) -> AppConfig {
    let mut routes = HashMap::new();
    routes.insert(
        "default".to_string(),
        RouteConfig {
            provider: provider.name.clone(),
            model: "canonical-model".to_string(),
            parameters: serde_json::Map::new(),
        },
    );
    AppConfig {
        server: ServerConfig::default(),
        performance: PerformanceConfig::default(),
        ip_gating: IpGatingConfig::default(),
        providers: vec![provider],
        routes,
    }
}

#[tokio::test]
async fn relays_openai_stream_as_canonical_sse_frames() {
    let base_url = spawn_sse_mock(OPENAI_STREAM_BODY).await;
    let provider = ProviderDescriptor {
        name: "openai".to_string(),
        dialect: Dialect::OpenAiChat,
        api_base_url: base_url,
        api_key: Some("sk-test".to_string()),
        enabled: true,
        transformers: vec!["openai".to_string()],
    };
    let pipeline = Pipeline::new(config_for(provider)).unwrap();

    let request = json!({
        "model": "claude-3-sonnet",
        "max_tokens": 64,
        "messages": [{"role": "user", "content": "ping"}],
        "stream": true,
    });

    let response = pipeline.process("client-a", &request).await.unwrap();
    let PipelineResponse::Streaming(mut stream) = response else {
        panic!("expected a streaming response");
    };

    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.expect("infallible stream item"));
    }
    let text = String::from_utf8(collected).expect("utf8 SSE body");

    // Canonical framing: one message_start, content deltas merged through
    // the relay's per-dialect decoder, and a trailing message_stop.
    assert!(text.contains("event: message_start"));
    assert!(text.contains("event: content_block_delta"));
    assert!(text.contains("\"text\":\"po\""));
    assert!(text.contains("\"text\":\"ng\""));
    assert!(text.contains("event: message_stop"));
}
