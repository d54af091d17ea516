//! Circuit-breaker policy end to end: repeated upstream failures against a
//! mock that always errors should trip the breaker and start rejecting
//! before ever reaching the network again.

use std::collections::HashMap;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use ccproxy::config::{AppConfig, IpGatingConfig, PerformanceConfig, RouteConfig, ServerConfig};
use ccproxy::error::GatewayError;
use ccproxy::registry::{Dialect, ProviderDescriptor};
use ccproxy::Pipeline;
use serde_json::json;

async fn spawn_failing_mock() -> String {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream down") }),
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

fn request() -> serde_json::Value {
    json!({
        "model": "claude-3-sonnet",
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "ping"}],
    })
}

#[tokio::test]
async fn repeated_upstream_failures_trip_the_breaker() {
    let base_url = spawn_failing_mock().await;
    let mut routes = HashMap::new();
    routes.insert(
        "default".to_string(),
        RouteConfig {
            provider: "flaky".to_string(),
            model: "canonical-model".to_string(),
            parameters: serde_json::Map::new(),
        },
    );
    let config = AppConfig {
        server: ServerConfig::default(),
        performance: PerformanceConfig::default(),
        ip_gating: IpGatingConfig::default(),
        providers: vec![ProviderDescriptor {
            name: "flaky".to_string(),
            dialect: Dialect::OpenAiChat,
            api_base_url: base_url,
            api_key: Some("sk-test".to_string()),
            enabled: true,
            transformers: vec!["openai".to_string()],
        }],
        routes,
    };
    let pipeline = Pipeline::new(config).unwrap();

    // The breaker's sliding window is 20 wide; it only evaluates the ratio
    // once the window is full, so the 20th failure both reaches the
    // network and trips the breaker for every call after it.
    for _ in 0..20 {
        let err = pipeline.process("client-a", &request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure { .. }));
    }

    let err = pipeline.process("client-a", &request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen(_)));
}
