//! HTTP-surface tests: the full axum router, auth precedence, and the
//! admin endpoints, driven with `tower::ServiceExt::oneshot` the way the
//! teacher's own router-level tests exercise it.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use ccproxy::config::{AppConfig, IpGatingConfig, PerformanceConfig, RouteConfig, ServerConfig};
use ccproxy::gateway;
use ccproxy::registry::{Dialect, ProviderDescriptor};
use ccproxy::Pipeline;
use tower::ServiceExt;

fn base_config() -> AppConfig {
    let mut routes = HashMap::new();
    routes.insert(
        "default".to_string(),
        RouteConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            parameters: serde_json::Map::new(),
        },
    );
    AppConfig {
        server: ServerConfig::default(),
        performance: PerformanceConfig::default(),
        ip_gating: IpGatingConfig::default(),
        providers: vec![ProviderDescriptor {
            name: "openai".to_string(),
            dialect: Dialect::OpenAiChat,
            api_base_url: "http://127.0.0.1:1".to_string(),
            api_key: Some("sk-test".to_string()),
            enabled: true,
            transformers: vec!["openai".to_string()],
        }],
        routes,
    }
}

fn request_from(peer: SocketAddr, req: Request<Body>) -> Request<Body> {
    let mut req = req;
    req.extensions_mut().insert(ConnectInfo(peer));
    req
}

#[tokio::test]
async fn health_is_public_without_auth() {
    let pipeline = Arc::new(Pipeline::new(base_config()).unwrap());
    let app = gateway::router(pipeline);

    let remote: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 4000);
    let req = request_from(remote, Request::builder().uri("/health").body(Body::empty()).unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_route_rejects_unauthenticated_remote_peer() {
    let pipeline = Arc::new(Pipeline::new(base_config()).unwrap());
    let app = gateway::router(pipeline);

    let remote: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 4000);
    let req = request_from(
        remote,
        Request::builder()
            .method("GET")
            .uri("/status")
            .body(Body::empty())
            .unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_allows_loopback_when_no_key_configured() {
    let pipeline = Arc::new(Pipeline::new(base_config()).unwrap());
    let app = gateway::router(pipeline);

    let loopback: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);
    let req = request_from(
        loopback,
        Request::builder()
            .method("GET")
            .uri("/status")
            .body(Body::empty())
            .unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn matching_api_key_unlocks_remote_peer() {
    let mut config = base_config();
    config.server.apikey = Some("secret-key".to_string());
    let pipeline = Arc::new(Pipeline::new(config).unwrap());
    let app = gateway::router(pipeline);

    let remote: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 4000);
    let req = request_from(
        remote,
        Request::builder()
            .method("GET")
            .uri("/status")
            .header("x-api-key", "secret-key")
            .body(Body::empty())
            .unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn blacklisted_peer_gets_forbidden_not_unauthorized() {
    let mut config = base_config();
    config.server.apikey = Some("secret-key".to_string());
    config.ip_gating.blacklist = vec!["203.0.113.9".to_string()];
    let pipeline = Arc::new(Pipeline::new(config).unwrap());
    let app = gateway::router(pipeline);

    let remote: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 4000);
    let req = request_from(
        remote,
        Request::builder()
            .method("GET")
            .uri("/status")
            .body(Body::empty())
            .unwrap(),
    );

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn provider_crud_round_trips_through_the_admin_api() {
    let pipeline = Arc::new(Pipeline::new(base_config()).unwrap());
    let app = gateway::router(pipeline);

    let loopback: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);
    let descriptor = serde_json::json!({
        "name": "anthropic",
        "dialect": "anthropic",
        "api_base_url": "https://api.anthropic.com",
        "api_key": "sk-ant-test",
        "enabled": true,
        "transformers": ["anthropic"],
    });
    let add_req = request_from(
        loopback,
        Request::builder()
            .method("POST")
            .uri("/providers")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&descriptor).unwrap()))
            .unwrap(),
    );
    let response = app.clone().oneshot(add_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let list_req = request_from(
        loopback,
        Request::builder().method("GET").uri("/providers").body(Body::empty()).unwrap(),
    );
    let response = app.oneshot(list_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let names: Vec<&str> = body["providers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"anthropic"));
    assert!(names.contains(&"openai"));
}
