//! HTTP surface (spec §4.8): the axum router, its middleware chain, and
//! the handlers that hand work off to the [`crate::Pipeline`].

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::{canonical_error_body, http_status, GatewayError};
use crate::pipeline::PipelineResponse;
use crate::registry::ProviderDescriptor;
use crate::Pipeline;

type SharedPipeline = Arc<Pipeline>;

/// Build the full router: public health check, authenticated admin/chat
/// routes, and the middleware chain spec §4.8 lists in order (IP gating
/// and auth are combined into one pass — see [`auth::is_authorized`]).
#[must_use]
pub fn router(pipeline: SharedPipeline) -> Router {
    let config = pipeline.config();
    let body_cap = config.performance.max_request_body_size;
    let timeout = Duration::from_secs(config.performance.request_timeout_secs);
    let cors = build_cors(&config.server.cors_allowed_origins);

    let protected = Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/status", get(status_handler))
        .route(
            "/providers",
            get(list_providers_handler).post(add_provider_handler),
        )
        .route(
            "/providers/{name}",
            get(get_provider_handler)
                .put(update_provider_handler)
                .delete(delete_provider_handler),
        )
        .route("/routes", get(list_routes_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&pipeline), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::timeout::TimeoutLayer::new(timeout))
        .layer(RequestBodyLimitLayer::new(body_cap))
        .with_state(pipeline)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(parsed)
    };
    // `x-api-key` is deliberately absent from both lists (spec §4.8).
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .expose_headers([axum::http::header::CONTENT_TYPE])
}

async fn auth_middleware(
    State(pipeline): State<SharedPipeline>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = pipeline.config();
    if auth::is_authorized(&config, request.headers(), peer.ip()) {
        return next.run(request).await;
    }
    let status = if auth::is_blacklisted(&config, peer.ip()) {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(canonical_error_body(&GatewayError::AuthFailed("access denied".into())))).into_response()
}

async fn health_handler(
    State(pipeline): State<SharedPipeline>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<Value> {
    let config = pipeline.config();
    if auth::is_authorized(&config, &headers, peer.ip()) {
        Json(json!({
            "status": "ok",
            "in_flight_requests": pipeline.guard().in_flight(),
            "providers_registered": pipeline.registry().list().len(),
        }))
    } else {
        Json(json!({ "status": "ok" }))
    }
}

async fn status_handler(State(pipeline): State<SharedPipeline>) -> Json<Value> {
    let providers: Vec<Value> = pipeline
        .registry()
        .list()
        .into_iter()
        .map(|view| {
            let snapshot = view.metrics.snapshot();
            json!({
                "name": view.descriptor.name,
                "dialect": view.descriptor.dialect,
                "enabled": view.descriptor.enabled,
                "circuit_state": circuit_state_label(pipeline.guard().circuit_state(&view.descriptor.name)),
                "requests_total": snapshot.requests_total,
                "requests_failed": snapshot.requests_failed,
                "latency_avg_ms": average_latency(snapshot.latency_sum_ms, snapshot.latency_count),
            })
        })
        .collect();
    Json(json!({
        "status": "ok",
        "in_flight_requests": pipeline.guard().in_flight(),
        "providers": providers,
    }))
}

fn circuit_state_label(state: crate::guard::CircuitState) -> &'static str {
    match state {
        crate::guard::CircuitState::Closed => "closed",
        crate::guard::CircuitState::Open => "open",
        crate::guard::CircuitState::HalfOpen => "half_open",
    }
}

fn average_latency(sum_ms: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum_ms as f64 / count as f64
    }
}

async fn list_routes_handler(State(pipeline): State<SharedPipeline>) -> Json<Value> {
    let config = pipeline.config();
    let routes: Value = config
        .routes
        .iter()
        .map(|(name, route)| {
            (
                name.clone(),
                json!({ "provider": route.provider, "model": route.model, "parameters": route.parameters }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();
    Json(json!({ "routes": routes }))
}

async fn list_providers_handler(State(pipeline): State<SharedPipeline>) -> Json<Value> {
    let views: Vec<Value> = pipeline
        .registry()
        .list()
        .into_iter()
        .map(|view| serde_json::to_value(view.descriptor).unwrap_or(Value::Null))
        .collect();
    Json(json!({ "providers": views }))
}

async fn get_provider_handler(
    State(pipeline): State<SharedPipeline>,
    Path(name): Path<String>,
) -> Result<Json<ProviderDescriptor>, GatewayResponseError> {
    Ok(Json(pipeline.registry().get(&name)?.descriptor))
}

async fn add_provider_handler(
    State(pipeline): State<SharedPipeline>,
    Json(descriptor): Json<ProviderDescriptor>,
) -> Result<(StatusCode, Json<ProviderDescriptor>), GatewayResponseError> {
    if pipeline.registry().get(&descriptor.name).is_ok() {
        return Err(GatewayResponseError {
            status: StatusCode::CONFLICT,
            body: json!({
                "type": "error",
                "error": { "type": "invalid_request_error", "message": format!("provider '{}' already exists", descriptor.name) },
            }),
        });
    }
    pipeline.registry().add(descriptor.clone())?;
    let mut config = (*pipeline.config()).clone();
    config.providers.push(descriptor.clone());
    pipeline.set_config(config);
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn update_provider_handler(
    State(pipeline): State<SharedPipeline>,
    Path(name): Path<String>,
    Json(descriptor): Json<ProviderDescriptor>,
) -> Result<Json<ProviderDescriptor>, GatewayResponseError> {
    pipeline.registry().update(&name, descriptor.clone())?;
    let mut config = (*pipeline.config()).clone();
    if let Some(existing) = config.providers.iter_mut().find(|p| p.name == name) {
        *existing = descriptor.clone();
    }
    pipeline.set_config(config);
    Ok(Json(descriptor))
}

async fn delete_provider_handler(
    State(pipeline): State<SharedPipeline>,
    Path(name): Path<String>,
) -> Result<StatusCode, GatewayResponseError> {
    pipeline.registry().delete(&name)?;
    let mut config = (*pipeline.config()).clone();
    config.providers.retain(|p| p.name != name);
    pipeline.set_config(config);
    Ok(StatusCode::NO_CONTENT)
}

async fn messages_handler(
    State(pipeline): State<SharedPipeline>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let client_id = auth::extract_api_key(&headers).unwrap_or_else(|| peer.ip().to_string());
    match pipeline.process(&client_id, &body).await {
        Ok(PipelineResponse::Buffered(value)) => Json(value).into_response(),
        Ok(PipelineResponse::Streaming(stream)) => {
            // The relay already frames each event as a complete
            // `event: ...\ndata: ...\n\n` byte sequence (spec §6), so the
            // body is handed straight through rather than re-wrapped.
            let mut response = Response::new(Body::from_stream(stream));
            response.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            );
            response
                .headers_mut()
                .insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => render_error(&err),
    }
}

fn render_error(err: &GatewayError) -> Response {
    let status = http_status(err.category());
    (status, Json(canonical_error_body(err))).into_response()
}

/// Thin wrapper so handlers can use `?` against [`GatewayError`] while
/// still implementing [`IntoResponse`].
struct GatewayResponseError {
    status: StatusCode,
    body: Value,
}

impl From<GatewayError> for GatewayResponseError {
    fn from(err: GatewayError) -> Self {
        Self { status: http_status(err.category()), body: canonical_error_body(&err) }
    }
}

impl IntoResponse for GatewayResponseError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
