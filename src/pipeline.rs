//! Pipeline (spec §4.7): orchestrates one request end to end —
//! `Accepted → Validated → Routed → Transformed → Executing →
//! (Buffered | Streaming) → Completed | Failed`.
//!
//! This is the one place that knows about every other component; every
//! component it calls stays ignorant of the others, the way the teacher's
//! `Server` ties its own request/response/stream stages together without
//! any of them reaching sideways into one another.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::guard::PerformanceGuard;
use crate::observability::token_counter;
use crate::protocol::canonical::{self, CanonicalRequest, CanonicalResponse};
use crate::protocol::{anthropic, gemini, openai_chat};
use crate::registry::{Dialect, ProviderDescriptor, ProviderRegistry};
use crate::routing::{self, RouteTarget};
use crate::stream::relay_stream;
use crate::transform::builtins::build_transformer;
use crate::transform::{CompiledChain, Transformer, TransformerChainCache};
use crate::transport::HttpExecutor;

/// The outcome of a completed pipeline run: either a fully-buffered
/// canonical response body, or a live event stream the Gateway relays to
/// the client as it arrives.
pub enum PipelineResponse {
    Buffered(Value),
    Streaming(Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>),
}

/// Default cap on compiled transformer chains held in the LRU cache
/// (spec §3 "Transformer Chain Cache entry", §9 "Bounded caches").
const CHAIN_CACHE_CAPACITY: usize = 100;

pub struct Pipeline {
    config: RwLock<Arc<AppConfig>>,
    registry: Arc<ProviderRegistry>,
    chain_cache: TransformerChainCache,
    executor: HttpExecutor,
    guard: Arc<PerformanceGuard>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the outbound HTTP client fails
    /// to build.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let registry = Arc::new(ProviderRegistry::from_descriptors(config.providers.clone()));
        registry.set_route_references(route_reference_counts(&config));
        let executor = HttpExecutor::new(
            Duration::from_secs(config.performance.request_timeout_secs),
            config.performance.max_request_body_size,
        )?;
        let guard = Arc::new(PerformanceGuard::new(&config.performance));
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            registry,
            chain_cache: TransformerChainCache::new(CHAIN_CACHE_CAPACITY),
            executor,
            guard,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<PerformanceGuard> {
        &self.guard
    }

    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config.read())
    }

    /// Replace the live routing/IP-gating/performance configuration,
    /// e.g. after a provider CRUD call mutates `routes` (spec §4.2, §4.4).
    pub fn set_config(&self, config: AppConfig) {
        self.registry.set_route_references(route_reference_counts(&config));
        *self.config.write() = Arc::new(config);
    }

    /// Run one request through the full pipeline: admission, parsing,
    /// routing, transformation, dialect encoding, upstream execution, and
    /// either buffered decoding or a relayed stream.
    ///
    /// `client_id` is the identity used for per-client rate limiting —
    /// the caller's API key when present, else the peer IP (spec §4.9).
    ///
    /// # Errors
    ///
    /// Any stage can fail with a [`GatewayError`]; the Gateway renders the
    /// error into the canonical error body (spec §4.7 "Failed").
    pub async fn process(&self, client_id: &str, body: &Value) -> Result<PipelineResponse, GatewayError> {
        self.guard.admit_client(client_id)?;
        let _in_flight = self.guard.admit_resource()?;

        // Accepted -> Validated
        let request = canonical::parse_request(body)?;
        let input_tokens = token_counter::count_request_tokens(&request);

        // Validated -> Routed
        let config = self.config();
        let target = routing::resolve(&config, &request, input_tokens)?;
        let mut request = request;
        routing::apply_route_parameters(&mut request, &target.parameters);

        self.guard.admit_provider(&target.provider)?;
        let provider = self.registry.get(&target.provider)?.descriptor;

        // Routed -> Transformed
        let chain = self.compile_chain(&provider, &target);
        let request = chain.apply_request_in(request)?;
        let stream = request.stream;
        let model = target.model.clone();
        let payload = encode_request(&provider.dialect, &request, &model);
        let payload = chain.apply_request_out(payload)?;

        // Transformed -> Executing -> Buffered | Streaming
        let started = Instant::now();
        let outcome = if stream {
            self.run_streaming(&provider, &model, &payload, chain).await
        } else {
            self.run_buffered(&provider, &model, &payload, &chain, input_tokens, started).await
        };

        match &outcome {
            Ok(_) => self.guard.record_provider_success(&provider.name),
            Err(err) if matches!(err.category(), crate::error::ErrorCategory::Internal) => {}
            Err(_) => self.guard.record_provider_failure(&provider.name),
        }
        outcome
    }

    fn compile_chain(&self, provider: &ProviderDescriptor, target: &RouteTarget) -> Arc<CompiledChain> {
        let provider_name = provider.name.clone();
        let transformer_specs = provider.transformers.clone();
        self.chain_cache.get_or_compile(&provider_name, &target.model, move || {
            let transformers: Vec<Arc<dyn Transformer>> = transformer_specs
                .iter()
                .filter_map(|spec| build_transformer(spec).ok())
                .collect();
            CompiledChain::new(transformers)
        })
    }

    async fn run_buffered(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        payload: &Value,
        chain: &CompiledChain,
        input_tokens: u64,
        started: Instant,
    ) -> Result<PipelineResponse, GatewayError> {
        let (body, latency) = match self.executor.execute_buffered(provider, model, payload).await {
            Ok(pair) => pair,
            Err(err) => {
                if let Ok(view) = self.registry.get(&provider.name) {
                    view.metrics.record(true, 0);
                }
                return Err(err);
            }
        };
        let body = chain.apply_response_in(body)?;
        let response = decode_response(&provider.dialect, &body, model)?;
        let estimated_output = response
            .content
            .iter()
            .filter_map(|block| match block {
                crate::protocol::ContentBlock::Text { text } => Some(token_counter::estimate_tokens(text)),
                _ => None,
            })
            .sum();
        let usage = token_counter::merge_usage(&response.usage, input_tokens, estimated_output);
        crate::observability::log_request_complete(model, &usage, started);
        if let Ok(view) = self.registry.get(&provider.name) {
            view.metrics.record(false, latency.as_millis() as u64);
        }
        Ok(PipelineResponse::Buffered(render_response(&response, usage)))
    }

    async fn run_streaming(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        payload: &Value,
        chain: Arc<CompiledChain>,
    ) -> Result<PipelineResponse, GatewayError> {
        let response = self.executor.execute_streaming(provider, model, payload).await?;
        let stream = relay_stream(response, provider.dialect, chain, model.to_string());
        Ok(PipelineResponse::Streaming(Box::pin(stream)))
    }
}

fn route_reference_counts(config: &AppConfig) -> rustc_hash::FxHashMap<String, usize> {
    let mut counts = rustc_hash::FxHashMap::default();
    for route in config.routes.values() {
        *counts.entry(route.provider.clone()).or_insert(0) += 1;
    }
    counts
}

fn encode_request(dialect: &Dialect, request: &CanonicalRequest, model: &str) -> Value {
    match dialect {
        Dialect::Anthropic => anthropic::encode_request(request, model),
        Dialect::OpenAiChat | Dialect::DeepSeek | Dialect::OpenRouter => {
            openai_chat::encode_request(request, model)
        }
        Dialect::Gemini => gemini::encode_request(request),
    }
}

fn decode_response(dialect: &Dialect, body: &Value, model: &str) -> Result<CanonicalResponse, GatewayError> {
    match dialect {
        Dialect::Anthropic => anthropic::decode_response(body),
        Dialect::OpenAiChat | Dialect::DeepSeek | Dialect::OpenRouter => openai_chat::decode_response(body),
        Dialect::Gemini => gemini::decode_response(body, model),
    }
}

/// Render a [`CanonicalResponse`] into the Anthropic-shaped JSON body the
/// client expects (spec §3 `Canonical Response` wire shape).
fn render_response(response: &CanonicalResponse, usage: crate::protocol::canonical::Usage) -> Value {
    let content: Vec<Value> = response
        .content
        .iter()
        .map(|block| match block {
            crate::protocol::ContentBlock::Text { text } => {
                serde_json::json!({ "type": "text", "text": text })
            }
            crate::protocol::ContentBlock::ToolUse { id, name, input } => {
                serde_json::json!({ "type": "tool_use", "id": id, "name": name, "input": input })
            }
            crate::protocol::ContentBlock::ToolResult { tool_use_id, content } => {
                serde_json::json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content })
            }
            crate::protocol::ContentBlock::Image { source } => {
                serde_json::json!({ "type": "image", "source": source })
            }
        })
        .collect();
    serde_json::json!({
        "id": response.id,
        "type": "message",
        "role": "assistant",
        "model": response.model,
        "content": content,
        "stop_reason": response.stop_reason.as_str(),
        "stop_sequence": response.stop_sequence,
        "usage": {
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
        },
    })
}
