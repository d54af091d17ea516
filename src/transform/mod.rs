//! Transformer Registry & Chain (spec §4.3).
//!
//! A [`Transformer`] is a capability set of four operations, any of which
//! may be a no-op default. Every operation is same-type-in/same-type-out
//! (`CanonicalRequest` or raw provider JSON) so a chain folds cleanly
//! without re-parsing; the dialect-specific canonical↔wire conversion
//! itself lives in [`crate::protocol`] and is invoked by the Pipeline
//! directly around the chain, keyed off the provider's configured dialect.
//! Compiled chains are memoized per `(provider, canonical_model)` in a
//! bounded LRU cache (spec §3 "Transformer Chain Cache entry", §9 "Bounded
//! caches") — a guarded map with explicit LRU, not weak references,
//! mirroring the teacher's `models_cache` shape.

pub mod builtins;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::CanonicalRequest;
use crate::util::unix_now_secs;

/// A single named, composable transformer (spec §4.3).
///
/// Every method has a no-op default so a transformer only needs to
/// override the operations it actually participates in.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Normalize/inject defaults before provider-specific encoding.
    fn transform_request_in(&self, request: CanonicalRequest) -> Result<CanonicalRequest, GatewayError> {
        Ok(request)
    }

    /// Final tweaks to the already-encoded provider wire payload.
    fn transform_request_out(&self, payload: Value) -> Result<Value, GatewayError> {
        Ok(payload)
    }

    /// Tweaks to a non-streaming provider response before dialect decoding.
    fn transform_response_in(&self, payload: Value) -> Result<Value, GatewayError> {
        Ok(payload)
    }

    /// Tweaks to a single streamed provider event before dialect decoding.
    fn transform_response_stream_event(&self, payload: Value) -> Result<Value, GatewayError> {
        Ok(payload)
    }
}

/// An ordered, compiled sequence of transformer instances for one
/// `(provider, canonical_model)` pair. Immutable once built (spec §5
/// "No cross-request mutable state ... chains are treated as immutable
/// once compiled").
pub struct CompiledChain {
    pub transformers: Vec<Arc<dyn Transformer>>,
}

impl CompiledChain {
    #[must_use]
    pub fn new(transformers: Vec<Arc<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    /// # Errors
    ///
    /// Propagates the first [`GatewayError::TransformError`] raised by any
    /// transformer in the chain.
    pub fn apply_request_in(&self, mut request: CanonicalRequest) -> Result<CanonicalRequest, GatewayError> {
        for t in &self.transformers {
            request = t.transform_request_in(request)?;
        }
        Ok(request)
    }

    /// # Errors
    ///
    /// See [`CompiledChain::apply_request_in`].
    pub fn apply_request_out(&self, mut payload: Value) -> Result<Value, GatewayError> {
        for t in &self.transformers {
            payload = t.transform_request_out(payload)?;
        }
        Ok(payload)
    }

    /// # Errors
    ///
    /// See [`CompiledChain::apply_request_in`].
    pub fn apply_response_in(&self, mut payload: Value) -> Result<Value, GatewayError> {
        for t in &self.transformers {
            payload = t.transform_response_in(payload)?;
        }
        Ok(payload)
    }

    /// # Errors
    ///
    /// See [`CompiledChain::apply_request_in`].
    pub fn apply_response_stream_event(&self, mut payload: Value) -> Result<Value, GatewayError> {
        for t in &self.transformers {
            payload = t.transform_response_stream_event(payload)?;
        }
        Ok(payload)
    }
}

/// Cache key: provider name plus the canonical model name requested of it.
type ChainKey = (String, String);

struct CacheEntry {
    chain: Arc<CompiledChain>,
    last_used: u64,
}

/// Bounded LRU cache of compiled transformer chains (spec §3, §4.3, §9).
/// Guarded by a single mutex; eviction removes the least-recently-used
/// entry once the bound (default 100) is exceeded.
pub struct TransformerChainCache {
    capacity: usize,
    entries: Mutex<FxHashMap<ChainKey, CacheEntry>>,
}

impl TransformerChainCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Fetch a compiled chain for `(provider, model)`, compiling and
    /// inserting it via `compile` on a cache miss. On insertion past
    /// capacity, evicts the single least-recently-used entry.
    pub fn get_or_compile(
        &self,
        provider: &str,
        model: &str,
        compile: impl FnOnce() -> CompiledChain,
    ) -> Arc<CompiledChain> {
        let key = (provider.to_string(), model.to_string());
        let now = unix_now_secs();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = now;
            return Arc::clone(&entry.chain);
        }

        let chain = Arc::new(compile());
        if entries.len() >= self.capacity {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                chain: Arc::clone(&chain),
                last_used: now,
            },
        );
        chain
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransformerChainCache {
    fn default() -> Self {
        Self::new(100)
    }
}
