//! Provider Registry (spec §4.2): the authoritative set of configured
//! upstream providers, their dialects, and live per-provider metrics.
//!
//! Mutations (`add`/`update`/`delete`) take the writer lock; reads
//! (`get`/`list`) take the reader lock and return cloned, immutable
//! snapshots so callers never hold the lock across an await point.
//! Metric counters are plain atomics updated without any lock, following
//! the same shape as the teacher's per-upstream atomic caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Which wire dialect a provider speaks on egress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Anthropic,
    OpenAiChat,
    Gemini,
    DeepSeek,
    OpenRouter,
}

/// A provider's static configuration (spec §4.2 `descriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub dialect: Dialect,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ordered list of built-in transformer names applied to this provider's
    /// chains (spec §4.3), e.g. `["maxtoken:8192", "parameters:..."]`.
    #[serde(default)]
    pub transformers: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Point-in-time, lock-free metric counters for one provider.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub latency_sum_ms: AtomicU64,
    pub latency_count: AtomicU64,
}

impl ProviderMetrics {
    pub fn record(&self, failed: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProviderMetricsSnapshot {
        ProviderMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProviderMetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub latency_sum_ms: u64,
    pub latency_count: u64,
}

struct Entry {
    descriptor: ProviderDescriptor,
    metrics: Arc<ProviderMetrics>,
}

/// A consistent, caller-owned view of one provider: its descriptor plus a
/// handle to the live metric counters (reads through the handle never take
/// the registry lock again).
#[derive(Clone)]
pub struct ProviderView {
    pub descriptor: ProviderDescriptor,
    pub metrics: Arc<ProviderMetrics>,
}

/// The in-memory provider table, guarded by a single reader/writer lock.
pub struct ProviderRegistry {
    providers: RwLock<FxHashMap<String, Entry>>,
    /// Provider names currently referenced by at least one route; checked
    /// by `delete` to enforce the `InUse` failure (spec §4.2).
    in_use: RwLock<FxHashMap<String, usize>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(FxHashMap::default()),
            in_use: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        let registry = Self::new();
        let mut providers = registry.providers.write();
        for descriptor in descriptors {
            providers.insert(
                descriptor.name.clone(),
                Entry {
                    descriptor,
                    metrics: Arc::new(ProviderMetrics::default()),
                },
            );
        }
        drop(providers);
        registry
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] wrapping `DuplicateName` if a
    /// provider with this name already exists.
    pub fn add(&self, descriptor: ProviderDescriptor) -> Result<(), GatewayError> {
        let mut providers = self.providers.write();
        if providers.contains_key(&descriptor.name) {
            return Err(GatewayError::InvalidRequest(format!(
                "DuplicateName: provider '{}' already exists",
                descriptor.name
            )));
        }
        providers.insert(
            descriptor.name.clone(),
            Entry {
                descriptor,
                metrics: Arc::new(ProviderMetrics::default()),
            },
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::ModelNotFound`] (standing in for `NotFound`)
    /// when no provider with this name is registered.
    pub fn update(&self, name: &str, descriptor: ProviderDescriptor) -> Result<(), GatewayError> {
        let mut providers = self.providers.write();
        let entry = providers
            .get_mut(name)
            .ok_or_else(|| GatewayError::ModelNotFound(format!("provider '{name}' not found")))?;
        entry.descriptor = descriptor;
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if absent; `InvalidRequest` wrapping `InUse` if any route
    /// still references this provider.
    pub fn delete(&self, name: &str) -> Result<(), GatewayError> {
        if self.in_use.read().get(name).copied().unwrap_or(0) > 0 {
            return Err(GatewayError::InvalidRequest(format!(
                "InUse: provider '{name}' is referenced by an active route"
            )));
        }
        let mut providers = self.providers.write();
        if providers.remove(name).is_none() {
            return Err(GatewayError::ModelNotFound(format!(
                "provider '{name}' not found"
            )));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn get(&self, name: &str) -> Result<ProviderView, GatewayError> {
        let providers = self.providers.read();
        let entry = providers
            .get(name)
            .ok_or_else(|| GatewayError::ModelNotFound(format!("provider '{name}' not found")))?;
        Ok(ProviderView {
            descriptor: entry.descriptor.clone(),
            metrics: Arc::clone(&entry.metrics),
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProviderView> {
        self.providers
            .read()
            .values()
            .map(|entry| ProviderView {
                descriptor: entry.descriptor.clone(),
                metrics: Arc::clone(&entry.metrics),
            })
            .collect()
    }

    /// Called by the router/config loader when a route table is (re)built,
    /// so `delete` can enforce `InUse`.
    pub fn set_route_references(&self, counts: FxHashMap<String, usize>) {
        *self.in_use.write() = counts;
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
