//! Fallback chain.
//!
//! # Resolution order (first success wins)
//! ```text
//! 1. cached value            (cache_first only; stale is fine, expired is not)
//! 2. handlers by priority    (cache_first, degraded_service; a failing handler
//!                             is logged and the next one tried)
//! 3. static responses        (lowest priority value wins)
//! 4. ServiceUnavailable      (always available, so the chain cannot run dry)
//! ```
//!
//! The chain is stateless given its inputs; the registry it reads is only
//! mutated by explicit registration calls.

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::cache::CacheStore;
use crate::config::FallbackStrategy;
use crate::error::{QueryError, QueryResult};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitPhase;

/// What a fallback handler learns about the failed call.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub circuit: String,
    pub key: Option<String>,
    pub phase: CircuitPhase,
    pub error: QueryError,
}

type HandlerFn<T> = Arc<dyn Fn(FallbackRequest) -> BoxFuture<'static, QueryResult<T>> + Send + Sync>;

struct HandlerEntry<T> {
    name: String,
    priority: i32,
    seq: u64,
    handler: HandlerFn<T>,
}

struct StaticEntry<T> {
    name: String,
    priority: i32,
    seq: u64,
    data: T,
}

/// Where a fallback value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FallbackSource {
    Cache,
    Handler(String),
    Static(String),
}

impl FallbackSource {
    fn label(&self) -> &'static str {
        match self {
            FallbackSource::Cache => "cache",
            FallbackSource::Handler(_) => "handler",
            FallbackSource::Static(_) => "static",
        }
    }
}

/// Terminal payload returned when nothing else can answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUnavailable {
    pub error: String,
    pub circuit_name: String,
    pub phase: CircuitPhase,
    pub timestamp: u64,
}

impl ServiceUnavailable {
    pub fn new(circuit_name: impl Into<String>, phase: CircuitPhase, timestamp: u64) -> Self {
        Self {
            error: "service unavailable".to_string(),
            circuit_name: circuit_name.into(),
            phase,
            timestamp,
        }
    }
}

/// Outcome of a breaker-protected call.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Success(T),
    Fallback { value: T, source: FallbackSource },
    Unavailable(ServiceUnavailable),
}

impl<T> Resolved<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Resolved::Success(value) | Resolved::Fallback { value, .. } => Some(value),
            Resolved::Unavailable(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Resolved::Success(value) | Resolved::Fallback { value, .. } => Some(value),
            Resolved::Unavailable(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resolved::Success(_))
    }
}

/// Ordered fallback handlers and static responses for one circuit.
pub struct FallbackRegistry<T> {
    handlers: RwLock<Vec<HandlerEntry<T>>>,
    statics: RwLock<Vec<StaticEntry<T>>>,
    seq: AtomicU64,
}

impl<T> Default for FallbackRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            statics: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler. Lower priority runs first; equal
    /// priorities run in registration order. Re-using a name replaces it.
    pub fn register_fallback<F, Fut>(&self, name: impl Into<String>, priority: i32, handler: F)
    where
        F: Fn(FallbackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let name = name.into();
        let handler: HandlerFn<T> = Arc::new(move |request| handler(request).boxed());
        let entry = HandlerEntry {
            name: name.clone(),
            priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            handler,
        };

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|h| h.name != name);
        handlers.push(entry);
        handlers.sort_by_key(|h| (h.priority, h.seq));
        tracing::debug!(fallback = %name, priority, "Registered fallback handler");
    }

    /// Register a canned response. Re-using a name replaces it.
    pub fn set_static_response(&self, name: impl Into<String>, priority: i32, data: T) {
        let name = name.into();
        let entry = StaticEntry {
            name: name.clone(),
            priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            data,
        };

        let mut statics = self.statics.write().unwrap_or_else(PoisonError::into_inner);
        statics.retain(|s| s.name != name);
        statics.push(entry);
        statics.sort_by_key(|s| (s.priority, s.seq));
        tracing::debug!(fallback = %name, priority, "Registered static response");
    }

    /// Remove a handler or static response by name.
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        {
            let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
            let before = handlers.len();
            handlers.retain(|h| h.name != name);
            removed |= handlers.len() != before;
        }
        let mut statics = self.statics.write().unwrap_or_else(PoisonError::into_inner);
        let before = statics.len();
        statics.retain(|s| s.name != name);
        removed | (statics.len() != before)
    }

    /// Handler names in the order they are tried.
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    fn handlers_snapshot(&self) -> Vec<(String, HandlerFn<T>)> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| (h.name.clone(), Arc::clone(&h.handler)))
            .collect()
    }

    fn first_static(&self) -> Option<(String, T)> {
        self.statics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .map(|s| (s.name.clone(), s.data.clone()))
    }
}

/// Inputs of one fallback resolution.
pub struct FallbackContext<'a, T> {
    pub fallbacks: &'a FallbackRegistry<T>,
    pub cache: Option<&'a CacheStore<T>>,
    pub key: Option<&'a str>,
}

impl<'a, T: Clone + Send + Sync + 'static> FallbackContext<'a, T> {
    pub fn new(fallbacks: &'a FallbackRegistry<T>) -> Self {
        Self {
            fallbacks,
            cache: None,
            key: None,
        }
    }

    /// Enable the cache step, looking up `key`.
    pub fn with_cache(mut self, cache: &'a CacheStore<T>, key: &'a str) -> Self {
        self.cache = Some(cache);
        self.key = Some(key);
        self
    }

    /// Walk the chain for `request`.
    pub async fn resolve(
        &self,
        request: FallbackRequest,
        strategy: FallbackStrategy,
        timestamp_ms: u64,
    ) -> Resolved<T> {
        let circuit = request.circuit.clone();
        let resolved = self.walk(request, strategy, timestamp_ms).await;

        let label = match &resolved {
            Resolved::Fallback { source, .. } => source.label(),
            Resolved::Unavailable(_) => "unavailable",
            Resolved::Success(_) => "success",
        };
        metrics::record_fallback(&circuit, label);
        tracing::info!(circuit = %circuit, source = label, "Fallback resolved");
        resolved
    }

    async fn walk(&self, request: FallbackRequest, strategy: FallbackStrategy, timestamp_ms: u64) -> Resolved<T> {
        if strategy == FallbackStrategy::CacheFirst {
            if let (Some(cache), Some(key)) = (self.cache, self.key) {
                if let Some(entry) = cache.get(key) {
                    return Resolved::Fallback {
                        value: entry.value,
                        source: FallbackSource::Cache,
                    };
                }
            }
        }

        if strategy != FallbackStrategy::StaticResponse {
            for (name, handler) in self.fallbacks.handlers_snapshot() {
                match handler(request.clone()).await {
                    Ok(value) => {
                        return Resolved::Fallback {
                            value,
                            source: FallbackSource::Handler(name),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(circuit = %request.circuit, fallback = %name, error = %e, "Fallback handler failed");
                    }
                }
            }
        }

        if let Some((name, value)) = self.fallbacks.first_static() {
            return Resolved::Fallback {
                value,
                source: FallbackSource::Static(name),
            };
        }

        Resolved::Unavailable(ServiceUnavailable::new(request.circuit, request.phase, timestamp_ms))
    }
}
