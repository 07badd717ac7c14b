//! Query client: the façade hosts call.
//!
//! # Data Flow
//! ```text
//! fetch(key, operation, options)
//!     → cache hit, fresh           → Fetched::Cached
//!     → cache hit, stale + refetch → Fetched::Cached { stale } + spawned refresh
//!     → otherwise load:
//!         dedup.rs (one execution per key)
//!         → RetryPolicy::execute
//!             → CircuitBreaker::execute (per attempt, when a circuit is named)
//!         → success: cache put → Fetched::Loaded
//!         → failure: fallback chain → Fetched::Fallback / Fetched::Unavailable
//!           (no circuit: the error propagates)
//! ```

use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::cache::{CacheEvent, CacheMetadata, CacheSnapshot, CacheStore};
use crate::clock::{Clock, TokioClock};
use crate::config::{validate_config, BreakerConfig, ResilienceConfig, ValidationError};
use crate::error::QueryResult;
use crate::health::{HealthMonitor, MonitorHandle};
use crate::query::dedup::Deduplicator;
use crate::query::options::{FetchOptions, Fetched};
use crate::resilience::{BreakerEvent, BreakerRegistry, BreakerSnapshot, FallbackContext, FallbackRequest};

struct ClientInner<T> {
    cache: CacheStore<T>,
    dedup: Deduplicator<Fetched<T>>,
    breakers: Arc<BreakerRegistry<T>>,
    config: Arc<ArcSwap<ResilienceConfig>>,
    clock: Arc<dyn Clock>,
}

/// Cache, deduplication, retries and circuit breaking behind one `fetch`.
///
/// Cheap to clone; clones share all state.
pub struct QueryClient<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for QueryClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> QueryClient<T> {
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(config: ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = CacheStore::new(Arc::clone(&clock), config.query.max_entries);
        let config = Arc::new(ArcSwap::from_pointee(config));
        let breakers = Arc::new(BreakerRegistry::new(Arc::clone(&config), Arc::clone(&clock)));

        Self {
            inner: Arc::new(ClientInner {
                cache,
                dedup: Deduplicator::new(),
                breakers,
                config,
                clock,
            }),
        }
    }

    /// Fetch options seeded from the current configuration.
    pub fn options(&self) -> FetchOptions {
        FetchOptions::from_config(&self.inner.config.load().query)
    }

    pub fn config(&self) -> Arc<ResilienceConfig> {
        self.inner.config.load_full()
    }

    /// Resolve `key`, from cache when possible, otherwise by running
    /// `operation` through the resilience pipeline.
    ///
    /// With a circuit named in `options`, only cancellation and configuration
    /// errors are returned as `Err`; every other failure resolves through the
    /// circuit's fallback chain.
    pub async fn fetch<F, Fut>(&self, key: &str, operation: F, options: FetchOptions) -> QueryResult<Fetched<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        if let Some(entry) = self.inner.cache.get(key) {
            if !self.inner.cache.is_stale(&entry) {
                return Ok(Fetched::Cached {
                    value: entry.value,
                    stale: false,
                });
            }
            if options.background_refetch {
                self.spawn_refresh(key, operation, options);
                return Ok(Fetched::Cached {
                    value: entry.value,
                    stale: true,
                });
            }
        }

        self.load(key, operation, options).await
    }

    /// Bypass the cache and load `key`, joining a load already in flight.
    pub async fn load<F, Fut>(&self, key: &str, operation: F, options: FetchOptions) -> QueryResult<Fetched<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let supersede = options.supersede;
        let client = self.clone();
        let owned_key = key.to_string();
        let run = move || client.pipeline(owned_key, operation, options);

        if supersede {
            self.inner.dedup.run_latest(key, run).await
        } else {
            self.inner.dedup.run(key, run).await
        }
    }

    /// Cancel the load in flight for `key`. Its callers receive `Cancelled`.
    pub fn cancel(&self, key: &str) -> bool {
        self.inner.dedup.cancel(key)
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner.dedup.in_flight(key)
    }

    pub fn invalidate(&self, key: &str) -> usize {
        self.inner.cache.invalidate(key)
    }

    /// Invalidate every key matching `pattern`, where `*` matches any run of
    /// characters.
    pub fn invalidate_matching(&self, pattern: &str) -> usize {
        let removed = self.inner.cache.invalidate_matching(|key| glob_match(pattern, key));
        tracing::debug!(pattern = %pattern, removed, "Invalidated matching keys");
        removed
    }

    /// Cache metadata for `key`: last update and staleness.
    pub fn query_state(&self, key: &str) -> Option<CacheMetadata> {
        self.inner.cache.metadata(key)
    }

    pub fn get_cached(&self, key: &str) -> Option<T> {
        self.inner.cache.get(key).map(|entry| entry.value)
    }

    /// Write `value` for `key` directly, using the configured ttl and stale time.
    pub fn set_query_data(&self, key: &str, value: T) {
        let options = self.options();
        self.inner.cache.put(key, value, options.ttl, options.stale_time);
    }

    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<CacheEvent> {
        self.inner.cache.subscribe(key)
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired()
    }

    pub fn export_snapshot(&self) -> CacheSnapshot<T> {
        self.inner.cache.export_snapshot()
    }

    pub fn import_snapshot(&self, snapshot: CacheSnapshot<T>) -> usize {
        self.inner.cache.import_snapshot(snapshot)
    }

    pub fn register_fallback<F, Fut>(&self, circuit: &str, name: impl Into<String>, priority: i32, handler: F)
    where
        F: Fn(FallbackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        self.inner.breakers.fallbacks(circuit).register_fallback(name, priority, handler);
    }

    pub fn set_static_response(&self, circuit: &str, name: impl Into<String>, priority: i32, data: T) {
        self.inner.breakers.fallbacks(circuit).set_static_response(name, priority, data);
    }

    pub fn configure_circuit(&self, name: &str, config: BreakerConfig) -> QueryResult<()> {
        self.inner.breakers.configure(name, config)
    }

    pub fn force_open(&self, circuit: &str) -> QueryResult<()> {
        self.inner.breakers.get(circuit)?.force_open();
        Ok(())
    }

    pub fn reset_circuit(&self, circuit: &str) -> QueryResult<()> {
        self.inner.breakers.get(circuit)?.reset();
        Ok(())
    }

    /// Snapshot of `circuit`, if it has been used or configured.
    pub fn circuit_state(&self, circuit: &str) -> Option<BreakerSnapshot> {
        self.inner.breakers.existing(circuit).map(|breaker| breaker.snapshot())
    }

    pub fn circuit_states(&self) -> Vec<BreakerSnapshot> {
        self.inner.breakers.snapshots()
    }

    pub fn subscribe_circuit(&self, circuit: &str) -> QueryResult<broadcast::Receiver<BreakerEvent>> {
        Ok(self.inner.breakers.get(circuit)?.subscribe())
    }

    /// Swap in a reloaded configuration. In-flight fetches keep the options
    /// they started with.
    pub fn apply_config(&self, config: ResilienceConfig) -> Result<(), Vec<ValidationError>> {
        validate_config(&config)?;
        self.inner.cache.set_max_entries(config.query.max_entries);
        self.inner.config.store(Arc::new(config));
        self.inner.breakers.apply_config();
        tracing::info!("Configuration applied");
        Ok(())
    }

    /// Start the periodic recovery check at the default breaker's
    /// `health_check_interval_ms`.
    pub fn spawn_health_monitor(&self) -> MonitorHandle {
        let interval = self.inner.config.load().circuit_breaker.health_check_interval();
        HealthMonitor::new(Arc::clone(&self.inner.breakers), interval).spawn()
    }

    /// Refreshes always join, never supersede. The refresh is registered
    /// before the task is spawned, so stale reads that follow in the same
    /// tick attach to it instead of starting another.
    fn spawn_refresh<F, Fut>(&self, key: &str, operation: F, options: FetchOptions)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let client = self.clone();
        let owned_key = key.to_string();
        let refresh = self
            .inner
            .dedup
            .attach(key, move || client.pipeline(owned_key, operation, options));

        let key = key.to_string();
        tracing::debug!(key = %key, "Serving stale value, refreshing in background");

        tokio::spawn(async move {
            match refresh.await {
                Ok(Fetched::Loaded(_)) => tracing::debug!(key = %key, "Background refresh stored"),
                Ok(_) => tracing::warn!(key = %key, "Background refresh fell back, cache unchanged"),
                Err(e) => tracing::warn!(key = %key, error = %e, "Background refresh failed"),
            }
        });
    }

    async fn pipeline<F, Fut>(self, key: String, operation: F, options: FetchOptions) -> QueryResult<Fetched<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let breaker = match options.circuit.as_deref() {
            Some(name) => Some(self.inner.breakers.get(name)?),
            None => None,
        };

        let result = {
            let guard = breaker.as_deref();
            let operation = &operation;
            options
                .retry_policy()
                .execute(self.inner.clock.as_ref(), move || async move {
                    match guard {
                        Some(breaker) => breaker.execute(operation).await,
                        None => operation().await,
                    }
                })
                .await
        };

        let error = match result {
            Ok(value) => {
                self.inner.cache.put(key.as_str(), value.clone(), options.ttl, options.stale_time);
                return Ok(Fetched::Loaded(value));
            }
            Err(error) => error,
        };

        match breaker {
            Some(breaker) => {
                let fallbacks = self.inner.breakers.fallbacks(breaker.name());
                let ctx = FallbackContext::new(&fallbacks).with_cache(&self.inner.cache, &key);
                Ok(breaker.resolve_fallback(&ctx, error).await?.into())
            }
            None => {
                tracing::warn!(key = %key, error = %error, "Fetch failed without a circuit");
                Err(error)
            }
        }
    }
}

/// `*` matches any run of characters, everything else matches literally.
fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
