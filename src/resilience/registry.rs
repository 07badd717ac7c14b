//! Named circuit breakers.
//!
//! One breaker and one fallback registry per circuit name, created lazily on
//! first use. Configuration precedence for a circuit:
//! explicit `configure()` > `[circuits.<name>]` > `[circuit_breaker]`.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::validation::validate_breaker;
use crate::config::{BreakerConfig, ResilienceConfig};
use crate::error::{QueryError, QueryResult};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::resilience::fallback::FallbackRegistry;

pub struct BreakerRegistry<T> {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    fallbacks: DashMap<String, Arc<FallbackRegistry<T>>>,
    overrides: DashMap<String, BreakerConfig>,
    config: Arc<ArcSwap<ResilienceConfig>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + Sync + 'static> BreakerRegistry<T> {
    pub fn new(config: Arc<ArcSwap<ResilienceConfig>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            fallbacks: DashMap::new(),
            overrides: DashMap::new(),
            config,
            clock,
        }
    }

    /// Breaker for `name`, created on first use.
    pub fn get(&self, name: &str) -> QueryResult<Arc<CircuitBreaker>> {
        if name.trim().is_empty() {
            return Err(QueryError::configuration("circuit name must not be empty"));
        }
        if let Some(breaker) = self.breakers.get(name) {
            return Ok(Arc::clone(breaker.value()));
        }

        let config = self.effective_config(name);
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config, Arc::clone(&self.clock))));
        Ok(Arc::clone(breaker.value()))
    }

    /// Breaker for `name` if one was already created.
    pub fn existing(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Fallback registry for `name`, created on first use.
    pub fn fallbacks(&self, name: &str) -> Arc<FallbackRegistry<T>> {
        let registry = self
            .fallbacks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FallbackRegistry::new()));
        Arc::clone(registry.value())
    }

    /// Pin the configuration of one circuit, surviving config reloads.
    pub fn configure(&self, name: &str, config: BreakerConfig) -> QueryResult<()> {
        if name.trim().is_empty() {
            return Err(QueryError::configuration("circuit name must not be empty"));
        }

        let mut errors = Vec::new();
        validate_breaker(name, &config, &mut errors);
        if !errors.is_empty() {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            return Err(QueryError::configuration(message));
        }

        self.overrides.insert(name.to_string(), config.clone());
        self.get(name)?.update_config(config);
        tracing::info!(circuit = %name, "Circuit configured");
        Ok(())
    }

    /// Push reloaded defaults to every existing breaker without an explicit
    /// override. The live config itself is swapped by the owner.
    pub fn apply_config(&self) {
        for breaker in self.all() {
            breaker.update_config(self.effective_config(breaker.name()));
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self.all().iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn force_open_all(&self) {
        for breaker in self.all() {
            breaker.force_open();
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset();
        }
    }

    /// Drop a circuit together with its fallbacks and override.
    pub fn remove(&self, name: &str) -> bool {
        self.fallbacks.remove(name);
        self.overrides.remove(name);
        self.breakers.remove(name).is_some()
    }

    /// Move every health-checked open circuit whose recovery timeout elapsed
    /// to half-open. Returns how many moved.
    pub fn check_recovery(&self) -> usize {
        self.all()
            .iter()
            .filter(|breaker| breaker.config().enable_health_check)
            .filter(|breaker| breaker.try_recover())
            .count()
    }

    fn effective_config(&self, name: &str) -> BreakerConfig {
        match self.overrides.get(name) {
            Some(config) => config.value().clone(),
            None => self.config.load().breaker_for(name).clone(),
        }
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|b| Arc::clone(b.value())).collect()
    }
}
