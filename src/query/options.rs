//! Per-fetch options and the value a fetch resolves to.

use std::time::Duration;

use crate::config::QueryConfig;
use crate::resilience::fallback::{FallbackSource, Resolved, ServiceUnavailable};
use crate::resilience::RetryPolicy;

/// Options for one `fetch`. Start from [`FetchOptions::from_config`] (or
/// `QueryClient::options`) and override what differs.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub ttl: Duration,
    pub stale_time: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_jitter: bool,
    pub background_refetch: bool,
    /// Circuit guarding the dependency. Without one, failures propagate.
    pub circuit: Option<String>,
    /// Latest wins: a new load replaces the one in flight instead of joining it.
    pub supersede: bool,
}

impl FetchOptions {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            ttl: config.ttl(),
            stale_time: config.stale_time(),
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retry_jitter: config.retry_jitter,
            background_refetch: config.background_refetch,
            circuit: None,
            supersede: false,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn background_refetch(mut self, enabled: bool) -> Self {
        self.background_refetch = enabled;
        self
    }

    pub fn circuit(mut self, name: impl Into<String>) -> Self {
        self.circuit = Some(name.into());
        self
    }

    pub fn latest_wins(mut self) -> Self {
        self.supersede = true;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay, self.max_delay).with_jitter(self.retry_jitter)
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

/// What a fetch resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// Served from cache. `stale` values may be refreshing in the background.
    Cached { value: T, stale: bool },
    /// Produced by the operation and now cached.
    Loaded(T),
    /// The operation failed; a fallback answered.
    Fallback { value: T, source: FallbackSource },
    /// The operation failed and nothing could answer.
    Unavailable(ServiceUnavailable),
}

impl<T> Fetched<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Fetched::Cached { value, .. } | Fetched::Fallback { value, .. } | Fetched::Loaded(value) => Some(value),
            Fetched::Unavailable(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Fetched::Cached { value, .. } | Fetched::Fallback { value, .. } | Fetched::Loaded(value) => Some(value),
            Fetched::Unavailable(_) => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Fetched::Cached { stale: true, .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Fetched::Fallback { .. } | Fetched::Unavailable(_))
    }
}

impl<T> From<Resolved<T>> for Fetched<T> {
    fn from(resolved: Resolved<T>) -> Self {
        match resolved {
            Resolved::Success(value) => Fetched::Loaded(value),
            Resolved::Fallback { value, source } => Fetched::Fallback { value, source },
            Resolved::Unavailable(payload) => Fetched::Unavailable(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_config() {
        let config = QueryConfig {
            ttl_ms: 5_000,
            stale_time_ms: 1_000,
            max_attempts: 4,
            ..QueryConfig::default()
        };
        let options = FetchOptions::from_config(&config).circuit("payments");

        assert_eq!(options.ttl, Duration::from_secs(5));
        assert_eq!(options.stale_time, Duration::from_secs(1));
        assert_eq!(options.circuit.as_deref(), Some("payments"));
        assert_eq!(options.retry_policy().max_attempts, 4);
        assert!(!options.supersede);
    }

    #[test]
    fn test_fetched_value_access() {
        let cached = Fetched::Cached { value: 1, stale: true };
        assert!(cached.is_stale());
        assert_eq!(cached.value(), Some(&1));

        let fallback: Fetched<i32> = Resolved::Fallback {
            value: 2,
            source: FallbackSource::Cache,
        }
        .into();
        assert!(fallback.is_fallback());
        assert_eq!(fallback.into_value(), Some(2));
    }
}
