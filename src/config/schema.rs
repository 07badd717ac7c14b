//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the query layer.
//! All types derive Serde traits for deserialization from config files; every
//! section has defaults so a minimal (or empty) file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Cache, retry and refetch defaults applied to every `fetch`.
    pub query: QueryConfig,

    /// Breaker settings used for circuits without an explicit override.
    pub circuit_breaker: BreakerConfig,

    /// Per-circuit overrides keyed by circuit name.
    pub circuits: HashMap<String, BreakerConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ResilienceConfig {
    /// Breaker configuration for `circuit`, falling back to the default section.
    pub fn breaker_for(&self, circuit: &str) -> &BreakerConfig {
        self.circuits.get(circuit).unwrap_or(&self.circuit_breaker)
    }
}

/// Query defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Hard expiry of cache entries in milliseconds.
    pub ttl_ms: u64,

    /// Age after which an entry is served as stale, in milliseconds.
    pub stale_time_ms: u64,

    /// Total attempts per fetch, the first try included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add 0-10% random jitter to each backoff delay.
    pub retry_jitter: bool,

    /// Serve stale data while refreshing it in the background.
    pub background_refetch: bool,

    /// Maximum number of cache entries before eviction.
    pub max_entries: usize,
}

impl QueryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            stale_time_ms: 30_000,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retry_jitter: false,
            background_refetch: true,
            max_entries: 1_000,
        }
    }
}

/// Order in which the fallback chain is consulted.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Cached value, then handlers, then static responses.
    #[default]
    CacheFirst,
    /// Static responses only.
    StaticResponse,
    /// Handlers, then static responses.
    DegradedService,
}

/// What a success in the Closed phase does to the failure counter.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureDecay {
    /// Decrement by one, floored at zero.
    #[default]
    Decay,
    /// Reset to zero.
    Reset,
}

/// Request counts the trip ratio and minimum are measured against.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripWindow {
    /// Lifetime totals of the circuit.
    #[default]
    Cumulative,
    /// Requests since the circuit last closed.
    SinceClosed,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures needed to trip the circuit (before adaptive adjustment).
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Per-attempt deadline in milliseconds (0 disables it).
    pub timeout_ms: u64,

    /// Requests that must be observed before the circuit may trip.
    pub min_requests_before_trip: u64,

    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,

    /// Derive the threshold from recent failure kinds.
    pub enable_adaptive_thresholds: bool,

    /// Let the health monitor move open circuits to half-open proactively.
    pub enable_health_check: bool,

    /// Health monitor tick in milliseconds.
    pub health_check_interval_ms: u64,

    pub fallback_strategy: FallbackStrategy,

    pub failure_decay: FailureDecay,

    pub trip_window: TripWindow,

    /// Concurrent probes admitted while half-open.
    pub half_open_max_probes: u32,
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            timeout_ms: 10_000,
            min_requests_before_trip: 5,
            success_threshold: 2,
            enable_adaptive_thresholds: false,
            enable_health_check: true,
            health_check_interval_ms: 30_000,
            fallback_strategy: FallbackStrategy::CacheFirst,
            failure_decay: FailureDecay::Decay,
            trip_window: TripWindow::Cumulative,
            half_open_max_probes: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
