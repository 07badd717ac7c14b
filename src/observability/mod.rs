//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! cache / dedup / retry / circuit breaker
//!     → tracing events (structured fields: key, circuit, attempt, phase)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Prometheus exporter (optional)
//! ```

pub mod logging;
pub mod metrics;
