//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Operation for a key:
//!     → retries.rs (re-run retryable failures with backoff.rs delays)
//!         → registry.rs (breaker for the circuit name)
//!         → circuit_breaker.rs (admission, accounting, transitions)
//!         → timeouts.rs (per-attempt deadline)
//!     → On final failure: fallback.rs (cache, handlers, statics, default payload)
//! ```
//!
//! # Design Decisions
//! - Every attempt passes through the breaker so it sees each failure
//! - A rejected call is never retried; it goes straight to the fallback chain
//! - The fallback chain always produces a value, so callers of a
//!   breaker-protected query never see a dependency error

pub mod adaptive;
pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerEvent, BreakerMetrics, BreakerSnapshot, CircuitBreaker, CircuitPhase, TransitionReason};
pub use fallback::{FallbackContext, FallbackRegistry, FallbackRequest, FallbackSource, Resolved, ServiceUnavailable};
pub use registry::BreakerRegistry;
pub use retries::RetryPolicy;
