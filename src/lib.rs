//! Client-side resilience layer for asynchronous queries.
//!
//! # Architecture Overview
//!
//! ```text
//!     fetch(key, operation)
//!     ─────────────────────────▶ ┌─────────────┐  fresh / stale hit
//!                                │    cache    │──────────────────────▶ value
//!                                └──────┬──────┘
//!                                       │ miss / stale
//!                                       ▼
//!                                ┌─────────────┐
//!                                │    dedup    │  one execution per key
//!                                └──────┬──────┘
//!                                       ▼
//!                                ┌─────────────┐
//!                                │    retry    │  exponential backoff
//!                                └──────┬──────┘
//!                                       ▼
//!                                ┌─────────────┐
//!                                │   circuit   │  closed / open / half-open
//!                                │   breaker   │──── failure ───┐
//!                                └──────┬──────┘                ▼
//!                                       │ success        ┌─────────────┐
//!                                       ▼                │  fallback   │
//!                                  cache put             │    chain    │
//!                                                        └─────────────┘
//!
//!     Cross-cutting: config (TOML + hot reload), observability (tracing,
//!     metrics), health (proactive recovery), clock (injectable time)
//! ```

// Core subsystems
pub mod cache;
pub mod clock;
pub mod error;
pub mod query;
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod health;
pub mod observability;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ResilienceConfig;
pub use error::{ErrorKind, QueryError, QueryResult};
pub use query::{FetchOptions, Fetched, QueryClient};
pub use resilience::{CircuitPhase, FallbackSource, Resolved, ServiceUnavailable};
