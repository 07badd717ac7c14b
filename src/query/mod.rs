//! Query subsystem.
//!
//! # Data Flow
//! ```text
//! QueryClient::fetch (client.rs)
//!     → CacheStore lookup (fresh / stale / miss)
//!     → dedup.rs (attach to or start the single execution for the key)
//!     → resilience pipeline (retry → breaker → fallback)
//!     → Fetched<T> fanned out to every attached caller
//! ```
//!
//! # Design Decisions
//! - The deduplicated unit is the whole load, fallback included, so every
//!   attached caller sees the same outcome
//! - Dropping the last attached caller cancels the load
//! - Stale-while-revalidate refreshes run on spawned tasks and only log failures

pub mod client;
pub mod dedup;
pub mod options;

pub use client::QueryClient;
pub use dedup::Deduplicator;
pub use options::{FetchOptions, Fetched};
