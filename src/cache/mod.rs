//! Cache subsystem.
//!
//! # Entry lifecycle
//! ```text
//! put()          → fresh    (age <= stale_after)
//! time passes    → stale    (stale_after < age <= ttl), still served
//! time passes    → expired  (age > ttl), dropped lazily on read
//! invalidate()   → removed
//! over capacity  → oldest insertion evicted
//! ```

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, CacheEvent, CacheMetadata, CacheSnapshot, SnapshotEntry};
pub use store::CacheStore;
