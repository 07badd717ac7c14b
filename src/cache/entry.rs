//! Cache entry and the records derived from it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A cached value with its freshness window.
///
/// `stale_after <= ttl` always holds; the store clamps on insert.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    /// Monotonic insertion time, used for all age math.
    pub stored_at: Instant,
    /// Wall-clock insertion time in epoch milliseconds, for display and snapshots.
    pub stored_at_ms: u64,
    pub ttl: Duration,
    pub stale_after: Duration,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.ttl
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.age(now) > self.stale_after
    }
}

/// Display metadata for a cached key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub last_updated: u64,
    pub is_stale: bool,
}

/// Change notification delivered to key subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { key: String, stored_at_ms: u64 },
    Invalidated { key: String },
    Evicted { key: String },
}

/// Host-persistable copy of the cache contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot<T> {
    pub exported_at_ms: u64,
    pub entries: Vec<SnapshotEntry<T>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<T> {
    pub key: String,
    pub value: T,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
    pub stale_after_ms: u64,
}
