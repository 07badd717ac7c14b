//! Key/value cache with TTL expiry, staleness and change notification.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cache::entry::{CacheEntry, CacheEvent, CacheMetadata, CacheSnapshot, SnapshotEntry};
use crate::clock::Clock;
use crate::observability::metrics;

const SUBSCRIBER_CAPACITY: usize = 16;

/// A thread-safe cache shared by cloning.
///
/// Eviction under capacity pressure drops the entry with the oldest
/// `stored_at`, i.e. LRU by insertion rather than by access. Callers that need
/// access-ordered LRU must wrap the store.
pub struct CacheStore<T> {
    entries: Arc<DashMap<String, CacheEntry<T>>>,
    subscribers: Arc<DashMap<String, broadcast::Sender<CacheEvent>>>,
    max_entries: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for CacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            subscribers: Arc::clone(&self.subscribers),
            max_entries: Arc::clone(&self.max_entries),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CacheStore<T> {
    /// Create an empty store. `max_entries == 0` disables eviction.
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            max_entries: Arc::new(AtomicUsize::new(max_entries)),
            clock,
        }
    }

    /// Look up `key`. Expired entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = self.clock.now();
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value().clone()));

        match lookup {
            None => {
                metrics::record_cache_lookup("miss");
                None
            }
            Some(Some(entry)) => {
                metrics::record_cache_lookup(if entry.is_stale(now) { "stale" } else { "fresh" });
                Some(entry)
            }
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                metrics::record_cache_lookup("expired");
                metrics::record_cache_size(self.entries.len());
                tracing::debug!(key = %key, "Cache entry expired");
                None
            }
        }
    }

    /// Store `value`, replacing any previous entry, and notify subscribers.
    pub fn put(&self, key: impl Into<String>, value: T, ttl: Duration, stale_after: Duration) {
        let key = key.into();
        let stale_after = if stale_after > ttl {
            tracing::warn!(key = %key, ?stale_after, ?ttl, "stale_after exceeds ttl, clamping");
            ttl
        } else {
            stale_after
        };

        let stored_at_ms = self.clock.epoch_millis();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            stored_at: self.clock.now(),
            stored_at_ms,
            ttl,
            stale_after,
        };
        self.entries.insert(key.clone(), entry);
        tracing::debug!(key = %key, ?ttl, ?stale_after, "Cache entry stored");

        self.notify(&key, CacheEvent::Updated { key: key.clone(), stored_at_ms });
        self.evict_overflow();
        metrics::record_cache_size(self.entries.len());
    }

    /// Remove `key`. Returns the number of entries removed.
    pub fn invalidate(&self, key: &str) -> usize {
        match self.entries.remove(key) {
            Some(_) => {
                self.notify(key, CacheEvent::Invalidated { key: key.to_string() });
                metrics::record_cache_size(self.entries.len());
                1
            }
            None => 0,
        }
    }

    /// Remove every key matching `predicate`. Returns the number removed.
    pub fn invalidate_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter().map(|key| self.invalidate(key)).sum()
    }

    pub fn is_stale(&self, entry: &CacheEntry<T>) -> bool {
        entry.is_stale(self.clock.now())
    }

    /// Display metadata for `key`, if it is cached and unexpired.
    pub fn metadata(&self, key: &str) -> Option<CacheMetadata> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| CacheMetadata {
                last_updated: entry.stored_at_ms,
                is_stale: entry.is_stale(now),
            })
    }

    /// Receive change events for `key`.
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<CacheEvent> {
        self.subscribers
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .subscribe()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache entries");
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_max_entries(&self, max_entries: usize) {
        self.max_entries.store(max_entries, Ordering::Relaxed);
        self.evict_overflow();
    }

    /// Copy all unexpired entries into a serializable snapshot.
    pub fn export_snapshot(&self) -> CacheSnapshot<T> {
        let now = self.clock.now();
        let entries = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| SnapshotEntry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                stored_at_ms: entry.stored_at_ms,
                ttl_ms: entry.ttl.as_millis() as u64,
                stale_after_ms: entry.stale_after.as_millis() as u64,
            })
            .collect();

        CacheSnapshot {
            exported_at_ms: self.clock.epoch_millis(),
            entries,
        }
    }

    /// Load entries from a snapshot, keeping their original age.
    ///
    /// Entries that expired in the meantime are skipped. Returns the number imported.
    pub fn import_snapshot(&self, snapshot: CacheSnapshot<T>) -> usize {
        let now = self.clock.now();
        let now_ms = self.clock.epoch_millis();
        let mut imported = 0;

        for item in snapshot.entries {
            let age = Duration::from_millis(now_ms.saturating_sub(item.stored_at_ms));
            let ttl = Duration::from_millis(item.ttl_ms);
            if age > ttl {
                continue;
            }

            let key = item.key;
            let entry = CacheEntry {
                key: key.clone(),
                value: item.value,
                stored_at: now.checked_sub(age).unwrap_or(now),
                stored_at_ms: item.stored_at_ms,
                ttl,
                stale_after: Duration::from_millis(item.stale_after_ms).min(ttl),
            };
            self.entries.insert(key.clone(), entry);
            self.notify(&key, CacheEvent::Updated { key: key.clone(), stored_at_ms: item.stored_at_ms });
            imported += 1;
        }

        self.evict_overflow();
        metrics::record_cache_size(self.entries.len());
        tracing::info!(imported, "Imported cache snapshot");
        imported
    }

    fn evict_overflow(&self) {
        let max = self.max_entries.load(Ordering::Relaxed);
        if max == 0 {
            return;
        }

        while self.entries.len() > max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());

            let Some(key) = oldest else { break };
            if self.entries.remove(&key).is_some() {
                tracing::debug!(key = %key, max_entries = max, "Evicted cache entry");
                metrics::record_cache_eviction();
                self.notify(&key, CacheEvent::Evicted { key: key.clone() });
            }
        }
    }

    fn notify(&self, key: &str, event: CacheEvent) {
        let abandoned = match self.subscribers.get(key) {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if abandoned {
            self.subscribers.remove_if(key, |_, tx| tx.receiver_count() == 0);
        }
    }
}
