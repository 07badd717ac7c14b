//! In-flight request deduplication.
//!
//! # Sharing model
//! ```text
//! caller A ─┐
//! caller B ─┼─▶ Shared<Abortable<operation>> ──▶ one execution
//! caller C ─┘        ▲
//!                    └── pending map holds only a WeakShared
//! ```
//!
//! The pending map never keeps an operation alive: once the last attached
//! caller drops its future the operation is dropped with it. Completion (or
//! that drop) removes the pending entry through [`PendingGuard`], which only
//! removes the entry it registered.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{QueryError, QueryResult};
use crate::observability::metrics;

type SharedOperation<T> = Shared<BoxFuture<'static, QueryResult<T>>>;

/// Bookkeeping for one in-flight operation.
struct PendingOperation<T> {
    generation: u64,
    execution_id: Uuid,
    /// `None` only if the operation finished before it could be registered.
    future: Option<WeakShared<BoxFuture<'static, QueryResult<T>>>>,
    abort: AbortHandle,
}

/// Collapses concurrent operations on the same key into one execution.
pub struct Deduplicator<T> {
    pending: Arc<DashMap<String, PendingOperation<T>>>,
    generations: AtomicU64,
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Deduplicator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` unless one is already in flight for `key`, in which
    /// case attach to it. Every attached caller receives the same result.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        self.attach(key, operation).await
    }

    /// Like [`run`](Self::run), but registers synchronously and hands back
    /// the shared operation. The entry stays joinable for as long as the
    /// returned future is held, even before it is first polled.
    pub(crate) fn attach<F, Fut>(&self, key: &str, operation: F) -> SharedOperation<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get().upgrade() {
                Some(existing) => {
                    metrics::record_dedup_join();
                    tracing::debug!(
                        key = %key,
                        execution_id = %occupied.get().execution_id,
                        "Joined in-flight operation"
                    );
                    existing
                }
                None => {
                    let (pending, shared) = self.start(key, operation());
                    occupied.insert(pending);
                    shared
                }
            },
            Entry::Vacant(vacant) => {
                let (pending, shared) = self.start(key, operation());
                vacant.insert(pending);
                shared
            }
        }
    }

    /// Start `operation` for `key`, superseding any operation already in
    /// flight. Callers of the superseded operation receive `Cancelled`.
    pub async fn run_latest<F, Fut>(&self, key: &str, operation: F) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let (pending, shared) = self.start(key, operation());
        if let Some(previous) = self.pending.insert(key.to_string(), pending) {
            previous.abort.abort();
            tracing::debug!(
                key = %key,
                superseded = %previous.execution_id,
                "Superseded in-flight operation"
            );
        }
        shared.await
    }

    /// Abort the operation in flight for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, previous)) => {
                previous.abort.abort();
                tracing::debug!(key = %key, execution_id = %previous.execution_id, "Cancelled in-flight operation");
                true
            }
            None => false,
        }
    }

    /// Whether an operation for `key` is currently running.
    pub fn in_flight(&self, key: &str) -> bool {
        // The strong handle must outlive the map guard: dropping the last one
        // runs PendingGuard, which needs the shard lock.
        let running = self.pending.get(key).and_then(|pending| pending.upgrade());
        running.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn start<Fut>(&self, key: &str, operation: Fut) -> (PendingOperation<T>, SharedOperation<T>)
    where
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let execution_id = Uuid::new_v4();
        let (abort, registration) = AbortHandle::new_pair();
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key: key.to_string(),
            generation,
        };

        let future: BoxFuture<'static, QueryResult<T>> = async move {
            let _guard = guard;
            match Abortable::new(operation, registration).await {
                Ok(result) => result,
                Err(_aborted) => Err(QueryError::Cancelled),
            }
        }
        .boxed();

        let shared = future.shared();
        let weak = shared.downgrade();

        tracing::debug!(key = %key, execution_id = %execution_id, "Started operation");
        (
            PendingOperation {
                generation,
                execution_id,
                future: weak,
                abort,
            },
            shared,
        )
    }
}

impl<T: Clone> PendingOperation<T> {
    fn upgrade(&self) -> Option<SharedOperation<T>> {
        self.future.as_ref().and_then(WeakShared::upgrade)
    }
}

/// Removes a pending entry when its operation completes or is dropped.
struct PendingGuard<T> {
    pending: Arc<DashMap<String, PendingOperation<T>>>,
    key: String,
    generation: u64,
}

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.pending
            .remove_if(&self.key, |_, pending| pending.generation == generation);
    }
}
