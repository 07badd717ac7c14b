//! Shared utilities for integration tests.

#![allow(dead_code)]

use futures_util::future::{BoxFuture, FutureExt};
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use query_resilience::{ManualClock, QueryClient, QueryResult, ResilienceConfig};

/// Client driven by a manual clock.
pub fn manual_client(config: ResilienceConfig) -> (QueryClient<String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (QueryClient::with_clock(config, clock.clone()), clock)
}

/// A dependency whose answers are scripted by call number (0-based).
#[derive(Clone, Default)]
pub struct ScriptedDependency {
    calls: Arc<AtomicU32>,
}

impl ScriptedDependency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Operation that answers immediately.
    pub fn operation<F>(&self, respond: F) -> impl Fn() -> Ready<QueryResult<String>> + Send + Sync + 'static
    where
        F: Fn(u32) -> QueryResult<String> + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move || ready(respond(calls.fetch_add(1, Ordering::SeqCst)))
    }

    /// Operation that answers after `latency` of tokio time.
    pub fn slow_operation<F>(
        &self,
        latency: Duration,
        respond: F,
    ) -> impl Fn() -> BoxFuture<'static, QueryResult<String>> + Send + Sync + 'static
    where
        F: Fn(u32) -> QueryResult<String> + Send + Sync + 'static,
    {
        let calls = Arc::clone(&self.calls);
        let respond = Arc::new(respond);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let respond = Arc::clone(&respond);
            async move {
                tokio::time::sleep(latency).await;
                respond(n)
            }
            .boxed()
        }
    }
}
