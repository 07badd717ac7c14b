//! Time sources.
//!
//! Everything that reasons about age (cache TTLs, breaker recovery windows,
//! retry back-off) reads time through [`Clock`] so tests can drive it.
//! Per-attempt deadlines and the health monitor tick are timers rather than
//! ages and stay on tokio time.

use futures_util::future::{self, BoxFuture, FutureExt};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::Instant as TokioInstant;

/// Source of monotonic time, wall-clock time and delays.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic now, used for every age computation.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, used for externally visible timestamps.
    fn epoch_millis(&self) -> u64;

    /// Completes after `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by `tokio::time`; honours `tokio::time::pause()` in tests.
///
/// Wall time is read once at construction and then advanced by tokio time,
/// so `epoch_millis` and `now` never drift apart.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: TokioInstant,
    origin_epoch_ms: u64,
}

impl TokioClock {
    pub fn new() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            origin: TokioInstant::now(),
            origin_epoch_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        TokioInstant::now().into_std()
    }

    fn epoch_millis(&self) -> u64 {
        self.origin_epoch_ms + self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Manually driven clock.
///
/// `sleep` advances virtual time by the requested amount and resolves
/// immediately, so code that backs off can be measured without waiting.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_epoch_ms: u64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(1_700_000_000_000)
    }

    /// Clock whose wall time starts at `epoch_ms`.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_epoch_ms: epoch_ms,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn epoch_millis(&self) -> u64 {
        self.origin_epoch_ms + self.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        future::ready(()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::starting_at(1_000);
        let start = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));
        assert_eq!(clock.epoch_millis(), 1_250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();
        let start_ms = clock.epoch_millis();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(clock.now() - start >= Duration::from_secs(30));
        assert_eq!(clock.epoch_millis() - start_ms, 30_000);
    }
}
