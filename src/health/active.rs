//! Active recovery checking.
//!
//! # Responsibilities
//! - Periodically look at every circuit
//! - Move open circuits whose recovery timeout elapsed to half-open, so the
//!   next call probes instead of waiting for traffic to notice
//!
//! Circuits with `enable_health_check = false` are left to lazy recovery on
//! their next call.
//!
//! The tick runs on a tokio interval. Whether a circuit is due is still
//! decided by each breaker's own clock.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::resilience::BreakerRegistry;

pub struct HealthMonitor<T> {
    breakers: Arc<BreakerRegistry<T>>,
    interval: Duration,
}

impl<T: Clone + Send + Sync + 'static> HealthMonitor<T> {
    pub fn new(breakers: Arc<BreakerRegistry<T>>, interval: Duration) -> Self {
        Self { breakers, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            tracing::info!("Health monitor disabled, zero interval");
            return;
        }

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Health monitor starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let recovered = self.breakers.check_recovery();
                    if recovered > 0 {
                        tracing::info!(recovered, "Circuits moved to half-open");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> MonitorHandle {
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(rx));
        MonitorHandle { shutdown: tx, task }
    }
}

/// Handle to a spawned [`HealthMonitor`].
pub struct MonitorHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Health monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::ResilienceConfig;
    use crate::resilience::CircuitPhase;
    use arc_swap::ArcSwap;

    #[tokio::test(start_paused = true)]
    async fn test_moves_open_circuit_to_half_open() {
        let config = Arc::new(ArcSwap::from_pointee(ResilienceConfig::default()));
        let registry = Arc::new(BreakerRegistry::<String>::new(config, Arc::new(TokioClock::new())));
        let breaker = registry.get("payments").unwrap();
        breaker.force_open();

        let handle = HealthMonitor::new(Arc::clone(&registry), Duration::from_secs(30)).spawn();

        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(breaker.phase(), CircuitPhase::Open);

        // recovery due at 60s
        time::sleep(Duration::from_secs(32)).await;
        assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let config = Arc::new(ArcSwap::from_pointee(ResilienceConfig::default()));
        let registry = Arc::new(BreakerRegistry::<String>::new(config, Arc::new(TokioClock::new())));
        let handle = HealthMonitor::new(registry, Duration::from_millis(10)).spawn();
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
