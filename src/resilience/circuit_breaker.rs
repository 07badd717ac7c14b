//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests go straight to the fallback chain
//! - Half-Open: a limited number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:     >= min_requests_before_trip observed and
//!                    (failure_count >= threshold or failure ratio > 0.5)
//! Open → Half-Open:  recovery_timeout elapsed since the last failure
//!                    (lazily on the next call, or by the health monitor)
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open:  any probe failure
//! any → Open:        force_open()
//! any → Closed:      reset()
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, shared by every call site using it
//! - All state behind a single mutex; no lock is held across an await
//! - The trip ratio and request minimum use lifetime totals by default;
//!   `TripWindow::SinceClosed` restarts them each time the circuit closes
//! - Cancelled calls are invisible to the breaker

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::{BreakerConfig, FailureDecay, TripWindow};
use crate::error::{ErrorKind, QueryError, QueryResult};
use crate::observability::metrics;
use crate::resilience::adaptive::adaptive_threshold;
use crate::resilience::fallback::{FallbackContext, FallbackRequest, Resolved};
use crate::resilience::timeouts::with_timeout;

const FAILURE_HISTORY: usize = 100;
const RESPONSE_TIME_SAMPLES: usize = 50;
const EVENT_CAPACITY: usize = 64;

/// Circuit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitPhase::Closed => 0.0,
            CircuitPhase::HalfOpen => 1.0,
            CircuitPhase::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Tripped,
    RecoveryTimeoutElapsed,
    Recovered,
    ProbeFailed,
    ForcedOpen,
    Reset,
}

/// Broadcast on every phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerEvent {
    pub circuit: String,
    pub from: CircuitPhase,
    pub to: CircuitPhase,
    pub reason: TransitionReason,
    pub at_ms: u64,
}

/// One recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub at_ms: u64,
    pub kind: ErrorKind,
    pub latency_ms: u64,
}

/// Cumulative counters, never reset by transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub rejected_requests: u64,
    pub circuit_open_count: u64,
    pub fallback_executions: u64,
}

/// Read-only view for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub phase: CircuitPhase,
    pub is_open: bool,
    pub is_half_open: bool,
    pub is_closed: bool,
    pub failure_count: u32,
    pub success_count: u32,
    pub current_threshold: u32,
    /// Percentage of successful requests; 100 before any request.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub last_transition_at: u64,
    pub metrics: BreakerMetrics,
}

#[derive(Debug)]
struct BreakerState {
    config: BreakerConfig,
    phase: CircuitPhase,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_ms: Option<u64>,
    last_success_ms: Option<u64>,
    last_transition_at: Instant,
    last_transition_ms: u64,
    failure_history: VecDeque<FailureRecord>,
    response_times: VecDeque<Duration>,
    /// Requests and failures since the circuit last closed.
    window_requests: u64,
    window_failures: u64,
    half_open_in_flight: u32,
    /// Bumped on each entry into Half-Open so stale probe permits are ignored.
    half_open_epoch: u64,
    metrics: BreakerMetrics,
}

impl BreakerState {
    fn threshold(&self) -> u32 {
        if self.config.enable_adaptive_thresholds {
            adaptive_threshold(self.config.failure_threshold, self.failure_history.iter().map(|f| &f.kind))
        } else {
            self.config.failure_threshold
        }
    }

    fn should_open(&self) -> bool {
        let (requests, failures) = match self.config.trip_window {
            TripWindow::Cumulative => (self.metrics.total_requests, self.metrics.failed_requests),
            TripWindow::SinceClosed => (self.window_requests, self.window_failures),
        };
        if requests < self.config.min_requests_before_trip.max(1) {
            return false;
        }
        let ratio = failures as f64 / requests as f64;
        self.failure_count >= self.threshold() || ratio > 0.5
    }

    fn recovery_elapsed(&self, now: Instant) -> bool {
        let since = match self.last_failure_at {
            Some(failed) => failed.max(self.last_transition_at),
            None => self.last_transition_at,
        };
        now.saturating_duration_since(since) >= self.config.recovery_timeout()
    }

    fn avg_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        self.response_times.iter().sum::<Duration>() / self.response_times.len() as u32
    }
}

/// Admission granted by the breaker for one attempt.
enum Admission {
    Closed,
    Probe { epoch: u64 },
}

/// Releases a half-open probe slot when the attempt ends, however it ends.
struct ProbePermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: Option<u64>,
}

impl Drop for ProbePermit<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch {
            let mut state = self.breaker.lock();
            if state.half_open_epoch == epoch {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

/// Named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    state: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        tracing::info!(
            circuit = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        let state = BreakerState {
            config,
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_failure_ms: None,
            last_success_ms: None,
            last_transition_at: clock.now(),
            last_transition_ms: clock.epoch_millis(),
            failure_history: VecDeque::with_capacity(FAILURE_HISTORY),
            response_times: VecDeque::with_capacity(RESPONSE_TIME_SAMPLES),
            window_requests: 0,
            window_failures: 0,
            half_open_in_flight: 0,
            half_open_epoch: 0,
            metrics: BreakerMetrics::default(),
        };

        Self {
            name,
            state: Mutex::new(state),
            clock,
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    pub fn config(&self) -> BreakerConfig {
        self.lock().config.clone()
    }

    /// Receive every subsequent phase change.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Run one guarded attempt of `operation`.
    ///
    /// Returns `CircuitOpen` without invoking `operation` when the circuit
    /// rejects the call. Failures are recorded and returned unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<T>>,
    {
        let (admission, timeout) = self.admit()?;
        let _permit = ProbePermit {
            breaker: self,
            epoch: match admission {
                Admission::Probe { epoch } => Some(epoch),
                Admission::Closed => None,
            },
        };

        let started = self.clock.now();
        let result = with_timeout(timeout, operation()).await;
        let latency = self.clock.now().saturating_duration_since(started);

        match &result {
            Ok(_) => self.record_success(latency),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(circuit = %self.name, "Attempt cancelled, not recorded");
            }
            Err(e) => self.record_failure(e, latency),
        }
        result
    }

    /// Run `operation` under the breaker, resolving failures through the
    /// fallback chain. Only cancellation and configuration errors are returned
    /// as `Err`.
    pub async fn call<T, F, Fut>(&self, ctx: &FallbackContext<'_, T>, operation: F) -> QueryResult<Resolved<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = QueryResult<T>>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(Resolved::Success(value)),
            Err(e) => self.resolve_fallback(ctx, e).await,
        }
    }

    /// Convert a failed outcome into a fallback value.
    pub async fn resolve_fallback<T>(&self, ctx: &FallbackContext<'_, T>, error: QueryError) -> QueryResult<Resolved<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if matches!(error.kind(), ErrorKind::Cancelled | ErrorKind::Configuration) {
            return Err(error);
        }

        let (phase, strategy) = {
            let mut state = self.lock();
            state.metrics.fallback_executions += 1;
            (state.phase, state.config.fallback_strategy)
        };

        let request = FallbackRequest {
            circuit: self.name.clone(),
            key: ctx.key.map(str::to_string),
            phase,
            error,
        };
        Ok(ctx.resolve(request, strategy, self.clock.epoch_millis()).await)
    }

    /// Move an open circuit to half-open if its recovery timeout elapsed.
    pub fn try_recover(&self) -> bool {
        let mut state = self.lock();
        if state.phase == CircuitPhase::Open && state.recovery_elapsed(self.clock.now()) {
            self.transition(&mut state, CircuitPhase::HalfOpen, TransitionReason::RecoveryTimeoutElapsed);
            true
        } else {
            false
        }
    }

    /// Open the circuit regardless of its counters.
    pub fn force_open(&self) {
        let mut state = self.lock();
        self.transition(&mut state, CircuitPhase::Open, TransitionReason::ForcedOpen);
    }

    /// Close the circuit and clear its counters and failure history.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.failure_history.clear();
        self.transition(&mut state, CircuitPhase::Closed, TransitionReason::Reset);
    }

    /// Replace the configuration; the phase and counters are kept.
    pub fn update_config(&self, config: BreakerConfig) {
        let mut state = self.lock();
        if state.config != config {
            tracing::info!(circuit = %self.name, "Circuit breaker configuration updated");
            state.config = config;
        }
    }

    /// Most recent failures, oldest first.
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.lock().failure_history.iter().copied().collect()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        let metrics = state.metrics;
        let success_rate = if metrics.total_requests == 0 {
            100.0
        } else {
            metrics.successful_requests as f64 / metrics.total_requests as f64 * 100.0
        };

        BreakerSnapshot {
            name: self.name.clone(),
            phase: state.phase,
            is_open: state.phase == CircuitPhase::Open,
            is_half_open: state.phase == CircuitPhase::HalfOpen,
            is_closed: state.phase == CircuitPhase::Closed,
            failure_count: state.failure_count,
            success_count: state.success_count,
            current_threshold: state.threshold(),
            success_rate,
            avg_response_time_ms: state.avg_response_time().as_secs_f64() * 1000.0,
            total_requests: metrics.total_requests,
            last_failure_at: state.last_failure_ms,
            last_success_at: state.last_success_ms,
            last_transition_at: state.last_transition_ms,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> QueryResult<(Admission, Duration)> {
        let mut state = self.lock();

        if state.phase == CircuitPhase::Open {
            if state.recovery_elapsed(self.clock.now()) {
                self.transition(&mut state, CircuitPhase::HalfOpen, TransitionReason::RecoveryTimeoutElapsed);
            } else {
                return Err(self.reject(&mut state));
            }
        }

        let timeout = state.config.timeout();
        if state.phase == CircuitPhase::HalfOpen {
            if state.half_open_in_flight >= state.config.half_open_max_probes.max(1) {
                return Err(self.reject(&mut state));
            }
            state.half_open_in_flight += 1;
            return Ok((Admission::Probe { epoch: state.half_open_epoch }, timeout));
        }

        Ok((Admission::Closed, timeout))
    }

    fn reject(&self, state: &mut BreakerState) -> QueryError {
        state.metrics.rejected_requests += 1;
        metrics::record_circuit_rejected(&self.name);
        tracing::debug!(circuit = %self.name, phase = %state.phase, "Call rejected by circuit");
        QueryError::CircuitOpen {
            circuit: self.name.clone(),
        }
    }

    fn record_success(&self, latency: Duration) {
        let mut state = self.lock();
        push_bounded(&mut state.response_times, latency, RESPONSE_TIME_SAMPLES);
        state.metrics.total_requests += 1;
        state.metrics.successful_requests += 1;
        state.window_requests += 1;
        state.last_success_ms = Some(self.clock.epoch_millis());
        metrics::record_circuit_call(&self.name, "success", latency);

        match state.phase {
            CircuitPhase::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= state.config.success_threshold {
                    self.transition(&mut state, CircuitPhase::Closed, TransitionReason::Recovered);
                }
            }
            CircuitPhase::Closed => {
                state.failure_count = match state.config.failure_decay {
                    FailureDecay::Decay => state.failure_count.saturating_sub(1),
                    FailureDecay::Reset => 0,
                };
            }
            CircuitPhase::Open => {}
        }
    }

    fn record_failure(&self, error: &QueryError, latency: Duration) {
        let kind = error.kind();
        let mut state = self.lock();
        let now_ms = self.clock.epoch_millis();

        let record = FailureRecord {
            at_ms: now_ms,
            kind,
            latency_ms: latency.as_millis() as u64,
        };
        push_bounded(&mut state.failure_history, record, FAILURE_HISTORY);
        push_bounded(&mut state.response_times, latency, RESPONSE_TIME_SAMPLES);

        state.failure_count += 1;
        state.last_failure_at = Some(self.clock.now());
        state.last_failure_ms = Some(now_ms);
        state.metrics.total_requests += 1;
        state.metrics.failed_requests += 1;
        if kind == ErrorKind::Timeout {
            state.metrics.timeout_requests += 1;
        }
        state.window_requests += 1;
        state.window_failures += 1;

        let outcome = if kind == ErrorKind::Timeout { "timeout" } else { "failure" };
        metrics::record_circuit_call(&self.name, outcome, latency);
        tracing::debug!(
            circuit = %self.name,
            failure_count = state.failure_count,
            error = %error,
            "Failure recorded"
        );

        match state.phase {
            CircuitPhase::HalfOpen => {
                self.transition(&mut state, CircuitPhase::Open, TransitionReason::ProbeFailed);
            }
            CircuitPhase::Closed if state.should_open() => {
                self.transition(&mut state, CircuitPhase::Open, TransitionReason::Tripped);
            }
            _ => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitPhase, reason: TransitionReason) {
        let from = state.phase;
        let now_ms = self.clock.epoch_millis();
        state.phase = to;
        state.last_transition_at = self.clock.now();
        state.last_transition_ms = now_ms;

        match to {
            CircuitPhase::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
                state.window_requests = 0;
                state.window_failures = 0;
            }
            CircuitPhase::Open => {
                state.success_count = 0;
                state.metrics.circuit_open_count += 1;
            }
            CircuitPhase::HalfOpen => {
                state.success_count = 0;
                state.half_open_in_flight = 0;
                state.half_open_epoch += 1;
            }
        }

        match to {
            CircuitPhase::Open => tracing::warn!(
                circuit = %self.name,
                from = %from,
                ?reason,
                failure_count = state.failure_count,
                "Circuit opened"
            ),
            _ => tracing::info!(circuit = %self.name, from = %from, to = %to, ?reason, "Circuit transition"),
        }
        metrics::record_circuit_transition(&self.name, to.as_str(), to.gauge_value());

        let _ = self.events.send(BreakerEvent {
            circuit: self.name.clone(),
            from,
            to,
            reason,
            at_ms: now_ms,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}

fn push_bounded<V>(buffer: &mut VecDeque<V>, value: V, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}
