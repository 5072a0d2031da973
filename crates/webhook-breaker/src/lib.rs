//! Circuit breaker guarding delivery to the downstream webhook sink.
//!
//! Three states: closed (normal operation), open (reject immediately), half-open
//! (a single probe window while testing recovery). See Michael Nygard's "Release It!"
//! for the general pattern this follows.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use webhook_common::metrics::Metrics;

/// Circuit breaker states, numbered to match the `webhook_circuit_breaker_state` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

/// Tunables for one circuit breaker instance.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before transitioning to OPEN.
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN before transitioning to CLOSED.
    pub half_open_required_successes: u32,
    /// How long to stay OPEN before permitting a HALF_OPEN probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_required_successes: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct State {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
        }
    }
}

/// A single circuit breaker instance, named for the downstream it gates.
///
/// All mutation happens under one lock; readers never observe a torn update.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
    metrics: Option<std::sync::Arc<Metrics>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State::default()),
            metrics: None,
        }
    }

    /// Attach a metrics registry so state transitions update the gauge.
    pub fn with_metrics(mut self, metrics: std::sync::Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether a delivery attempt may proceed right now. A `false` result
    /// means the caller should reschedule without consuming a delivery attempt.
    ///
    /// Observing an elapsed recovery timeout while OPEN transitions the breaker to
    /// HALF_OPEN as a side effect of this call.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(breaker = %self.name, "circuit transitioning to HALF_OPEN");
                    self.report_state(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.half_open_required_successes {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    info!(breaker = %self.name, "circuit transitioning to CLOSED (recovered)");
                    self.report_state(CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                warn!(breaker = %self.name, "recorded success while circuit is OPEN");
            }
        }
    }

    /// Record a failed delivery.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure_at = Some(Instant::now());
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    warn!(breaker = %self.name, failures = state.failure_count, "circuit transitioning to OPEN");
                    self.report_state(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.last_failure_at = Some(Instant::now());
                warn!(breaker = %self.name, "half-open probe failed, circuit transitioning to OPEN");
                self.report_state(CircuitState::Open);
            }
            CircuitState::Open => {
                state.failure_count += 1;
                state.last_failure_at = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.state.lock().success_count
    }

    pub fn reset(&self) {
        *self.state.lock() = State::default();
    }

    fn report_state(&self, state: CircuitState) {
        if let Some(metrics) = &self.metrics {
            metrics
                .circuit_breaker_state
                .with_label_values(&[&self.name])
                .set(state as u8 as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, half_open_required_successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "downstream",
            CircuitBreakerConfig {
                failure_threshold,
                half_open_required_successes,
                recovery_timeout: Duration::from_millis(20),
            },
        )
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(5, 3);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3, 2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_while_open_and_within_timeout() {
        let cb = breaker(1, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn half_open_after_timeout_and_closes_after_required_successes() {
        let cb = breaker(1, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cb = breaker(1, 2);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_returns_to_closed() {
        let cb = breaker(1, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let cb = breaker(3, 2);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }
}
