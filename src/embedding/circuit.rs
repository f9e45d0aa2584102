//! Circuit breaker for the model runtime.
//!
//! After a run of consecutive failures the breaker opens and rejects calls
//! for a cooldown period, then allows a single probe (half-open). A probe
//! success closes the circuit; a probe failure re-opens it.

use crate::error::EmbedError;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast, cooldown active
    Open,
    /// Cooldown expired, probing recovery
    HalfOpen,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Failure-isolation breaker owned by the embedding generator.
///
/// Safe under concurrent access; every transition happens under one mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// `threshold` is the number of consecutive failures before tripping;
    /// `cooldown` is how long the circuit stays open before a probe.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Gate to call before attempting the model.
    ///
    /// Returns `Err(ModelUnavailable)` while the circuit is open and the
    /// cooldown has not elapsed. Once it has, the state moves to half-open
    /// and the call is allowed through as a probe.
    pub fn check(&self) -> Result<(), EmbedError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    let remaining = self.cooldown.saturating_sub(elapsed);
                    Err(EmbedError::ModelUnavailable(format!(
                        "circuit open after {} consecutive failures, retry in {}ms",
                        inner.consecutive_failures,
                        remaining.as_millis()
                    )))
                }
            }
        }
    }

    /// Records a successful call, closing the circuit.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.state = CircuitState::Closed;
    }

    /// Records a failed call. Trips the circuit open at the threshold, or
    /// immediately when a half-open probe fails.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        if inner.state == CircuitState::HalfOpen || inner.consecutive_failures >= self.threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    failures = inner.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker tripped open"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Current state, resolving an expired cooldown to half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(self.cooldown);
            if elapsed >= self.cooldown {
                return CircuitState::HalfOpen;
            }
        }
        inner.state
    }

    /// Consecutive failures recorded so far.
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Explicit reset back to closed; only the generator's `reset` calls this.
    pub fn reset(&self) {
        self.record_success();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_trips_open_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.check(),
            Err(EmbedError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_probe_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.check().is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(5, Duration::from_millis(10));
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.check().is_ok()); // half-open probe allowed
        breaker.record_failure(); // probe fails
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn test_explicit_reset() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }
}
