//! Circuit breaker for the reasoning channel
//!
//! Protects the step loop from hammering an unreachable or rate-limited
//! reasoning service. One breaker guards one channel and is shared across all
//! steps of a task.

use pilot_core::{PilotError, Result};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Too many failures - reject calls immediately
    Open,
    /// Cooldown elapsed - exactly one trial call allowed
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker to prevent cascading failures
///
/// # States
///
/// - **Closed**: calls go through; consecutive failures are counted
/// - **Open**: `threshold` failures reached; calls fail fast with
///   [`PilotError::CircuitOpen`] until `cooldown` has elapsed
/// - **HalfOpen**: one trial call; success closes the breaker, failure
///   reopens it and restarts the cooldown
///
/// # Example
///
/// ```
/// use pilot_agent::{CircuitBreaker, CircuitState};
/// use std::time::Duration;
///
/// let cb = CircuitBreaker::new(3, Duration::from_secs(60));
///
/// cb.record_failure();
/// cb.record_failure();
/// cb.record_failure();
///
/// assert_eq!(cb.state(), CircuitState::Open);
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    ///
    /// # Arguments
    ///
    /// * `threshold` - Consecutive failures before opening
    /// * `cooldown` - Time to stay open before allowing a trial call
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, moving Open to HalfOpen once the cooldown has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open && self.remaining(inner).is_zero() {
            debug!("Circuit breaker cooldown elapsed, half-open");
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }

    fn remaining(&self, inner: &Inner) -> Duration {
        inner
            .last_failure
            .map(|at| self.cooldown.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Admit a call or reject it with the time left until the next trial
    fn acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(())
            }
            // A trial is already running; wait a full cooldown for its verdict
            CircuitState::HalfOpen => Err(PilotError::CircuitOpen {
                retry_in: self.cooldown,
            }),
            CircuitState::Open => Err(PilotError::CircuitOpen {
                retry_in: self.remaining(&inner),
            }),
        }
    }

    /// Run `f` through the breaker
    ///
    /// Rejected calls never invoke `f`. Any error returned by `f` counts as a
    /// channel failure.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;

        // Frees the trial slot if the call is dropped before it settles
        let mut slot = TrialSlot {
            breaker: self,
            settled: false,
        };
        let outcome = f().await;
        slot.settled = true;

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Record a successful call (closes the breaker and resets the count)
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            debug!("Circuit breaker closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        let reopen = inner.state == CircuitState::HalfOpen;
        if reopen || inner.failure_count >= self.threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    "Circuit breaker OPEN after {} consecutive failures (cooldown {}ms)",
                    inner.failure_count,
                    self.cooldown.as_millis()
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Returns `true` if a call would currently be admitted
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.trial_in_flight,
            CircuitState::Open => false,
        }
    }

    /// Get current failure count (for monitoring)
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Time until a trial call is allowed, zero unless open
    pub fn time_until_retry(&self) -> Duration {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => self.remaining(&inner),
            _ => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
