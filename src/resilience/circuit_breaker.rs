//! Circuit breaker for provider protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: provider assumed down, calls fail fast
//! - Half-Open: one trial call tests whether the provider recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: open_timeout elapsed since last failure, at call time
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - Per-provider circuit breaker (not global)
//! - Fail fast in Open state, the wrapped operation is never invoked
//! - Exactly one trial in flight while Half-Open
//! - No internal retries; callers decide what to do with a rejection

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use serde::Serialize;

use crate::clock::{self, Clock};
use crate::config::BreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned instead of running the operation when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError {
    /// Name of the breaker that refused the call.
    pub breaker: String,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The breaker refused the call; the operation was not invoked.
    #[error(transparent)]
    Open(CircuitOpenError),
    /// The operation ran and returned this error.
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::Open(_))
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Inner(e) => Some(e),
            CallError::Open(_) => None,
        }
    }
}

/// Point-in-time view of a breaker, for admin endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub available: bool,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Milliseconds since the most recent recorded failure.
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every transition; results from an older epoch are ignored.
    epoch: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal { epoch: u64 },
    Trial { epoch: u64 },
}

/// Per-provider failure isolation.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_threshold", &self.failure_threshold)
            .field("open_timeout", &self.open_timeout)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker on the system clock.
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::with_clock(name, config, clock::system())
    }

    /// Create a closed breaker reading time from `clock`.
    pub fn with_clock(name: impl Into<String>, config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker = Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: config.open_timeout(),
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
                epoch: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        };
        metrics::record_breaker_state(&breaker.name, CircuitState::Closed as u8);
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. Reading never moves the breaker.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call made right now would run the operation.
    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        self.admits(&inner, self.clock.now())
    }

    fn admits(&self, inner: &Inner, now: Instant) -> bool {
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(inner, now),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    fn cooldown_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        match inner.last_failure {
            Some(at) => now.saturating_duration_since(at) >= self.open_timeout,
            None => true,
        }
    }

    /// Run `f` if the breaker admits it and record the outcome.
    ///
    /// The operation's error is returned unchanged inside [`CallError::Inner`].
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let guard = self.admit().map_err(CallError::<E>::Open)?;
        let result = f();
        guard.complete(result.is_ok());
        result.map_err(CallError::Inner)
    }

    /// Async form of [`call`](Self::call).
    ///
    /// If the future is dropped before finishing, a trial slot is released
    /// without recording an outcome.
    pub async fn call_async<T, E, Fut>(&self, fut: Fut) -> Result<T, CallError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = self.admit().map_err(CallError::<E>::Open)?;
        let result = fut.await;
        guard.complete(result.is_ok());
        result.map_err(CallError::Inner)
    }

    fn admit(&self) -> Result<AdmissionGuard<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let state = inner.state;

        let admission = match state {
            CircuitState::Closed => Admission::Normal { epoch: inner.epoch },
            CircuitState::Open if self.cooldown_elapsed(&inner, now) => {
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                Admission::Trial { epoch: inner.epoch }
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Admission::Trial { epoch: inner.epoch }
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.total_rejections += 1;
                drop(inner);
                metrics::record_breaker_rejection(&self.name);
                tracing::debug!(breaker = %self.name, "Call rejected, circuit open");
                return Err(CircuitOpenError {
                    breaker: self.name.clone(),
                });
            }
        };

        if let Admission::Trial { .. } = admission {
            tracing::info!(breaker = %self.name, "Allowing trial call");
        }

        Ok(AdmissionGuard {
            breaker: self,
            admission,
            completed: false,
        })
    }

    fn complete(&self, admission: Admission, success: bool) {
        let mut inner = self.lock();
        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }

        match admission {
            Admission::Trial { epoch } => {
                if inner.epoch != epoch || inner.state != CircuitState::HalfOpen {
                    return;
                }
                inner.trial_in_flight = false;
                if success {
                    inner.failure_count = 0;
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    inner.last_failure = Some(self.clock.now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            Admission::Normal { epoch } => {
                if inner.epoch != epoch || inner.state != CircuitState::Closed {
                    return;
                }
                if success {
                    inner.failure_count = 0;
                } else {
                    self.register_closed_failure(&mut inner);
                }
            }
        }
    }

    fn release_trial(&self, admission: Admission) {
        if let Admission::Trial { epoch } = admission {
            let mut inner = self.lock();
            if inner.epoch == epoch {
                inner.trial_in_flight = false;
            }
        }
    }

    fn register_closed_failure(&self, inner: &mut Inner) {
        inner.failure_count += 1;
        inner.last_failure = Some(self.clock.now());
        if inner.failure_count >= self.failure_threshold {
            tracing::warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                "Failure threshold reached, opening circuit"
            );
            self.transition(inner, CircuitState::Open);
        }
    }

    /// Record an outcome observed outside of [`call`](Self::call), such as a
    /// health probe or a passively reported request result.
    ///
    /// A success while Open moves to Half-Open, so the next call acts as the
    /// confirming trial; a success while Half-Open closes the breaker. A
    /// failure while Open restarts the cooldown.
    pub fn record_result(&self, success: bool) {
        let mut inner = self.lock();
        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.failure_count = 0,
            (CircuitState::Closed, false) => self.register_closed_failure(&mut inner),
            (CircuitState::Open, true) => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
            (CircuitState::Open, false) => inner.last_failure = Some(self.clock.now()),
            (CircuitState::HalfOpen, true) => {
                inner.trial_in_flight = false;
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, false) => {
                inner.trial_in_flight = false;
                inner.last_failure = Some(self.clock.now());
                self.transition(&mut inner, CircuitState::Open);
            }
        }
    }

    /// Force the breaker closed and forget its failure history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        if inner.state == CircuitState::Closed {
            inner.epoch += 1;
        } else {
            self.transition(&mut inner, CircuitState::Closed);
        }
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let now = self.clock.now();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            available: self.admits(&inner, now),
            consecutive_failures: inner.failure_count,
            failure_threshold: self.failure_threshold,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            last_failure_ms_ago: inner.last_failure.map(|at| {
                let ago = now.saturating_duration_since(at).as_millis();
                u64::try_from(ago).unwrap_or(u64::MAX)
            }),
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.epoch += 1;
        if from != to {
            tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed");
            metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
            metrics::record_breaker_state(&self.name, to as u8);
        }
    }
}

/// Holds an admitted call until its outcome is known.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    completed: bool,
}

impl AdmissionGuard<'_> {
    fn complete(mut self, success: bool) {
        self.completed = true;
        self.breaker.complete(self.admission, success);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release_trial(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, timeout_ms: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let config = BreakerConfig {
            failure_threshold: threshold,
            open_timeout_ms: timeout_ms,
        };
        let cb = CircuitBreaker::with_clock("provider-test", &config, Arc::new(clock.clone()));
        (cb, clock)
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(|| Err("boom"))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(|| Ok(()))
    }

    #[test]
    fn test_defaults() {
        let cb = CircuitBreaker::new("provider-1", &BreakerConfig::default());
        assert_eq!(cb.name(), "provider-1");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_threshold(), 5);
        assert_eq!(cb.open_timeout(), Duration::from_secs(30));
        assert!(cb.is_available());
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let (cb, _clock) = breaker(3, 1000);

        assert!(fail(&cb).is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(fail(&cb).is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(fail(&cb).is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _clock) = breaker(3, 1000);

        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        succeed(&cb).unwrap();
        assert_eq!(cb.stats().consecutive_failures, 0);

        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_without_invoking() {
        let (cb, clock) = breaker(1, 1000);
        fail(&cb).unwrap_err();

        let calls = AtomicUsize::new(0);
        clock.advance(Duration::from_millis(500));
        let err = cb
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(err.to_string(), "circuit breaker is open");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.stats().total_rejections, 1);
    }

    #[test]
    fn test_inner_error_propagated_unchanged() {
        let (cb, _clock) = breaker(5, 1000);
        let err = cb.call(|| Err::<(), _>(42u32)).unwrap_err();
        assert_eq!(err.into_inner(), Some(42));
    }

    #[test]
    fn test_read_does_not_transition() {
        let (cb, clock) = breaker(1, 1000);
        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(1100));

        assert!(cb.is_available());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_available());
    }

    #[test]
    fn test_full_recovery_cycle() {
        let (cb, clock) = breaker(3, 1000);
        for _ in 0..3 {
            fail(&cb).unwrap_err();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(500));
        let calls = AtomicUsize::new(0);
        let rejected = cb.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(rejected.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_millis(600));
        cb.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Failure count restarted, one failure does not reopen.
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 1);
    }

    #[test]
    fn test_trial_failure_reopens_and_restarts_cooldown() {
        let (cb, clock) = breaker(2, 1000);
        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();

        clock.advance(Duration::from_millis(1000));
        let err = fail(&cb).unwrap_err();
        assert!(!err.is_circuit_open());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(999));
        assert!(!cb.is_available());
        assert!(succeed(&cb).unwrap_err().is_circuit_open());

        clock.advance(Duration::from_millis(1));
        assert!(cb.is_available());
        succeed(&cb).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_single_trial_while_half_open() {
        let (cb, clock) = breaker(1, 100);
        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(100));

        let nested = cb.call(|| {
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            assert!(!cb.is_available());
            // A second call during the trial is refused.
            let second = cb.call(|| Ok::<_, &str>(()));
            assert!(second.unwrap_err().is_circuit_open());
            Ok::<_, &str>(())
        });

        assert!(nested.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_panicking_trial_releases_slot() {
        let (cb, clock) = breaker(1, 100);
        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(100));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cb.call(|| -> Result<(), &str> { panic!("provider client panicked") });
        }));
        assert!(outcome.is_err());

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_available());
        succeed(&cb).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_closed_result_ignored_after_trip() {
        let (cb, _clock) = breaker(1, 1000);
        let result = cb.call(|| {
            // Another caller trips the breaker while this call is in flight.
            cb.record_result(false);
            Ok::<_, &str>(())
        });

        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_record_result_paths() {
        let (cb, _clock) = breaker(2, 1000);

        cb.record_result(false);
        cb.record_result(false);
        assert_eq!(cb.state(), CircuitState::Open);

        // Probe success while open only half-opens.
        cb.record_result(true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_available());

        cb.record_result(false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.record_result(true);
        cb.record_result(true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_while_open_extends_cooldown() {
        let (cb, clock) = breaker(1, 1000);
        cb.record_result(false);

        clock.advance(Duration::from_millis(800));
        cb.record_result(false);
        clock.advance(Duration::from_millis(800));

        assert!(!cb.is_available());
    }

    #[test]
    fn test_reset() {
        let (cb, _clock) = breaker(1, 60_000);
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        let stats = cb.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_failure_ms_ago.is_none());
        succeed(&cb).unwrap();
    }

    #[test]
    fn test_stats_last_failure_age() {
        let (cb, clock) = breaker(3, 1000);
        assert!(cb.stats().last_failure_ms_ago.is_none());

        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(cb.stats().last_failure_ms_ago, Some(1500));
    }

    #[test]
    fn test_instances_are_independent() {
        let (cb1, _c1) = breaker(5, 1000);
        let (cb2, _c2) = breaker(5, 1000);
        for _ in 0..5 {
            fail(&cb1).unwrap_err();
        }
        assert_eq!(cb1.state(), CircuitState::Open);
        assert_eq!(cb2.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_calls_single_trial() {
        let (cb, clock) = breaker(1, 100);
        let cb = Arc::new(cb);
        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(100));

        let invoked = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                let invoked = invoked.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let _ = cb.call(|| {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Err::<(), _>("still down")
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_call_async() {
        let (cb, clock) = breaker(1, 100);
        let err = cb.call_async(async { Err::<(), _>("timeout") }).await.unwrap_err();
        assert_eq!(err.into_inner(), Some("timeout"));
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb
            .call_async(async { Ok::<_, &str>(1) })
            .await
            .unwrap_err()
            .is_circuit_open());

        clock.advance(Duration::from_millis(100));
        let value = cb.call_async(async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_future_releases_slot() {
        let (cb, clock) = breaker(1, 100);
        fail(&cb).unwrap_err();
        clock.advance(Duration::from_millis(100));

        let pending = cb.call_async(std::future::pending::<Result<(), &str>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_available());
    }
}
