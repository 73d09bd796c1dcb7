//! Circuit breaker for flaky downstream calls
//!
//! States:
//! - `Closed`: calls pass through; consecutive failures are counted
//! - `Open`: calls are rejected until `timeout` has elapsed since the last failure
//! - `HalfOpen`: exactly one trial call is let through; success closes the
//!   breaker, failure re-opens it and restarts the timeout window
//!
//! The breaker wraps a call, it never retries one. Put
//! [`retry_with_backoff`](crate::retry_with_backoff) inside `execute` when both
//! behaviors are wanted.

use crate::error::BreakerError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cool-down before a trial call (1 minute)
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

type StateCallback = Arc<dyn Fn(&str, BreakerState) + Send + Sync>;

/// One breaker per protected resource, living as long as the resource does
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
    on_state_change: Option<StateCallback>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}

/// Clears the half-open trial flag if the trial future is dropped before it settles.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a breaker with the default threshold (5) and timeout (60s)
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT)
    }

    pub fn with_config(name: impl Into<String>, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            on_state_change: None,
        }
    }

    /// Observe transitions as `(breaker name, new state)`
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, BreakerState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` unless the breaker is open.
    ///
    /// Rejected calls return [`BreakerError::Open`] without invoking the
    /// operation.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_trial = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: is_trial,
        };

        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success(is_trial);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(is_trial);
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether a call may proceed. Returns whether it is the half-open trial.
    fn admit<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut transition = None;
        let admitted = {
            let mut inner = self.lock();
            match inner.state {
                BreakerState::Closed => Ok(false),
                BreakerState::Open => {
                    let cooled = match inner.last_failure {
                        None => true,
                        Some(at) => at.elapsed() >= self.timeout,
                    };
                    if cooled {
                        inner.state = BreakerState::HalfOpen;
                        inner.trial_in_flight = true;
                        transition = Some(BreakerState::HalfOpen);
                        Ok(true)
                    } else {
                        Err(())
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.trial_in_flight {
                        Err(())
                    } else {
                        inner.trial_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };

        self.notify(transition);
        admitted.map_err(|()| BreakerError::Open {
            name: self.name.clone(),
        })
    }

    /// Only the half-open trial closes the breaker. A call admitted while
    /// closed that finishes after the breaker opened leaves it open.
    fn record_success(&self, is_trial: bool) {
        let mut transition = None;
        {
            let mut inner = self.lock();
            match inner.state {
                BreakerState::HalfOpen if is_trial => {
                    inner.trial_in_flight = false;
                    inner.failure_count = 0;
                    inner.state = BreakerState::Closed;
                    transition = Some(BreakerState::Closed);
                }
                BreakerState::Closed => inner.failure_count = 0,
                BreakerState::HalfOpen | BreakerState::Open => {}
            }
        }
        self.notify(transition);
    }

    fn record_failure(&self, is_trial: bool) {
        let mut transition = None;
        {
            let mut inner = self.lock();
            if is_trial {
                inner.trial_in_flight = false;
            }
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure = Some(Instant::now());

            let trips = (is_trial && inner.state == BreakerState::HalfOpen)
                || (inner.state == BreakerState::Closed && inner.failure_count >= self.failure_threshold);
            if trips {
                inner.state = BreakerState::Open;
                transition = Some(BreakerState::Open);
            }
        }
        self.notify(transition);
    }

    fn notify(&self, transition: Option<BreakerState>) {
        let Some(state) = transition else {
            return;
        };
        tracing::info!(breaker = %self.name, %state, "circuit breaker changed state");
        if let Some(callback) = &self.on_state_change {
            callback(&self.name, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fail(breaker: &CircuitBreaker) -> BreakerError<&'static str> {
        breaker
            .execute(|| async { Err::<(), _>("boom") })
            .await
            .unwrap_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::with_config("webhook", 3, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let err = breaker
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("boom") }
                })
                .await
                .unwrap_err();
            assert!(!err.is_open());
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &str>(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open breaker must not invoke");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::with_config("webhook", 2, Duration::from_secs(5));
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;

        let value = breaker.execute(|| async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_window() {
        let breaker = CircuitBreaker::with_config("webhook", 1, Duration::from_secs(5));
        fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        let err = fail(&breaker).await;
        assert!(!err.is_open(), "trial call runs");
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(fail(&breaker).await.is_open(), "window restarted at trial failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_call_while_half_open() {
        let breaker = CircuitBreaker::with_config("webhook", 1, Duration::from_secs(1));
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = breaker.execute(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, &str>("trial")
        });
        let competing = async {
            tokio::task::yield_now().await;
            breaker.execute(|| async { Ok::<_, &str>("competing") }).await
        };

        let (trial, competing) = tokio::join!(trial, competing);
        assert_eq!(trial.unwrap(), "trial");
        assert!(competing.unwrap_err().is_open());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_breaker() {
        let breaker = CircuitBreaker::with_config("webhook", 2, Duration::from_secs(60));

        let slow = breaker.execute(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, &str>("slow")
        });
        let failures = async {
            tokio::task::yield_now().await;
            fail(&breaker).await;
            fail(&breaker).await;
            assert_eq!(breaker.state(), BreakerState::Open);
        };

        let (slow, ()) = tokio::join!(slow, failures);
        assert_eq!(slow.unwrap(), "slow");
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(fail(&breaker).await.is_open(), "still inside the open window");
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_count() {
        let breaker = CircuitBreaker::with_config("webhook", 3, Duration::from_secs(60));
        fail(&breaker).await;
        fail(&breaker).await;
        breaker.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_state_change_callback() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        let breaker = CircuitBreaker::with_config("hook", 1, Duration::ZERO)
            .on_state_change(move |name, state| sink.lock().unwrap().push((name.to_string(), state)));

        fail(&breaker).await;
        breaker.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();

        let transitions = transitions.lock().unwrap();
        let states: Vec<BreakerState> = transitions.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![BreakerState::Open, BreakerState::HalfOpen, BreakerState::Closed]
        );
        assert!(transitions.iter().all(|(name, _)| name == "hook"));
    }
}
