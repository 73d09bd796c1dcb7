//! Retry with exponential backoff
//!
//! Attempt numbers passed to callbacks are 1-indexed: the first failure is
//! attempt 1. The delay before retry `n` (0-based) is
//! `min(base_delay * backoff_factor^n, max_delay)`, optionally scaled by a
//! random factor in `[0.5, 1.0]`.

use crate::error::RetryError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (100ms)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default ceiling on any single delay (30 seconds)
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default multiplier applied per attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type RetryCallback<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Retry configuration for a single call.
///
/// Pure configuration; cloning is cheap and a policy can be shared between
/// calls without any state leaking across them.
pub struct RetryPolicy<E> {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Randomize each delay by a factor in `[0.5, 1.0]`
    pub jitter: bool,
    retry_if: Option<RetryPredicate<E>>,
    on_retry: Option<RetryCallback<E>>,
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: true,
            retry_if: None,
            on_retry: None,
        }
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            retry_if: self.retry_if.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retry_if.is_some())
            .field("has_on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy with default settings (3 retries, 100ms base, 30s cap, factor 2, jitter)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only retry errors for which `predicate(error, attempt)` returns true
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Called with `(error, attempt, delay)` before each backoff sleep
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Whether `error` from 1-indexed `attempt` is eligible for another try.
    pub fn should_retry(&self, error: &E, attempt: u32) -> bool {
        self.retry_if
            .as_ref()
            .map_or(true, |predicate| predicate(error, attempt))
    }

    /// Delay after the 0-based `attempt`, before jitter is applied.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let ceiling = self.max_delay.as_nanos() as f64;

        if !scaled.is_finite() || scaled >= ceiling {
            self.max_delay
        } else {
            Duration::from_nanos(scaled.max(0.0).round() as u64)
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        delay.mul_f64(factor).min(delay)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// The operation is invoked at most `max_retries + 1` times. On exhaustion,
/// or when the retry predicate declines, the last error is returned inside a
/// [`RetryError`] carrying the number of attempts made.
///
/// # Examples
///
/// ```no_run
/// use archdesk_resilience::{retry_with_backoff, RetryPolicy};
///
/// # async fn run() {
/// let policy = RetryPolicy::<std::io::Error>::new()
///     .retry_if(|err, _attempt| err.kind() != std::io::ErrorKind::InvalidInput);
///
/// match retry_with_backoff(|| tokio::fs::remove_file("stale.zip"), &policy).await {
///     Ok(()) => println!("removed"),
///     Err(e) => eprintln!("gave up after {} attempts: {}", e.attempts, e.last_error),
/// }
/// # }
/// ```
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let attempts = attempt + 1;
        if attempt >= policy.max_retries || !policy.should_retry(&error, attempts) {
            return Err(RetryError {
                attempts,
                last_error: error,
            });
        }

        let delay = policy.jittered(policy.backoff_delay(attempt));
        if let Some(callback) = &policy.on_retry {
            callback(&error, attempts, delay);
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let policy = RetryPolicy::<()>::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_backoff_factor(2.0);

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(60), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::<String>::new().with_max_retries(3);

        let result = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("failure {n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            &policy,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::<String>::new().with_max_retries(2);

        let err = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(format!("failure {n}")) }
            },
            &policy,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3, "max_retries + 1 invocations");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "failure 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_stops_retrying() {
        let calls = AtomicU32::new(0);
        let seen_attempts = Mutex::new(Vec::new());
        let policy = RetryPolicy::<&'static str>::new()
            .with_max_retries(10)
            .retry_if(|err, _| *err == "busy");

        let err = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                seen_attempts.lock().unwrap().push(n + 1);
                async move { Err::<(), _>(if n == 0 { "busy" } else { "fatal" }) }
            },
            &policy,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, "fatal");
        assert_eq!(*seen_attempts.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_delays_respect_max_delay() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let policy = RetryPolicy::<()>::new()
            .with_max_retries(6)
            .with_base_delay(Duration::from_millis(40))
            .with_max_delay(Duration::from_millis(300))
            .with_backoff_factor(3.0)
            .on_retry(move |_, attempt, delay| recorded.lock().unwrap().push((attempt, delay)));

        let result = retry_with_backoff(|| async { Err::<(), ()>(()) }, &policy).await;
        assert!(result.is_err());

        let delays = delays.lock().unwrap();
        assert_eq!(delays.len(), 6);
        for (index, (attempt, delay)) in delays.iter().enumerate() {
            assert_eq!(*attempt as usize, index + 1, "attempts are 1-indexed");
            assert!(*delay <= Duration::from_millis(300));
            let unjittered = policy.backoff_delay(index as u32);
            assert!(*delay >= unjittered.mul_f64(0.49), "jitter stays near or above half");
            assert!(*delay <= unjittered + Duration::from_nanos(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::<()>::new().with_max_retries(0);

        let err = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), ()>(()) }
            },
            &policy,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
    }
}
