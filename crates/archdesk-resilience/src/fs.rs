//! Retry preset for filesystem calls
//!
//! Only errors that can clear up on their own are retried: a busy resource,
//! descriptor exhaustion, a file that is briefly missing mid-rename, or a
//! permission check racing another writer.

use crate::error::RetryError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use std::future::Future;
use std::io;
use std::time::Duration;

/// OS error codes treated as transient
pub const TRANSIENT_ERRNOS: &[i32] = &[
    libc::EBUSY,
    libc::ENOENT,
    libc::EMFILE,
    libc::ENFILE,
    libc::EAGAIN,
    libc::EACCES,
    libc::EPERM,
];

/// Whether a filesystem error is worth retrying
pub fn is_transient_fs_error(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => TRANSIENT_ERRNOS.contains(&code),
        None => matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
        ),
    }
}

/// Policy for filesystem calls: 3 retries, 50ms base, 2s cap, factor 2, jitter.
///
/// Each retry is logged as a warning naming `operation_name`.
pub fn file_retry_policy(operation_name: &str) -> RetryPolicy<io::Error> {
    let name = operation_name.to_string();
    RetryPolicy::new()
        .with_max_retries(3)
        .with_base_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_backoff_factor(2.0)
        .with_jitter(true)
        .retry_if(|err, _| is_transient_fs_error(err))
        .on_retry(move |err, attempt, delay| {
            tracing::warn!(
                operation = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "{name} failed: {err}"
            );
        })
}

/// Per-call adjustments to [`file_retry_policy`]; `None` keeps the preset value
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileRetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_factor: Option<f64>,
    pub jitter: Option<bool>,
}

impl FileRetryOverrides {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = Some(base_delay);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Apply the set fields on top of `policy`; the retry predicate and logging are kept
    pub fn apply(&self, mut policy: RetryPolicy<io::Error>) -> RetryPolicy<io::Error> {
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(base_delay) = self.base_delay {
            policy.base_delay = base_delay;
        }
        if let Some(max_delay) = self.max_delay {
            policy.max_delay = max_delay;
        }
        if let Some(backoff_factor) = self.backoff_factor {
            policy.backoff_factor = backoff_factor;
        }
        if let Some(jitter) = self.jitter {
            policy.jitter = jitter;
        }
        policy
    }
}

/// Run a filesystem operation under [`file_retry_policy`], adjusted by `overrides`.
pub async fn retry_file_operation<T, F, Fut>(
    operation_name: &str,
    operation: F,
    overrides: &FileRetryOverrides,
) -> Result<T, RetryError<io::Error>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let policy = overrides.apply(file_retry_policy(operation_name));
    retry_with_backoff(operation, &policy).await
}
