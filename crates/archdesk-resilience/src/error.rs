//! Error types for resilient operations

use thiserror::Error;

/// Raised once the retry budget is spent or the retry predicate declines.
///
/// `last_error` is always the failure of the final attempt, never the first.
#[derive(Error, Debug)]
#[error("operation failed after {attempts} attempts: {last_error}")]
pub struct RetryError<E> {
    /// Number of times the operation was invoked
    pub attempts: u32,
    /// Error returned by the last invocation
    pub last_error: E,
}

impl<E> RetryError<E> {
    /// Discard the attempt count and return the last failure.
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the operation
    #[error("circuit breaker '{name}' is open")]
    Open {
        /// Name of the protected resource
        name: String,
    },

    /// The operation ran and failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the call was rejected without running.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(err) => Some(err),
        }
    }
}
