//! Resilient operation layer for archdesk
//!
//! Bulk filesystem work (deleting hundreds of uploads, writing logs, delivering
//! webhooks) runs through the primitives in this crate:
//!
//! - **Retry with backoff**: exponential delays with optional jitter, a retry
//!   predicate and an observability callback
//! - **Batch execution**: sequential chunks, bounded interleaving inside a
//!   chunk, one independent outcome per item
//! - **Circuit breaking**: fail fast while a downstream dependency is unhealthy
//!
//! # Usage
//!
//! ```no_run
//! use archdesk_resilience::{retry_with_backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::<std::io::Error>::new()
//!     .with_max_retries(5)
//!     .with_base_delay(Duration::from_millis(50));
//!
//! let bytes = retry_with_backoff(|| tokio::fs::read("upload.zip"), &policy).await?;
//! println!("read {} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod breaker;
pub mod error;
pub mod fs;
pub mod retry;

pub use batch::{retry_batch, BatchOptions, BatchOutcome, BatchProgress};
pub use breaker::{BreakerState, CircuitBreaker};
pub use error::{BreakerError, RetryError};
pub use fs::{file_retry_policy, is_transient_fs_error, retry_file_operation, FileRetryOverrides};
pub use retry::{retry_with_backoff, RetryPolicy};
