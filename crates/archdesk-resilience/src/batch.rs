//! Bounded-concurrency batch execution with per-item retry
//!
//! Items are split into sequential chunks of `batch_size`. Inside a chunk up to
//! `max_concurrency` items are in flight at once, gated by a semaphore; all of
//! them run on the caller's task, so "concurrent" means interleaved at await
//! points rather than parallel.

use crate::error::RetryError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default number of items per sequential chunk
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default number of in-flight items within a chunk
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Progress snapshot passed to the progress callback after each item settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Items settled so far (succeeded or failed)
    pub completed: usize,
    /// Total number of items in the batch
    pub total: usize,
    /// Items that failed after exhausting their retries
    pub failed: usize,
}

type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Options for [`retry_batch`]
pub struct BatchOptions<E> {
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Retry policy applied to every item independently
    pub retry: RetryPolicy<E>,
    on_progress: Option<ProgressCallback>,
}

impl<E> Default for BatchOptions<E> {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            on_progress: None,
        }
    }
}

impl<E> Clone for BatchOptions<E> {
    fn clone(&self) -> Self {
        Self {
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
            retry: self.retry.clone(),
            on_progress: self.on_progress.clone(),
        }
    }
}

impl<E> fmt::Debug for BatchOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<E> BatchOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy<E>) -> Self {
        self.retry = retry;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

/// Outcome of one item, correlated back to the item itself
#[derive(Debug)]
pub struct BatchOutcome<I, T, E> {
    pub item: I,
    pub result: Result<T, RetryError<E>>,
}

impl<I, T, E> BatchOutcome<I, T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&RetryError<E>> {
        self.result.as_ref().err()
    }
}

/// Process every item with retry, isolating failures per item.
///
/// Returns exactly one outcome per input item, in input order. One item
/// exhausting its retries never aborts its siblings. Zero values for
/// `batch_size` or `max_concurrency` are treated as 1.
pub async fn retry_batch<I, T, E, F, Fut>(
    items: Vec<I>,
    processor: F,
    options: &BatchOptions<E>,
) -> Vec<BatchOutcome<I, T, E>>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = items.len();
    let batch_size = options.batch_size.max(1);
    let max_concurrency = options.max_concurrency.max(1);

    let completed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let processor = &processor;

    let mut outcomes = Vec::with_capacity(total);
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        let chunk: Vec<I> = remaining.by_ref().take(batch_size).collect();
        let semaphore = Semaphore::new(max_concurrency.min(chunk.len()));

        let runs = chunk.into_iter().map(|item| {
            let semaphore = &semaphore;
            let completed = &completed;
            let failed = &failed;

            async move {
                // The semaphore is never closed, so acquisition only waits.
                let _permit = semaphore.acquire().await.ok();

                let result = retry_with_backoff(|| processor(item.clone()), &options.retry).await;

                let settled = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let failed_so_far = if result.is_err() {
                    failed.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    failed.load(Ordering::SeqCst)
                };

                if let Some(callback) = &options.on_progress {
                    callback(BatchProgress {
                        completed: settled,
                        total,
                        failed: failed_so_far,
                    });
                }

                BatchOutcome { item, result }
            }
        });

        // join_all yields results in the order the futures were created,
        // which is the chunk's input order.
        outcomes.extend(join_all(runs).await);
    }

    tracing::debug!(
        total,
        failed = failed.load(Ordering::SeqCst),
        "batch finished"
    );

    outcomes
}
