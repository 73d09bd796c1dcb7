//! Advisory file locks for archdesk
//!
//! A lock on `data/activity-log.jsonl` is the side-car marker file
//! `data/activity-log.jsonl.lock`, created exclusively and holding the owner's
//! pid, a timestamp and the target path. Its presence is the lock.
//!
//! - Markers older than [`STALE_LOCK_AGE`] or owned by a dead process are
//!   removed automatically and acquisition retried
//! - Acquisition polls until its timeout and then reports failure instead of
//!   blocking forever
//! - A [`LockRegistry`] hands out one [`FileLock`] per canonical path, so
//!   callers inside one process queue on shared in-memory state instead of
//!   racing each other on the marker file
//!
//! The lock is advisory: writers that never consult it are not stopped.

pub mod error;
pub mod lock;
pub mod registry;

pub use error::{LockError, LockResult};
pub use lock::{
    lock_path_for, process_alive, FileLock, LockMarker, LockOptions, DEFAULT_LOCK_TIMEOUT,
    DEFAULT_RETRY_INTERVAL, STALE_LOCK_AGE,
};
pub use registry::{canonical_lock_key, LockRegistry};
