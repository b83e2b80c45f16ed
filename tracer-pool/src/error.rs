//! Error types for the pool, the allocator and scene slices.

use std::io;

/// Failure to bring a pool up.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("worker pool needs at least one thread")]
    NoWorkers,
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },
}

/// Failure of [`crate::AddressWindow::alloc`].
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// The mapping landed outside the window.
    #[error("address exceeded allowed range in sys_alloc")]
    OutOfRange,
    /// Every hint tried was already mapped.
    #[error("no free range in the address window after {attempts} attempts in sys_alloc")]
    WindowFull {
        /// Hints tried.
        attempts: u32,
    },
    /// The page source handed back nothing.
    #[error("alloc failed with NULL address in sys_alloc")]
    Null,
    /// The page source failed.
    #[error("mapping failed in sys_alloc: {0}")]
    Map(#[from] io::Error),
}

/// Text cause reported by a failing scene slice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SliceError(pub String);

impl From<String> for SliceError {
    fn from(cause: String) -> Self {
        Self(cause)
    }
}

impl From<&str> for SliceError {
    fn from(cause: &str) -> Self {
        Self(cause.to_owned())
    }
}
