//! Error types for main-thread job dispatch.

use thiserror::Error;

/// Result type for main-thread dispatch.
pub type MainThreadResult<T> = Result<T, MainThreadError>;

/// Errors returned when handing work to the main thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MainThreadError {
    /// The queue was closed; the main thread no longer accepts jobs.
    #[error("main-thread queue is closed")]
    Closed,

    /// A blocking call was made from the main thread itself.
    #[error("run_sync called on the main thread; the job could never be drained")]
    OnMainThread,

    /// The job was dropped before it produced a result (queue closed or job panicked).
    #[error("main-thread job was dropped before completing")]
    JobDropped,
}
