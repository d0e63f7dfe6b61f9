//! Worker error types

use thiserror::Error;

/// Result type alias for worker operations
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Worker error type
///
/// Database errors propagate unwrapped from the repository. The row-cap
/// sentinel is its own variant so the main loop can tell an already-failed
/// batch apart from a transient error that the reaper must recover.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Import error: {0}")]
    Import(#[from] pim_common::ImportError),

    /// Row cap reached; the batch was already terminally failed inside the
    /// pipeline and must not be retried.
    #[error("batch row count reached the configured cap of {cap}")]
    RowLimitExceeded { row_count: u64, cap: u64 },
}

impl WorkerError {
    /// True when the batch already reached a terminal state and the error is
    /// purely informational for the caller.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerError::RowLimitExceeded { .. })
    }
}
