use crate::data::DataError;

/// Errors raised by storage engines while executing or flushing tasks
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error serializing/deserializing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the Arrow library
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet library
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Requested file, group, dataset or attribute does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine lacks the capability the task needs
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Task parameters inconsistent with stored state
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Ranks issued conflicting tasks for the same object
    #[error("Collective mismatch: {0}")]
    CollectiveMismatch(String),

    /// Another rank reported a failure for the collective flush
    #[error("Collective flush failed on rank 0: {0}")]
    CollectiveFailure(String),

    /// Message exchange between ranks failed
    #[error("Communication error: {0}")]
    Communication(String),
}

impl From<DataError> for BackendError {
    fn from(err: DataError) -> Self {
        BackendError::InvalidData(err.to_string())
    }
}
