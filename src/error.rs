use crate::backend::BackendError;
use crate::data::DataError;

/// Errors surfaced by the series frontend
#[derive(Debug, thiserror::Error)]
pub enum PmdError {
    /// Attribute or entity absent on read
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation illegal for the current access mode or close state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Declared datatype or shape inconsistent with the value supplied
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Storage engine failed to execute or flush a task
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Series configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BackendError> for PmdError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(what) => PmdError::NotFound(what),
            other => PmdError::Backend(other),
        }
    }
}

impl From<DataError> for PmdError {
    fn from(err: DataError) -> Self {
        PmdError::TypeMismatch(err.to_string())
    }
}

impl From<toml::de::Error> for PmdError {
    fn from(err: toml::de::Error) -> Self {
        PmdError::Config(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = PmdError> = std::result::Result<T, E>;
