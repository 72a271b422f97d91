/// Centralized error types for the resampling pipeline
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    // Argument Errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // Source Errors
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Pipeline Errors
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, GridError>;

impl GridError {
    /// Check if error was caused by the data or arguments rather than the environment
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            GridError::InvalidArgument(_)
                | GridError::ResourceNotFound(_)
                | GridError::MalformedInput(_)
                | GridError::CsvError(_)
        )
    }

    /// Get error code for logging
    pub fn error_code(&self) -> &str {
        match self {
            GridError::InvalidArgument(_) => "ARG_001",
            GridError::UnsupportedOperation(_) => "ARG_002",
            GridError::ResourceNotFound(_) => "SRC_001",
            GridError::MalformedInput(_) => "SRC_002",
            GridError::CsvError(_) => "SRC_003",
            GridError::ConfigError(_) => "CFG_001",
            GridError::FileError(_) => "FILE_001",
            GridError::TaskFailed(_) => "SYS_001",
        }
    }
}

impl From<tokio::task::JoinError> for GridError {
    fn from(err: tokio::task::JoinError) -> Self {
        GridError::TaskFailed(err.to_string())
    }
}
