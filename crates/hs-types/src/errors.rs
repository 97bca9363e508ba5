use thiserror::Error;

/// Main error type for hpsearch
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker execution error: {0}")]
    Worker(String),

    #[error("Invalid blob URI: {0}")]
    InvalidUri(String),

    #[error("Timed out after {waited_secs} seconds: {done} of {total} workers completed")]
    Timeout {
        waited_secs: u64,
        done: usize,
        total: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures talking to the blob store or the job runner.
///
/// These are surfaced to the caller as-is. Nothing in the core retries.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Blob store request for {uri} failed: {message}")]
    Blob { uri: String, message: String },

    #[error("Blob not found: {uri}")]
    NotFound { uri: String },

    #[error("Job runner {operation} failed: {message}")]
    Job { operation: String, message: String },
}

impl TransportError {
    pub fn blob(uri: impl Into<String>, message: impl ToString) -> Self {
        Self::Blob {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    pub fn job(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Job {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for hpsearch operations
pub type HsResult<T> = Result<T, HsError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HsError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HsError::Internal(format!($($arg)*))
    };
}
