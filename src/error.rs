//! Error types for configuration, submission and local backups

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("invalid timeout value: {0:?}")]
    InvalidTimeout(String),
    #[error("timeout {value}s is below the minimum of {minimum}s")]
    BelowMinimum { value: i64, minimum: u64 },
    #[error("invalid server time {0:?}")]
    InvalidServerTime(String),
}

/// Failure of a single submission attempt
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: {status}")]
    Http { status: u16 },
    #[error("server returned error: {0}")]
    Rejected(String),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid image data for {name}: {reason}")]
    InvalidImage { name: String, reason: String },
}

impl SubmitError {
    /// Abort and transport failures, as opposed to errors reported by the server
    pub fn is_network(&self) -> bool {
        matches!(self, SubmitError::Timeout(_) | SubmitError::Network(_))
    }
}

impl From<reqwest::Error> for SubmitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SubmitError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SubmitError::Http { status: status.as_u16() }
        } else {
            SubmitError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("local storage unavailable: {0}")]
    Unavailable(#[source] StorageError),
    #[error("failed to write backup {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("backup {0} could not be read back after saving")]
    VerificationFailed(String),
    #[error("failed to encode backup: {0}")]
    Encode(#[from] serde_json::Error),
}
