use std::time::Duration;
use thiserror::Error;

/// Failure to fetch listings for one product. Recovered by the scheduler by
/// skipping that product for the current scan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("listing request timed out after {0:?}")]
    Timeout(Duration),

    #[error("listing source returned HTTP {status}")]
    Status { status: u16 },

    #[error("listing transport failure: {message}")]
    Transport { message: String, retryable: bool },

    #[error("malformed listing response: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Status { status } => *status == 429 || *status >= 500,
            FetchError::Transport { retryable, .. } => *retryable,
            FetchError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Status {
                status: status.as_u16(),
            };
        }
        if e.is_decode() {
            return FetchError::Parse(e.to_string());
        }
        FetchError::Transport {
            retryable: e.is_timeout() || e.is_connect(),
            message: e.to_string(),
        }
    }
}

/// Persistence failure in the scan store or vendor ledger.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt stored value in {column}: {value}")]
    Corrupt { column: String, value: String },
}

/// Webhook delivery failure. Logged by the notifier, never propagated.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("webhook transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook sink rejected digest with HTTP {status}")]
    Rejected { status: u16 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
