//! Client error types.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Rate limited by remote generator")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build an error from a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after_secs }
        } else {
            Self::Http {
                status,
                message: body.into(),
            }
        }
    }

    /// Check if retrying the same request may succeed.
    ///
    /// Rate limits, timeouts, connection problems, 408 and 5xx are
    /// transient. Other 4xx responses mean the remote rejected the input.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } | ClientError::Timeout | ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status == 408 || *status >= 500,
            ClientError::Decode(_) | ClientError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ClientError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
