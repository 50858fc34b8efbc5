//! Redis handle error types.

use thiserror::Error;

/// Result type for Redis handle operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis handle errors.
#[derive(Debug, Clone, Error)]
pub enum RedisError {
    /// Connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command issued before the handle became ready.
    #[error(
        "{0} can't be processed. The connection is not yet established and the offline queue is deactivated."
    )]
    NotReady(&'static str),

    /// Command issued after the handle was closed.
    #[error("{0} can't be processed. The connection is already closed.")]
    Closed(&'static str),

    /// Command error reported by the server.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error.
    #[error("Operation timed out")]
    Timeout,
}

impl RedisError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::NotReady(_))
    }

    /// Check if this error indicates the connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotReady(_) | Self::Closed(_)
        )
    }
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            Self::Connection(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Command(err.to_string())
        }
    }
}
