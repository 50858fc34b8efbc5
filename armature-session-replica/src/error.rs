//! Error types for session store operations.

use thiserror::Error;

/// Result type for session store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for a single backend call.
pub type BackendResult<T> = Result<T, BackendError>;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session could not be serialized; no backend was contacted
    #[error("Serialization error: {0}")]
    Encode(String),

    /// Stored bytes could not be deserialized
    #[error("Deserialization error: {0}")]
    Decode(String),

    /// A backend call failed
    #[error("Backend {backend} failed: {source}")]
    Backend {
        /// Name of the backend that reported the failure
        backend: String,
        /// The failure itself
        #[source]
        source: BackendError,
    },
}

impl StoreError {
    /// Name of the originating backend, for backend failures.
    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::Backend { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Command issued before the connection became ready
    #[error(
        "{0} can't be processed. The connection is not yet established and the offline queue is deactivated."
    )]
    NotReady(String),

    /// Command issued after the connection was closed
    #[error("{0} can't be processed. The connection is already closed.")]
    Closed(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command rejected by the backend
    #[error("Command error: {0}")]
    Command(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// The call ended without reporting a result
    #[error("Backend call aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_names_origin() {
        let err = StoreError::Backend {
            backend: "localhost:6380".to_string(),
            source: BackendError::Connection("Connection refused".to_string()),
        };

        assert_eq!(err.backend(), Some("localhost:6380"));
        let display = err.to_string();
        assert!(display.contains("localhost:6380"));
        assert!(display.contains("Connection refused"));
    }

    #[test]
    fn test_encode_error_has_no_backend() {
        assert_eq!(StoreError::Encode("cycle".to_string()).backend(), None);
    }
}
