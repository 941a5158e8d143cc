//! Error types for the sync engine.

use thiserror::Error;
use tomado_store::StoreError;
use tomado_sync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// Malformed request or response data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The HTTP client could not be built.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Auth failures count as retryable: a new token makes the same
    /// request succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            SyncError::Http { status, .. } => {
                *status >= 500 || matches!(*status, 401 | 403 | 408 | 429)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 422,
            message: "invalid".into()
        }
        .is_retryable());
        assert!(SyncError::Http {
            status: 401,
            message: "invalid token".into()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!SyncError::Protocol(ProtocolError::NotAnObject).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::Http {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "HTTP 500: boom");
    }
}
