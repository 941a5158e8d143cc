//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while mapping records or interpreting wire payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The entity type name is not known.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The queue operation name is not known.
    #[error("unknown queue operation: {0}")]
    UnknownOperation(String),

    /// A timestamp field held a value that cannot be converted.
    #[error("invalid timestamp in field {field}: {value}")]
    InvalidTimestamp {
        /// Field name (as it appeared in the input).
        field: String,
        /// Offending value, rendered as JSON.
        value: String,
    },

    /// A required field is absent or has the wrong type.
    #[error("missing or invalid field: {0}")]
    MissingField(String),

    /// A record was not a JSON object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// A response body did not have any of the accepted shapes.
    #[error("unexpected response body: {0}")]
    UnexpectedBody(String),
}
