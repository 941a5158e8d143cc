//! Error types for the local store.

use crate::queue::QueueStatus;
use thiserror::Error;
use tomado_sync_protocol::{EntityType, ProtocolError};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding or decoding of a stored record failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record did not satisfy the protocol (missing id, bad names).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A parent reference points at a missing or soft-deleted row.
    #[error("constraint violation: {entity_type}.{field} references {parent_type} {parent_id} which is {reason}")]
    Constraint {
        /// Entity type being written.
        entity_type: EntityType,
        /// Field holding the reference.
        field: &'static str,
        /// Entity type of the parent.
        parent_type: EntityType,
        /// Referenced id.
        parent_id: String,
        /// Either "missing" or "deleted".
        reason: &'static str,
    },

    /// The row is soft-deleted and cannot be modified locally.
    #[error("{entity_type} {id} is deleted")]
    Deleted {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },

    /// The row does not exist.
    #[error("{entity_type} {id} not found")]
    NotFound {
        /// Entity type.
        entity_type: EntityType,
        /// Entity id.
        id: String,
    },

    /// The queue item does not exist.
    #[error("queue item {0} not found")]
    QueueItemNotFound(i64),

    /// A queue status transition that the queue does not allow.
    #[error("invalid queue transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        /// Queue item id.
        id: i64,
        /// Current status.
        from: QueueStatus,
        /// Requested status.
        to: QueueStatus,
    },

    /// Stored data could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
