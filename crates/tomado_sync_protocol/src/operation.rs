//! Queue operations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::request::Method;
use std::fmt;
use std::str::FromStr;

/// Kind of local mutation recorded in the operation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    /// Entity was created locally.
    Create,
    /// Entity was updated locally.
    Update,
    /// Entity was soft-deleted locally.
    Delete,
}

impl QueueOperation {
    /// Returns the name stored in the queue table.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }

    /// Returns the HTTP method used to send this operation.
    pub fn method(&self) -> Method {
        match self {
            QueueOperation::Create => Method::Post,
            QueueOperation::Update => Method::Patch,
            QueueOperation::Delete => Method::Delete,
        }
    }

    /// Returns true if the server answers with the entity's canonical state.
    pub fn returns_entity(&self) -> bool {
        matches!(self, QueueOperation::Create | QueueOperation::Update)
    }
}

impl FromStr for QueueOperation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "create" => Ok(QueueOperation::Create),
            "update" => Ok(QueueOperation::Update),
            "delete" => Ok(QueueOperation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
