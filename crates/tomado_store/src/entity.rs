//! Entity rows and their sync metadata.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tomado_sync_protocol::{EntityType, QueueOperation, Record};

/// Lifecycle marker of a row with respect to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local edits not yet acknowledged by the server.
    Pending,
    /// Local copy matches the last known server state.
    Synced,
    /// A pulled server version met unsent local edits.
    Conflict,
    /// Deletion acknowledged by (or received from) the server.
    Deleted,
}

impl SyncStatus {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Deleted => "deleted",
        }
    }

    /// Returns true if the row carries local edits the server has not seen.
    pub fn has_unsent_edits(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Conflict)
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(StoreError::Corrupt(format!("unknown sync status {other}"))),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync bookkeeping carried by every entity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// True once the local copy matches server state.
    pub is_synced: bool,
    /// Lifecycle marker.
    pub sync_status: SyncStatus,
    /// Last local mutation, epoch ms.
    pub local_updated_at: i64,
    /// Last known server mutation, epoch ms.
    pub server_updated_at: Option<i64>,
    /// Soft-delete flag.
    pub is_deleted: bool,
}

/// One entity row: its fields plus sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub id: String,
    /// Entity fields with local-case keys.
    pub record: Record,
    /// Sync metadata.
    pub meta: SyncMetadata,
}

impl EntityRow {
    /// Returns the record with the sync metadata fields merged in, the shape
    /// the rest of the application reads.
    pub fn to_local_record(&self) -> Record {
        let mut record = self.record.clone();
        if let Ok(Value::Object(meta)) = serde_json::to_value(&self.meta) {
            record.extend(meta);
        }
        record
    }
}

/// Outcome of a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWrite {
    /// Id of the queue item written with the entity.
    pub queue_id: i64,
    /// Operation that was queued.
    pub operation: QueueOperation,
}

/// Counts from applying a batch of server records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Rows created from server data.
    pub inserted: u64,
    /// Rows overwritten with server data.
    pub updated: u64,
    /// Rows soft-deleted by the server.
    pub deleted: u64,
    /// Rows that had unsent local edits.
    pub conflicts: u64,
}

impl ApplyStats {
    /// Total records applied.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.conflicts
    }
}
