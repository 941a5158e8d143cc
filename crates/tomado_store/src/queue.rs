//! The durable operation queue.
//!
//! Every local mutation leaves one item here. The push pipeline drains
//! items in `id` order; failed items stay visible until the retry policy
//! puts them back in line or they are retried by hand. Items that failed
//! for good are parked: the retry policy skips them, a manual retry does not.

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tomado_sync_protocol::{now_millis, EntityType, QueueOperation, Record};
use tracing::{debug, info};

const ITEM_COLUMNS: &str = "id, entity_type, entity_id, operation, payload, created_at, \
                            attempts, last_attempt_at, error, status, parked";

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be sent.
    Pending,
    /// Currently being sent.
    Processing,
    /// Last attempt failed; kept for visibility and retry.
    Failed,
    /// Acknowledged by the server; eligible for garbage collection.
    Completed,
}

impl QueueStatus {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
            QueueStatus::Completed => "completed",
        }
    }

    /// Returns true if the push pipeline may move an item from `self` to `next`.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Completed)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }
}

impl FromStr for QueueStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "failed" => Ok(QueueStatus::Failed),
            "completed" => Ok(QueueStatus::Completed),
            other => Err(StoreError::Corrupt(format!("unknown queue status {other}"))),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable record of a local mutation awaiting transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// Monotonic id; defines processing order.
    pub id: i64,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
    /// Mutation kind.
    pub operation: QueueOperation,
    /// Snapshot of the entity fields at the time of the mutation.
    pub payload: Record,
    /// Enqueue time, epoch ms.
    pub created_at: i64,
    /// Number of failed remote calls.
    pub attempts: u32,
    /// Time of the last attempt, epoch ms.
    pub last_attempt_at: Option<i64>,
    /// Error text of the last failure.
    pub error: Option<String>,
    /// Current status.
    pub status: QueueStatus,
    /// Failed permanently; only a manual retry sends it again.
    pub parked: bool,
}

/// Queue item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items waiting to be sent.
    pub pending: u64,
    /// Items in flight.
    pub processing: u64,
    /// Items whose last attempt failed.
    pub failed: u64,
    /// Items acknowledged by the server.
    pub completed: u64,
}

struct RawItem {
    id: i64,
    entity_type: String,
    entity_id: String,
    operation: String,
    payload: String,
    created_at: i64,
    attempts: u32,
    last_attempt_at: Option<i64>,
    error: Option<String>,
    status: String,
    parked: bool,
}

impl RawItem {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            operation: row.get(3)?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
            attempts: row.get(6)?,
            last_attempt_at: row.get(7)?,
            error: row.get(8)?,
            status: row.get(9)?,
            parked: row.get(10)?,
        })
    }

    fn into_item(self) -> StoreResult<QueueItem> {
        Ok(QueueItem {
            id: self.id,
            entity_type: self.entity_type.parse()?,
            entity_id: self.entity_id,
            operation: self.operation.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            attempts: self.attempts,
            last_attempt_at: self.last_attempt_at,
            error: self.error,
            status: self.status.parse()?,
            parked: self.parked,
        })
    }
}

/// Appends a queue item inside the caller's transaction.
pub(crate) fn enqueue(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    entity_id: &str,
    operation: QueueOperation,
    payload: &Record,
    now: i64,
) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO sync_queue (entity_type, entity_id, operation, payload, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
        params![
            entity_type.as_str(),
            entity_id,
            operation.as_str(),
            serde_json::to_string(payload)?,
            now
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Counts items for an entity that still have to reach the server.
pub(crate) fn outstanding_for(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    entity_id: &str,
) -> StoreResult<u64> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM sync_queue
         WHERE entity_type = ?1 AND entity_id = ?2 AND status IN ('pending', 'failed')",
        params![entity_type.as_str(), entity_id],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn transition(
    tx: &Transaction<'_>,
    id: i64,
    status: QueueStatus,
    error: Option<&str>,
    now: i64,
) -> StoreResult<()> {
    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM sync_queue WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    let current: QueueStatus = current.ok_or(StoreError::QueueItemNotFound(id))?.parse()?;
    if !current.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            id,
            from: current,
            to: status,
        });
    }

    match status {
        QueueStatus::Failed => tx.execute(
            "UPDATE sync_queue
             SET status = 'failed', attempts = attempts + 1, last_attempt_at = ?2, error = ?3
             WHERE id = ?1",
            params![id, now, error],
        )?,
        QueueStatus::Completed => tx.execute(
            "UPDATE sync_queue SET status = 'completed', last_attempt_at = ?2, error = ?3
             WHERE id = ?1",
            params![id, now, error],
        )?,
        _ => tx.execute(
            "UPDATE sync_queue SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?,
    };
    Ok(())
}

impl LocalStore {
    /// Returns the oldest `limit` pending items, ordered by id.
    pub fn get_pending_queue_items(&self, limit: u32) -> StoreResult<Vec<QueueItem>> {
        self.list_queue(Some(QueueStatus::Pending), limit)
    }

    /// Lists queue items, optionally filtered by status, ordered by id.
    pub fn list_queue(&self, status: Option<QueueStatus>, limit: u32) -> StoreResult<Vec<QueueItem>> {
        let conn = self.conn.lock();
        let raw = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM sync_queue WHERE status = ?1 ORDER BY id ASC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit], RawItem::read)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM sync_queue ORDER BY id ASC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit], RawItem::read)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        raw.into_iter().map(RawItem::into_item).collect()
    }

    /// Returns a single queue item.
    pub fn get_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1"),
                [id],
                RawItem::read,
            )
            .optional()?;
        raw.map(RawItem::into_item).transpose()
    }

    /// Moves a queue item to `status`.
    ///
    /// Moving to `failed` increments `attempts` and records the error text.
    /// Only `pending → processing → completed | failed` is accepted.
    pub fn mark_queue_item(
        &self,
        id: i64,
        status: QueueStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        transition(&tx, id, status, error, now_millis())?;
        tx.commit()?;
        debug!(id, %status, "queue item transition");
        Ok(())
    }

    /// Fails an in-flight item for good.
    ///
    /// Like moving it to `failed`, but [`LocalStore::requeue_failed`] will
    /// not pick it up again.
    pub fn park_queue_item(&self, id: i64, error: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        transition(&tx, id, QueueStatus::Failed, Some(error), now_millis())?;
        tx.execute("UPDATE sync_queue SET parked = 1 WHERE id = ?1", [id])?;
        tx.commit()?;
        info!(id, error, "queue item parked");
        Ok(())
    }

    /// Closes an in-flight item whose edit lost to a newer server version.
    ///
    /// The item completes without being sent. If nothing else is
    /// outstanding for the entity, its row becomes synced.
    pub fn complete_superseded(&self, item: &QueueItem, server_updated_at: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let note = format!("superseded by server version at {server_updated_at}");
        transition(&tx, item.id, QueueStatus::Completed, Some(&note), now_millis())?;
        if outstanding_for(&tx, item.entity_type, &item.entity_id)? == 0 {
            crate::store::settle_row(&tx, item.entity_type, &item.entity_id, server_updated_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Puts failed items back in line once their backoff has elapsed.
    ///
    /// Items with `attempts >= max_attempts` stay failed. `None` means no
    /// ceiling. Parked items are never requeued. An item that never
    /// recorded an attempt time is ready at once.
    pub fn requeue_failed(
        &self,
        max_attempts: Option<u32>,
        delay_for: impl Fn(u32) -> Duration,
        now: i64,
    ) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let candidates: Vec<(i64, u32, Option<i64>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, attempts, last_attempt_at FROM sync_queue
                 WHERE status = 'failed' AND parked = 0 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut requeued = 0;
        for (id, attempts, last_attempt_at) in candidates {
            if max_attempts.is_some_and(|max| attempts >= max) {
                continue;
            }
            let ready_at = last_attempt_at
                .map(|at| at.saturating_add(delay_for(attempts).as_millis() as i64))
                .unwrap_or(i64::MIN);
            if ready_at <= now {
                tx.execute(
                    "UPDATE sync_queue SET status = 'pending' WHERE id = ?1 AND status = 'failed'",
                    [id],
                )?;
                requeued += 1;
            }
        }
        tx.commit()?;
        if requeued > 0 {
            debug!(requeued, "failed queue items requeued");
        }
        Ok(requeued)
    }

    /// Puts every failed item back in line regardless of backoff, ceiling
    /// or parking.
    ///
    /// `attempts` is left as is.
    pub fn retry_failed(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE sync_queue SET status = 'pending', parked = 0 WHERE status = 'failed'",
            [],
        )?;
        info!(count, "failed queue items reset for retry");
        Ok(count)
    }

    /// Deletes completed items last touched before `older_than` (epoch ms).
    pub fn purge_completed(&self, older_than: i64) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM sync_queue
             WHERE status = 'completed' AND COALESCE(last_attempt_at, created_at) < ?1",
            [older_than],
        )?;
        debug!(count, "purged completed queue items");
        Ok(count)
    }

    /// Returns item counts by status.
    pub fn queue_stats(&self) -> StoreResult<QueueStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match status.parse()? {
                QueueStatus::Pending => stats.pending = count,
                QueueStatus::Processing => stats.processing = count,
                QueueStatus::Failed => stats.failed = count,
                QueueStatus::Completed => stats.completed = count,
            }
        }
        Ok(stats)
    }

    /// Marks items left `processing` by an interrupted run as failed so the
    /// retry policy picks them up. `attempts` is not incremented.
    pub fn recover_interrupted(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE sync_queue SET status = 'failed', error = 'interrupted'
             WHERE status = 'processing'",
            [],
        )?;
        if count > 0 {
            info!(count, "recovered interrupted queue items");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        use QueueStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn status_names_roundtrip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Failed,
            QueueStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
    }
}
