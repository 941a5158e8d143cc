//! The local store: entity tables and sync checkpoint.

use crate::entity::{ApplyStats, EntityRow, LocalWrite, SyncMetadata, SyncStatus};
use crate::error::{StoreError, StoreResult};
use crate::queue::{enqueue, outstanding_for};
use crate::schema;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;
use std::path::Path;
use tomado_sync_protocol::{is_sync_metadata, now_millis, record_id, EntityType, QueueOperation, Record};
use tracing::{debug, info, warn};

const LAST_SYNC_TIME: &str = "last_sync_time";

/// Embedded, transactional storage for entities and the operation queue.
///
/// One connection guarded by a mutex gives single-writer semantics. All
/// methods are short and never held across an `.await` by callers.
pub struct LocalStore {
    pub(crate) conn: Mutex<Connection>,
}

struct RawRow {
    id: String,
    data: String,
    is_synced: bool,
    sync_status: String,
    local_updated_at: i64,
    server_updated_at: Option<i64>,
    is_deleted: bool,
}

impl RawRow {
    const COLUMNS: &'static str =
        "id, data, is_synced, sync_status, local_updated_at, server_updated_at, is_deleted";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
            is_synced: row.get(2)?,
            sync_status: row.get(3)?,
            local_updated_at: row.get(4)?,
            server_updated_at: row.get(5)?,
            is_deleted: row.get(6)?,
        })
    }

    fn into_row(self, entity_type: EntityType) -> StoreResult<EntityRow> {
        let record = match serde_json::from_str(&self.data)? {
            Value::Object(record) => record,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "{entity_type} {} data is not an object",
                    self.id
                )))
            }
        };
        Ok(EntityRow {
            entity_type,
            id: self.id,
            record,
            meta: SyncMetadata {
                is_synced: self.is_synced,
                sync_status: self.sync_status.parse()?,
                local_updated_at: self.local_updated_at,
                server_updated_at: self.server_updated_at,
                is_deleted: self.is_deleted,
            },
        })
    }
}

fn load_row(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    id: &str,
) -> StoreResult<Option<EntityRow>> {
    let raw = tx
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                RawRow::COLUMNS,
                entity_type.table_name()
            ),
            [id],
            RawRow::read,
        )
        .optional()?;
    raw.map(|raw| raw.into_row(entity_type)).transpose()
}

fn strip_metadata(record: Record) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| !is_sync_metadata(key))
        .collect()
}

fn check_parent(tx: &Transaction<'_>, entity_type: EntityType, record: &Record) -> StoreResult<()> {
    let Some(parent) = entity_type.parent() else {
        return Ok(());
    };
    let Some(parent_id) = record.get(parent.field).and_then(Value::as_str) else {
        return Ok(());
    };
    let deleted: Option<bool> = tx
        .query_row(
            &format!(
                "SELECT is_deleted FROM {} WHERE id = ?1",
                parent.entity_type.table_name()
            ),
            [parent_id],
            |row| row.get(0),
        )
        .optional()?;
    let reason = match deleted {
        None => "missing",
        Some(true) => "deleted",
        Some(false) => return Ok(()),
    };
    Err(StoreError::Constraint {
        entity_type,
        field: parent.field,
        parent_type: parent.entity_type,
        parent_id: parent_id.to_string(),
        reason,
    })
}

/// Marks a row as matching the server, once nothing is left to send for it.
pub(crate) fn settle_row(
    tx: &Transaction<'_>,
    entity_type: EntityType,
    id: &str,
    server_updated_at: i64,
) -> StoreResult<()> {
    let changed = tx.execute(
        &format!(
            "UPDATE {} SET is_synced = 1, server_updated_at = ?2,
                 sync_status = CASE WHEN is_deleted = 1 THEN 'deleted' ELSE 'synced' END
             WHERE id = ?1",
            entity_type.table_name()
        ),
        params![id, server_updated_at],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity_type,
            id: id.to_string(),
        });
    }
    Ok(())
}

impl LocalStore {
    /// Opens (creating if needed) a store at `path`.
    ///
    /// Queue items left in flight by a previous run are recovered.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut conn = Connection::open(path.as_ref())?;
        schema::init(&mut conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.recover_interrupted()?;
        info!(path = %path.as_ref().display(), "opened local store");
        Ok(store)
    }

    /// Opens a fresh in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::init(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Writes a local mutation and enqueues it in one transaction.
    ///
    /// A new id queues `create`; an existing one queues `update`, with the
    /// given fields merged over the stored ones. `updatedAt` (and
    /// `createdAt` on create) are stamped with the current time.
    pub fn upsert_local(&self, entity_type: EntityType, record: Record) -> StoreResult<LocalWrite> {
        let id = record_id(&record)?.to_string();
        let record = strip_metadata(record);
        let now = now_millis();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        check_parent(&tx, entity_type, &record)?;

        let table = entity_type.table_name();
        let (operation, snapshot) = match load_row(&tx, entity_type, &id)? {
            None => {
                let mut snapshot = record;
                snapshot
                    .entry("createdAt")
                    .or_insert_with(|| Value::from(now));
                snapshot.insert("updatedAt".into(), Value::from(now));
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (id, data, is_synced, sync_status, local_updated_at)
                         VALUES (?1, ?2, 0, 'pending', ?3)"
                    ),
                    params![id, serde_json::to_string(&snapshot)?, now],
                )?;
                (QueueOperation::Create, snapshot)
            }
            Some(row) if row.meta.is_deleted => {
                return Err(StoreError::Deleted { entity_type, id });
            }
            Some(row) => {
                let mut snapshot = row.record;
                snapshot.extend(record);
                snapshot.insert("updatedAt".into(), Value::from(now));
                tx.execute(
                    &format!(
                        "UPDATE {table} SET data = ?2, is_synced = 0, sync_status = 'pending',
                             local_updated_at = ?3
                         WHERE id = ?1"
                    ),
                    params![id, serde_json::to_string(&snapshot)?, now],
                )?;
                (QueueOperation::Update, snapshot)
            }
        };

        let queue_id = enqueue(&tx, entity_type, &id, operation, &snapshot, now)?;
        tx.commit()?;
        debug!(%entity_type, %id, %operation, queue_id, "local write queued");
        Ok(LocalWrite {
            queue_id,
            operation,
        })
    }

    /// Soft-deletes a row and enqueues `delete` in one transaction.
    pub fn delete_local(&self, entity_type: EntityType, id: &str) -> StoreResult<LocalWrite> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let row = load_row(&tx, entity_type, id)?.ok_or_else(|| StoreError::NotFound {
            entity_type,
            id: id.to_string(),
        })?;
        if row.meta.is_deleted {
            return Err(StoreError::Deleted {
                entity_type,
                id: id.to_string(),
            });
        }

        let mut snapshot = row.record;
        snapshot.insert("deletedAt".into(), Value::from(now));
        snapshot.insert("updatedAt".into(), Value::from(now));
        tx.execute(
            &format!(
                "UPDATE {} SET data = ?2, is_deleted = 1, is_synced = 0, sync_status = 'pending',
                     local_updated_at = ?3
                 WHERE id = ?1",
                entity_type.table_name()
            ),
            params![id, serde_json::to_string(&snapshot)?, now],
        )?;

        let queue_id = enqueue(&tx, entity_type, id, QueueOperation::Delete, &snapshot, now)?;
        tx.commit()?;
        debug!(%entity_type, %id, queue_id, "local delete queued");
        Ok(LocalWrite {
            queue_id,
            operation: QueueOperation::Delete,
        })
    }

    /// Returns one row, deleted or not.
    pub fn get(&self, entity_type: EntityType, id: &str) -> StoreResult<Option<EntityRow>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let row = load_row(&tx, entity_type, id)?;
        tx.commit()?;
        Ok(row)
    }

    /// Lists rows of a type ordered by id.
    pub fn list(&self, entity_type: EntityType, include_deleted: bool) -> StoreResult<Vec<EntityRow>> {
        let conn = self.conn.lock();
        let filter = if include_deleted { "" } else { "WHERE is_deleted = 0" };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} {filter} ORDER BY id ASC",
            RawRow::COLUMNS,
            entity_type.table_name()
        ))?;
        let raw = stmt
            .query_map([], RawRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| r.into_row(entity_type)).collect()
    }

    /// Applies server-origin records in one transaction without enqueueing.
    ///
    /// Records are in local form (see `from_wire`). Rows without unsent
    /// local edits take the server version and become synced. Rows with
    /// unsent edits are marked `conflict`: the newer side, by timestamp,
    /// keeps its fields.
    pub fn upsert_from_server(
        &self,
        entity_type: EntityType,
        records: &[Record],
    ) -> StoreResult<ApplyStats> {
        let mut stats = ApplyStats::default();
        if records.is_empty() {
            return Ok(stats);
        }

        let table = entity_type.table_name();
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for record in records {
            let id = record_id(record)?.to_string();
            let server_ts = record.get("updatedAt").and_then(Value::as_i64);
            let deleted = record.get("deletedAt").is_some_and(|v| !v.is_null());
            let data = serde_json::to_string(&strip_metadata(record.clone()))?;
            let settled = if deleted { SyncStatus::Deleted } else { SyncStatus::Synced };

            match load_row(&tx, entity_type, &id)? {
                None => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {table} (id, data, is_synced, sync_status, local_updated_at,
                                 server_updated_at, is_deleted)
                             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)"
                        ),
                        params![id, data, settled.as_str(), server_ts.unwrap_or(now), server_ts, deleted],
                    )?;
                    if deleted {
                        stats.deleted += 1;
                    } else {
                        stats.inserted += 1;
                    }
                }
                Some(row) if row.meta.sync_status.has_unsent_edits() => {
                    // Without a server timestamp the local edit is kept.
                    let local_newer = server_ts.map_or(true, |ts| row.meta.local_updated_at >= ts);
                    if local_newer {
                        tx.execute(
                            &format!(
                                "UPDATE {table} SET sync_status = 'conflict',
                                     server_updated_at = COALESCE(?2, server_updated_at)
                                 WHERE id = ?1"
                            ),
                            params![id, server_ts],
                        )?;
                    } else {
                        tx.execute(
                            &format!(
                                "UPDATE {table} SET data = ?2, is_synced = 0, sync_status = 'conflict',
                                     server_updated_at = ?3, is_deleted = ?4
                                 WHERE id = ?1"
                            ),
                            params![id, data, server_ts, deleted],
                        )?;
                    }
                    warn!(%entity_type, %id, local_newer, "server version met unsent local edits");
                    stats.conflicts += 1;
                }
                Some(_) => {
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET data = ?2, is_synced = 1, sync_status = ?3,
                                 server_updated_at = ?4, is_deleted = ?5
                             WHERE id = ?1"
                        ),
                        params![id, data, settled.as_str(), server_ts, deleted],
                    )?;
                    if deleted {
                        stats.deleted += 1;
                    } else {
                        stats.updated += 1;
                    }
                }
            }
        }

        tx.commit()?;
        debug!(%entity_type, ?stats, "applied server records");
        Ok(stats)
    }

    /// Records a server acknowledgement for an entity.
    ///
    /// `serverUpdatedAt` is always recorded. The row only becomes synced
    /// (or `deleted`, for a soft-deleted row) when no other queue item for
    /// it is still waiting to be sent.
    pub fn mark_as_synced(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        server_updated_at: i64,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if outstanding_for(&tx, entity_type, entity_id)? == 0 {
            settle_row(&tx, entity_type, entity_id, server_updated_at)?;
        } else {
            let changed = tx.execute(
                &format!(
                    "UPDATE {} SET server_updated_at = ?2 WHERE id = ?1",
                    entity_type.table_name()
                ),
                params![entity_id, server_updated_at],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity_type,
                    id: entity_id.to_string(),
                });
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns the last successful sync checkpoint, epoch ms.
    pub fn last_sync_time(&self) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_TIME],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| StoreError::Corrupt(format!("{LAST_SYNC_TIME} = {v}")))
            })
            .transpose()
    }

    /// Stores the sync checkpoint, epoch ms.
    pub fn set_last_sync_time(&self, millis: i64) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_SYNC_TIME, millis.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueStatus;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn workspace(store: &LocalStore, id: &str) {
        store
            .upsert_local(EntityType::Workspace, record(json!({ "id": id, "name": id })))
            .unwrap();
    }

    #[test]
    fn upsert_local_queues_create_then_update() {
        let store = LocalStore::open_in_memory().unwrap();

        let first = store
            .upsert_local(EntityType::Workspace, record(json!({ "id": "w-1", "name": "Home" })))
            .unwrap();
        let second = store
            .upsert_local(EntityType::Workspace, record(json!({ "id": "w-1", "description": "mine" })))
            .unwrap();

        assert_eq!(first.operation, QueueOperation::Create);
        assert_eq!(second.operation, QueueOperation::Update);
        assert!(second.queue_id > first.queue_id);

        let row = store.get(EntityType::Workspace, "w-1").unwrap().unwrap();
        assert_eq!(row.record["name"], json!("Home"));
        assert_eq!(row.record["description"], json!("mine"));
        assert_eq!(row.meta.sync_status, SyncStatus::Pending);
        assert!(!row.meta.is_synced);
        assert!(row.meta.server_updated_at.is_none());

        let pending = store.get_pending_queue_items(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].payload["description"], json!("mine"));
        assert_eq!(pending[1].payload["name"], json!("Home"));
    }

    #[test]
    fn metadata_in_input_is_ignored() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert_local(
                EntityType::Workspace,
                record(json!({ "id": "w", "isSynced": true, "syncStatus": "synced" })),
            )
            .unwrap();

        let row = store.get(EntityType::Workspace, "w").unwrap().unwrap();
        assert!(!row.record.contains_key("isSynced"));
        assert_eq!(row.meta.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn child_of_deleted_parent_is_rejected_without_queueing() {
        let store = LocalStore::open_in_memory().unwrap();
        workspace(&store, "w-1");
        store
            .upsert_local(
                EntityType::Project,
                record(json!({ "id": "p-1", "workspaceId": "w-1" })),
            )
            .unwrap();
        store.delete_local(EntityType::Project, "p-1").unwrap();
        let before = store.queue_stats().unwrap();

        let err = store
            .upsert_local(EntityType::Task, record(json!({ "id": "t-1", "projectId": "p-1" })))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { reason: "deleted", .. }));

        let err = store
            .upsert_local(EntityType::Task, record(json!({ "id": "t-2", "projectId": "nope" })))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { reason: "missing", .. }));

        assert!(store.get(EntityType::Task, "t-1").unwrap().is_none());
        assert_eq!(store.queue_stats().unwrap(), before);
    }

    #[test]
    fn deleted_rows_are_soft_and_frozen() {
        let store = LocalStore::open_in_memory().unwrap();
        workspace(&store, "w-1");

        let write = store.delete_local(EntityType::Workspace, "w-1").unwrap();
        assert_eq!(write.operation, QueueOperation::Delete);

        let row = store.get(EntityType::Workspace, "w-1").unwrap().unwrap();
        assert!(row.meta.is_deleted);
        assert!(row.record.contains_key("deletedAt"));
        assert!(store.list(EntityType::Workspace, false).unwrap().is_empty());
        assert_eq!(store.list(EntityType::Workspace, true).unwrap().len(), 1);

        assert!(matches!(
            store.upsert_local(EntityType::Workspace, record(json!({ "id": "w-1" }))),
            Err(StoreError::Deleted { .. })
        ));
        assert!(matches!(
            store.delete_local(EntityType::Workspace, "w-1"),
            Err(StoreError::Deleted { .. })
        ));
        assert!(matches!(
            store.delete_local(EntityType::Workspace, "ghost"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn server_records_never_enqueue() {
        let store = LocalStore::open_in_memory().unwrap();
        let stats = store
            .upsert_from_server(
                EntityType::Workspace,
                &[record(json!({ "id": "w-9", "name": "Remote", "updatedAt": 5000 }))],
            )
            .unwrap();
        assert_eq!(stats.inserted, 1);

        let row = store.get(EntityType::Workspace, "w-9").unwrap().unwrap();
        assert!(row.meta.is_synced);
        assert_eq!(row.meta.sync_status, SyncStatus::Synced);
        assert_eq!(row.meta.server_updated_at, Some(5000));
        assert_eq!(store.queue_stats().unwrap().pending, 0);
        assert!(store.list_queue(None, 100).unwrap().is_empty());
    }

    #[test]
    fn server_delete_soft_deletes() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert_from_server(
                EntityType::Tag,
                &[record(json!({ "id": "g", "updatedAt": 1 }))],
            )
            .unwrap();
        let stats = store
            .upsert_from_server(
                EntityType::Tag,
                &[record(json!({ "id": "g", "updatedAt": 2, "deletedAt": 2 }))],
            )
            .unwrap();
        assert_eq!(stats.deleted, 1);

        let row = store.get(EntityType::Tag, "g").unwrap().unwrap();
        assert!(row.meta.is_deleted);
        assert_eq!(row.meta.sync_status, SyncStatus::Deleted);
    }

    #[test]
    fn newer_local_edit_survives_pull_as_conflict() {
        let store = LocalStore::open_in_memory().unwrap();
        workspace(&store, "w-1");

        let stats = store
            .upsert_from_server(
                EntityType::Workspace,
                &[record(json!({ "id": "w-1", "name": "Old server name", "updatedAt": 1000 }))],
            )
            .unwrap();
        assert_eq!(stats.conflicts, 1);

        let row = store.get(EntityType::Workspace, "w-1").unwrap().unwrap();
        assert_eq!(row.record["name"], json!("w-1"));
        assert_eq!(row.meta.sync_status, SyncStatus::Conflict);
        assert_eq!(row.meta.server_updated_at, Some(1000));
    }

    #[test]
    fn undated_server_record_keeps_unsent_edit() {
        let store = LocalStore::open_in_memory().unwrap();
        workspace(&store, "w-1");
        store
            .upsert_from_server(
                EntityType::Workspace,
                &[record(json!({ "id": "w-1", "name": "Dated", "updatedAt": 1000 }))],
            )
            .unwrap();

        let stats = store
            .upsert_from_server(
                EntityType::Workspace,
                &[record(json!({ "id": "w-1", "name": "Undated" }))],
            )
            .unwrap();
        assert_eq!(stats.conflicts, 1);

        let row = store.get(EntityType::Workspace, "w-1").unwrap().unwrap();
        assert_eq!(row.record["name"], json!("w-1"));
        assert_eq!(row.meta.sync_status, SyncStatus::Conflict);
        assert_eq!(row.meta.server_updated_at, Some(1000));
    }

    #[test]
    fn newer_server_version_overwrites_unsent_edit() {
        let store = LocalStore::open_in_memory().unwrap();
        workspace(&store, "w-1");
        let future = now_millis() + 60_000;

        store
            .upsert_from_server(
                EntityType::Workspace,
                &[record(json!({ "id": "w-1", "name": "Server", "updatedAt": future }))],
            )
            .unwrap();

        let row = store.get(EntityType::Workspace, "w-1").unwrap().unwrap();
        assert_eq!(row.record["name"], json!("Server"));
        assert_eq!(row.meta.sync_status, SyncStatus::Conflict);
        assert!(!row.meta.is_synced);
    }

    #[test]
    fn mark_as_synced_waits_for_later_edits() {
        let store = LocalStore::open_in_memory().unwrap();
        let first = store
            .upsert_local(EntityType::Workspace, record(json!({ "id": "w", "name": "a" })))
            .unwrap();
        store
            .upsert_local(EntityType::Workspace, record(json!({ "id": "w", "name": "b" })))
            .unwrap();

        store
            .mark_queue_item(first.queue_id, QueueStatus::Processing, None)
            .unwrap();
        store.mark_as_synced(EntityType::Workspace, "w", 42).unwrap();
        let row = store.get(EntityType::Workspace, "w").unwrap().unwrap();
        assert_eq!(row.meta.sync_status, SyncStatus::Pending);
        assert_eq!(row.meta.server_updated_at, Some(42));

        assert!(matches!(
            store.mark_as_synced(EntityType::Workspace, "ghost", 1),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn checkpoint_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.last_sync_time().unwrap(), None);
        store.set_last_sync_time(1_735_689_600_000).unwrap();
        store.set_last_sync_time(1_735_689_600_500).unwrap();
        assert_eq!(store.last_sync_time().unwrap(), Some(1_735_689_600_500));
    }
}
