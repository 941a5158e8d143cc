//! Schema creation and forward-only migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction and bumps the version when it commits.

use crate::error::StoreResult;
use rusqlite::Connection;
use tomado_sync_protocol::EntityType;
use tracing::{debug, info};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

const QUEUE_AND_METADATA: &str = "
CREATE TABLE IF NOT EXISTS sync_queue (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type     TEXT    NOT NULL,
    entity_id       TEXT    NOT NULL,
    operation       TEXT    NOT NULL,
    payload         TEXT    NOT NULL,
    created_at      INTEGER NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_attempt_at INTEGER,
    error           TEXT,
    status          TEXT    NOT NULL DEFAULT 'pending'
);
CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue (status, id);
CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue (entity_type, entity_id, status);

CREATE TABLE IF NOT EXISTS sync_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const PARKED_ITEMS: &str = "
ALTER TABLE sync_queue ADD COLUMN parked INTEGER NOT NULL DEFAULT 0;
";

fn entity_table(entity_type: EntityType) -> String {
    let table = entity_type.table_name();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id                TEXT    PRIMARY KEY,
            data              TEXT    NOT NULL,
            is_synced         INTEGER NOT NULL DEFAULT 0,
            sync_status       TEXT    NOT NULL DEFAULT 'pending',
            local_updated_at  INTEGER NOT NULL,
            server_updated_at INTEGER,
            is_deleted        INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_sync_status ON {table} (sync_status);"
    )
}

/// Configures the connection and applies pending migrations.
pub(crate) fn init(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;

    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        debug!(version = current, "schema up to date");
        return Ok(());
    }

    if current < 1 {
        let tx = conn.transaction()?;
        tx.execute_batch(QUEUE_AND_METADATA)?;
        for entity_type in EntityType::PULL_ORDER {
            tx.execute_batch(&entity_table(entity_type))?;
        }
        tx.execute_batch("PRAGMA user_version = 1;")?;
        tx.commit()?;
        info!(from = current, to = 1, "applied schema migration");
    }

    if current < 2 {
        let tx = conn.transaction()?;
        tx.execute_batch(PARKED_ITEMS)?;
        tx.execute_batch("PRAGMA user_version = 2;")?;
        tx.commit()?;
        info!(from = current.max(1), to = 2, "applied schema migration");
    }

    Ok(())
}
