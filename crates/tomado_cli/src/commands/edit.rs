//! Local edit commands: `put` and `delete`.

use super::open_store;
use serde_json::Value;
use std::path::Path;
use tomado_sync_protocol::EntityType;

/// Runs the put command.
pub fn put(path: &Path, entity: EntityType, json: &str) -> Result<(), Box<dyn std::error::Error>> {
    let record = match serde_json::from_str::<Value>(json)? {
        Value::Object(record) => record,
        _ => return Err("expected a JSON object".into()),
    };
    let store = open_store(path)?;
    let write = store.upsert_local(entity, record)?;
    println!("{} {} queued (#{})", write.operation, entity, write.queue_id);
    Ok(())
}

/// Runs the delete command.
pub fn delete(path: &Path, entity: EntityType, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let write = store.delete_local(entity, id)?;
    println!("delete {entity} {id} queued (#{})", write.queue_id);
    Ok(())
}
