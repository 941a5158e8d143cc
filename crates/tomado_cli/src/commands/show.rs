//! Show command implementation.

use super::open_store;
use serde_json::Value;
use std::path::Path;
use tomado_sync_protocol::EntityType;

/// Runs the show command. Prints rows with their sync metadata as JSON.
pub fn run(
    path: &Path,
    entity: EntityType,
    id: Option<&str>,
    include_deleted: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let rows = match id {
        Some(id) => store
            .get(entity, id)?
            .into_iter()
            .collect::<Vec<_>>(),
        None => store.list(entity, include_deleted)?,
    };
    if rows.is_empty() {
        println!("no {entity} found");
        return Ok(());
    }

    let records: Vec<Value> = rows
        .iter()
        .map(|row| Value::Object(row.to_local_record()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
