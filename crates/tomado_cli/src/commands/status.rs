//! Status command implementation.

use super::{format_millis, open_store};
use serde::Serialize;
use std::path::Path;
use tomado_store::QueueStats;

/// Sync status of the local database.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Database path.
    pub path: String,
    /// Last pull checkpoint, epoch ms.
    pub last_sync_time: Option<i64>,
    /// Queue counts.
    pub queue: QueueStats,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    let store = open_store(path)?;
    let report = StatusReport {
        path: path.display().to_string(),
        last_sync_time: store.last_sync_time()?,
        queue: store.queue_stats()?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Database:   {}", report.path);
            println!("Last sync:  {}", format_millis(report.last_sync_time));
            println!("Pending:    {}", report.queue.pending);
            println!("Processing: {}", report.queue.processing);
            println!("Failed:     {}", report.queue.failed);
            println!("Completed:  {}", report.queue.completed);
        }
    }
    Ok(())
}
