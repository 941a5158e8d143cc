//! Queue maintenance commands: `queue`, `retry` and `gc`.

use super::{format_millis, open_store};
use std::path::Path;
use tomado_store::QueueStatus;
use tomado_sync_protocol::now_millis;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Runs the queue command.
pub fn list(
    path: &Path,
    status: Option<&str>,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = status.map(str::parse::<QueueStatus>).transpose()?;
    let store = open_store(path)?;
    let items = store.list_queue(status, limit)?;
    if items.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    println!(
        "{:>6}  {:<10}  {:<7}  {:<16}  {:<36}  {:>8}  {}",
        "ID", "STATUS", "OP", "ENTITY", "ENTITY ID", "ATTEMPTS", "LAST ATTEMPT"
    );
    for item in items {
        let status = if item.parked {
            "parked".to_string()
        } else {
            item.status.to_string()
        };
        println!(
            "{:>6}  {:<10}  {:<7}  {:<16}  {:<36}  {:>8}  {}",
            item.id,
            status,
            item.operation,
            item.entity_type,
            item.entity_id,
            item.attempts,
            format_millis(item.last_attempt_at)
        );
        if let Some(error) = &item.error {
            println!("        error: {error}");
        }
    }
    Ok(())
}

/// Runs the retry command.
pub fn retry(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let requeued = store.retry_failed()?;
    println!("{requeued} failed item(s) requeued");
    Ok(())
}

/// Runs the gc command.
pub fn gc(path: &Path, older_than_days: u32) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let cutoff = now_millis() - i64::from(older_than_days) * DAY_MS;
    let purged = store.purge_completed(cutoff)?;
    println!("{purged} completed item(s) purged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tomado_sync_protocol::EntityType;
    use tomado_testkit::{record, TestStore};

    #[test]
    fn retry_and_gc() {
        let fixture = TestStore::file();
        let path = fixture.path().unwrap();
        let first = fixture
            .upsert_local(EntityType::Tag, record(json!({ "id": "a" })))
            .unwrap();
        let second = fixture
            .upsert_local(EntityType::Tag, record(json!({ "id": "b" })))
            .unwrap();
        for id in [first.queue_id, second.queue_id] {
            fixture
                .mark_queue_item(id, QueueStatus::Processing, None)
                .unwrap();
        }
        fixture
            .mark_queue_item(first.queue_id, QueueStatus::Completed, None)
            .unwrap();
        fixture
            .mark_queue_item(second.queue_id, QueueStatus::Failed, Some("HTTP 500"))
            .unwrap();

        list(&path, Some("failed"), 10).unwrap();
        assert!(list(&path, Some("stuck"), 10).is_err());

        retry(&path).unwrap();
        assert_eq!(fixture.queue_stats().unwrap().pending, 1);

        gc(&path, 1).unwrap();
        assert_eq!(fixture.queue_stats().unwrap().completed, 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        gc(&path, 0).unwrap();
        assert_eq!(fixture.queue_stats().unwrap().completed, 0);
    }
}
