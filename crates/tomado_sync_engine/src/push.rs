//! Push pipeline: drains the operation queue to the REST service.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use serde::Serialize;
use serde_json::Value;
use tomado_store::{LocalStore, QueueItem, QueueStatus, SyncStatus};
use tomado_sync_protocol::{now_millis, push_request, server_updated_at, QueueOperation};
use tracing::{debug, info, warn};

/// Counts from one push phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    /// Failed items put back in line before the batch was read.
    pub requeued: u64,
    /// Items taken from the queue.
    pub attempted: u64,
    /// Items the server accepted.
    pub pushed: u64,
    /// Items that failed and stay in the queue.
    pub failed: u64,
    /// Failed items the server rejected for good; counted in `failed` too.
    pub parked: u64,
    /// Items closed without sending because a newer server version won.
    pub superseded: u64,
}

/// Sends pending queue items in FIFO order, one request per item.
///
/// A failing item is marked failed and the batch goes on. Items rejected
/// with a non-retryable error are parked. Only store errors abort the phase.
pub(crate) struct PushPipeline<'a, T: SyncTransport + ?Sized> {
    store: &'a LocalStore,
    transport: &'a T,
    config: &'a SyncConfig,
}

impl<'a, T: SyncTransport + ?Sized> PushPipeline<'a, T> {
    pub(crate) fn new(store: &'a LocalStore, transport: &'a T, config: &'a SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub(crate) async fn run(
        &self,
        token: Option<&str>,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> SyncResult<PushOutcome> {
        let mut outcome = PushOutcome::default();
        let retry = &self.config.retry;
        outcome.requeued = self.store.requeue_failed(
            retry.max_attempts,
            |attempts| retry.delay_for_attempt(attempts),
            now_millis(),
        )? as u64;

        let items = self
            .store
            .get_pending_queue_items(self.config.push_batch_size)?;
        if items.is_empty() {
            debug!("push: queue empty");
            return Ok(outcome);
        }

        for item in items {
            outcome.attempted += 1;
            self.store
                .mark_queue_item(item.id, QueueStatus::Processing, None)?;
            progress(format!(
                "Pushing {} {} {}",
                item.operation, item.entity_type, item.entity_id
            ));

            if let Some(server_ts) = self.superseded_by(&item)? {
                debug!(id = item.id, entity = %item.entity_type, entity_id = %item.entity_id, "push: superseded by server version");
                self.store.complete_superseded(&item, server_ts)?;
                outcome.superseded += 1;
                continue;
            }

            match self.send(&item, token).await {
                Ok(server_ts) => {
                    self.store
                        .mark_as_synced(item.entity_type, &item.entity_id, server_ts)?;
                    self.store
                        .mark_queue_item(item.id, QueueStatus::Completed, None)?;
                    outcome.pushed += 1;
                }
                Err(SyncError::Store(err)) => return Err(err.into()),
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(
                        id = item.id,
                        operation = %item.operation,
                        entity = %item.entity_type,
                        entity_id = %item.entity_id,
                        attempts = item.attempts + 1,
                        retryable,
                        error = %err,
                        "push: item failed"
                    );
                    if retryable {
                        self.store.mark_queue_item(
                            item.id,
                            QueueStatus::Failed,
                            Some(&err.to_string()),
                        )?;
                    } else {
                        self.store.park_queue_item(item.id, &err.to_string())?;
                        outcome.parked += 1;
                    }
                    outcome.failed += 1;
                }
            }
        }

        info!(
            pushed = outcome.pushed,
            failed = outcome.failed,
            parked = outcome.parked,
            superseded = outcome.superseded,
            "push phase finished"
        );
        Ok(outcome)
    }

    /// Returns the server timestamp that makes this item obsolete, if any.
    ///
    /// That is the case when a pull overwrote the row with a server version
    /// newer than the edit the item carries.
    fn superseded_by(&self, item: &QueueItem) -> SyncResult<Option<i64>> {
        let Some(row) = self.store.get(item.entity_type, &item.entity_id)? else {
            return Ok(None);
        };
        if row.meta.sync_status != SyncStatus::Conflict {
            return Ok(None);
        }
        Ok(row.meta.server_updated_at.filter(|ts| *ts > item.created_at))
    }

    /// Sends one item and returns the server's `updated_at` for it.
    async fn send(&self, item: &QueueItem, token: Option<&str>) -> SyncResult<i64> {
        let request = push_request(
            item.entity_type,
            &item.entity_id,
            item.operation,
            &item.payload,
        )?;
        let response = self.transport.execute(&request, token).await?;

        if response.is_success() {
            let server_ts = match server_updated_at(response.body.as_ref()) {
                Ok(Some(ts)) => Some(ts),
                Ok(None) => None,
                Err(err) => {
                    warn!(%request, error = %err, "push: ignoring unreadable updated_at");
                    None
                }
            };
            return Ok(server_ts.unwrap_or_else(|| {
                if item.operation.returns_entity() {
                    debug!(%request, "push: response without updated_at, using local clock");
                }
                now_millis()
            }));
        }

        if item.operation == QueueOperation::Delete && response.status == 404 {
            debug!(%request, "push: entity already gone on the server");
            return Ok(now_millis());
        }

        Err(SyncError::Http {
            status: response.status,
            message: error_message(response.body.as_ref()),
        })
    }
}

/// Pulls a human-readable message out of an error response body.
fn error_message(body: Option<&Value>) -> String {
    match body {
        None | Some(Value::Null) => "no response body".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(map)) => ["message", "error", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        Some(other) => other.to_string(),
    }
}
