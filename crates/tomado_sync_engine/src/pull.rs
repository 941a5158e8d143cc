//! Pull pipeline: fetches server changes per entity type.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use serde::Serialize;
use tomado_store::LocalStore;
use tomado_sync_protocol::{from_wire, parse_collection, pull_request, EntityType, Record};
use tracing::{debug, info, warn};

/// Counts from one pull phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullOutcome {
    /// Records applied to the store.
    pub records: u64,
    /// Records that met unsent local edits.
    pub conflicts: u64,
    /// Entity types whose fetch failed this cycle.
    pub failed_types: Vec<EntityType>,
}

impl PullOutcome {
    /// Returns true if every entity type was fetched.
    pub fn is_complete(&self) -> bool {
        self.failed_types.is_empty()
    }
}

/// Fetches changes for every entity type, parents before children.
///
/// A failed fetch is logged and skipped so the other types still sync.
/// Store errors abort the phase.
pub(crate) struct PullPipeline<'a, T: SyncTransport + ?Sized> {
    store: &'a LocalStore,
    transport: &'a T,
}

impl<'a, T: SyncTransport + ?Sized> PullPipeline<'a, T> {
    pub(crate) fn new(store: &'a LocalStore, transport: &'a T) -> Self {
        Self { store, transport }
    }

    pub(crate) async fn run(
        &self,
        since: Option<i64>,
        token: Option<&str>,
        progress: &(dyn Fn(String) + Send + Sync),
    ) -> SyncResult<PullOutcome> {
        let mut outcome = PullOutcome::default();

        for entity_type in EntityType::PULL_ORDER {
            progress(format!("Pulling {}", entity_type.endpoint()));

            let records = match self.fetch(entity_type, since, token).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(entity = %entity_type, error = %err, "pull: fetch failed, skipping type");
                    outcome.failed_types.push(entity_type);
                    continue;
                }
            };
            if records.is_empty() {
                debug!(entity = %entity_type, "pull: no changes");
                continue;
            }

            let stats = self.store.upsert_from_server(entity_type, &records)?;
            outcome.records += stats.total();
            outcome.conflicts += stats.conflicts;
        }

        info!(
            records = outcome.records,
            conflicts = outcome.conflicts,
            failed_types = outcome.failed_types.len(),
            "pull phase finished"
        );
        Ok(outcome)
    }

    async fn fetch(
        &self,
        entity_type: EntityType,
        since: Option<i64>,
        token: Option<&str>,
    ) -> SyncResult<Vec<Record>> {
        let request = pull_request(entity_type, since)?;
        let response = self.transport.execute(&request, token).await?;
        if !response.is_success() {
            return Err(SyncError::Http {
                status: response.status,
                message: format!("pull of {} rejected", entity_type.endpoint()),
            });
        }

        parse_collection(response.body)?
            .iter()
            .map(|wire| from_wire(entity_type, wire))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::{json, Value};
    use tomado_store::SyncStatus;
    use tomado_sync_protocol::{Method, RemoteResponse};

    fn noop(_: String) {}

    #[tokio::test]
    async fn pulls_in_dependency_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let transport = MockTransport::new();

        let outcome = PullPipeline::new(&store, &transport)
            .run(None, None, &noop)
            .await
            .unwrap();
        assert!(outcome.is_complete());

        let paths: Vec<String> = transport
            .requests()
            .into_iter()
            .map(|r| r.request.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/workspaces",
                "/projects",
                "/tags",
                "/tasks",
                "/comments",
                "/pomodoro-sessions"
            ]
        );
        assert!(transport.requests().iter().all(|r| r.request.query.is_empty()));
    }

    #[tokio::test]
    async fn incremental_pull_sends_checkpoint() {
        let store = LocalStore::open_in_memory().unwrap();
        let transport = MockTransport::new();

        PullPipeline::new(&store, &transport)
            .run(Some(1_735_689_600_000), Some("tok"), &noop)
            .await
            .unwrap();

        for seen in transport.requests() {
            assert_eq!(
                seen.request.query,
                vec![("updatedSince".to_string(), "2025-01-01T00:00:00.000Z".to_string())]
            );
            assert_eq!(seen.token.as_deref(), Some("tok"));
        }
    }

    #[tokio::test]
    async fn applies_records_in_local_form() {
        let store = LocalStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.enqueue_reply(
            Method::Get,
            "/workspaces",
            MockReply::ok(json!({ "data": [{ "id": "w", "name": "Home", "updated_at": "2025-01-01T00:00:00Z" }] })),
        );
        transport.enqueue_reply(
            Method::Get,
            "/tasks",
            MockReply::ok(json!([{
                "id": "t",
                "title": "Write",
                "sort_order": 3,
                "due_date": "2025-02-01T09:00:00Z",
                "updated_at": "2025-01-01T00:00:00Z"
            }])),
        );

        let outcome = PullPipeline::new(&store, &transport)
            .run(None, None, &noop)
            .await
            .unwrap();
        assert_eq!(outcome.records, 2);

        let task = store.get(EntityType::Task, "t").unwrap().unwrap();
        assert_eq!(task.record["position"], json!(3));
        assert_eq!(task.record["dueDate"], json!(1_738_400_400_000_i64));
        assert_eq!(task.meta.sync_status, SyncStatus::Synced);
        assert_eq!(task.meta.server_updated_at, Some(1_735_689_600_000));
        assert_eq!(store.queue_stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn failed_type_is_skipped() {
        let store = LocalStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.set_reply(
            Method::Get,
            "/projects",
            MockReply::Respond(RemoteResponse::new(500, Some(Value::Null))),
        );
        transport.enqueue_reply(Method::Get, "/tags", MockReply::network_error("reset"));
        transport.enqueue_reply(
            Method::Get,
            "/comments",
            MockReply::ok(json!([{ "id": "c", "content": "hi" }])),
        );

        let outcome = PullPipeline::new(&store, &transport)
            .run(None, None, &noop)
            .await
            .unwrap();
        assert_eq!(outcome.failed_types, vec![EntityType::Project, EntityType::Tag]);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.records, 1);
        assert!(store.get(EntityType::Comment, "c").unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_collection_fails_only_that_type() {
        let store = LocalStore::open_in_memory().unwrap();
        let transport = MockTransport::new();
        transport.enqueue_reply(Method::Get, "/tags", MockReply::ok(json!([{ "name": "no id" }])));

        let outcome = PullPipeline::new(&store, &transport)
            .run(None, None, &noop)
            .await
            .unwrap();
        assert_eq!(outcome.failed_types, vec![EntityType::Tag]);
    }
}
