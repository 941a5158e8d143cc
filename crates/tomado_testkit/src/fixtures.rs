//! Test fixtures and store helpers.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tomado_store::LocalStore;
use tomado_sync_protocol::{EntityType, Record};

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(LocalStore::open_in_memory().expect("Failed to open in-memory store")),
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test store.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalStore::open(temp_dir.path().join("tomado.db"))
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("tomado.db"))
    }

    /// Closes and reopens a file-backed store, simulating an app restart.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores or if other handles to the store are
    /// still alive.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file-backed stores can be reopened");
        let Self { store, _temp_dir } = self;
        drop(
            Arc::try_unwrap(store)
                .unwrap_or_else(|_| panic!("Store still shared, cannot reopen")),
        );
        Self {
            store: Arc::new(LocalStore::open(path).expect("Failed to reopen store")),
            _temp_dir,
        }
    }

    /// Returns a shared handle to the store.
    pub fn handle(&self) -> Arc<LocalStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Converts a JSON object literal into a [`Record`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Returns a fresh random entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ids of a small workspace → project → task hierarchy.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    /// Workspace id.
    pub workspace: String,
    /// Project id.
    pub project: String,
    /// Task id.
    pub task: String,
}

/// Creates a workspace, a project in it and a task in the project through
/// local writes, so all three are queued for push.
pub fn seed_hierarchy(store: &LocalStore) -> Hierarchy {
    let hierarchy = Hierarchy {
        workspace: new_id(),
        project: new_id(),
        task: new_id(),
    };
    store
        .upsert_local(
            EntityType::Workspace,
            record(serde_json::json!({ "id": hierarchy.workspace, "name": "Personal" })),
        )
        .expect("Failed to create workspace");
    store
        .upsert_local(
            EntityType::Project,
            record(serde_json::json!({
                "id": hierarchy.project,
                "workspaceId": hierarchy.workspace,
                "name": "Writing",
                "color": "#e74c3c"
            })),
        )
        .expect("Failed to create project");
    store
        .upsert_local(
            EntityType::Task,
            record(serde_json::json!({
                "id": hierarchy.task,
                "projectId": hierarchy.project,
                "title": "Draft chapter one",
                "status": "todo",
                "position": 1
            })),
        )
        .expect("Failed to create task");
    hierarchy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        let ids = seed_hierarchy(&store);
        assert!(store.get(EntityType::Task, &ids.task).unwrap().is_some());
        assert_eq!(store.queue_stats().unwrap().pending, 3);
    }

    #[test]
    fn file_store_survives_reopen() {
        let store = TestStore::file();
        let ids = seed_hierarchy(&store);
        let store = store.reopen();
        assert!(store.get(EntityType::Project, &ids.project).unwrap().is_some());
        assert_eq!(store.queue_stats().unwrap().pending, 3);
    }
}
