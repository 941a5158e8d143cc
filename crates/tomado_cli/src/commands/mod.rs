//! CLI command implementations.

pub mod edit;
pub mod queue;
pub mod show;
pub mod status;
pub mod sync;

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tomado_store::LocalStore;
use tomado_sync_engine::{HttpTransport, SyncConfig, SyncCoordinator};

/// Connection settings for the REST service.
#[derive(Debug, Clone)]
pub struct Remote {
    /// Base URL.
    pub base_url: String,
    /// Bearer token.
    pub token: Option<String>,
}

/// Opens the local store, creating it if needed.
pub fn open_store(path: &Path) -> Result<Arc<LocalStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(LocalStore::open(path)?))
}

impl Remote {
    /// Returns the engine configuration for this remote.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(self.base_url.clone())
    }
}

/// Builds a coordinator talking HTTP to `remote`.
pub fn coordinator(
    path: &Path,
    remote: &Remote,
    config: SyncConfig,
) -> Result<SyncCoordinator<HttpTransport>, Box<dyn std::error::Error>> {
    let transport = HttpTransport::new(config.base_url.clone(), config.request_timeout)?;
    let coordinator = SyncCoordinator::new(config, open_store(path)?, transport)?;
    coordinator.set_auth_token(remote.token.clone());
    Ok(coordinator)
}

/// Formats epoch milliseconds for display.
pub fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
