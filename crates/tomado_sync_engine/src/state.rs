//! Observable sync state and cycle results.

use crate::pull::PullOutcome;
use crate::push::PushOutcome;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Not syncing.
    Idle,
    /// A sync cycle is running.
    Syncing,
    /// The last cycle aborted.
    Error,
    /// Connectivity is down.
    Offline,
}

impl EngineStatus {
    /// Returns the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Syncing => "syncing",
            EngineStatus::Error => "error",
            EngineStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine state, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Current status.
    pub status: EngineStatus,
    /// Last successful pull checkpoint, epoch ms.
    pub last_sync_time: Option<i64>,
    /// Queue items waiting to be sent.
    pub pending_changes: u64,
    /// Queue items that failed and wait for a retry.
    pub failed_changes: u64,
    /// Whether connectivity is up.
    pub is_online: bool,
    /// Human-readable step of the running cycle.
    pub current_operation: Option<String>,
    /// Message of the last aborted cycle.
    pub error: Option<String>,
}

impl SyncState {
    pub(crate) fn initial(online: bool, last_sync_time: Option<i64>) -> Self {
        Self {
            status: if online {
                EngineStatus::Idle
            } else {
                EngineStatus::Offline
            },
            last_sync_time,
            pending_changes: 0,
            failed_changes: 0,
            is_online: online,
            current_operation: None,
            error: None,
        }
    }

    /// Returns true while a cycle runs.
    pub fn is_syncing(&self) -> bool {
        self.status == EngineStatus::Syncing
    }
}

/// Statistics about sync operations since the coordinator was created.
///
/// Skipped sync requests leave these untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Cycles that ran to the end.
    pub cycles_completed: u64,
    /// Cycles that aborted with an error.
    pub cycles_failed: u64,
    /// Queue items accepted by the server.
    pub items_pushed: u64,
    /// Queue item failures.
    pub items_failed: u64,
    /// Queue items rejected for good and parked.
    pub items_parked: u64,
    /// Queue items closed because a newer server version won.
    pub items_superseded: u64,
    /// Server records applied locally.
    pub records_pulled: u64,
    /// Entity type fetches that failed.
    pub pull_failures: u64,
    /// Conflicts met while pulling.
    pub conflicts_encountered: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a completed sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCycleResult {
    /// Push phase counts.
    pub push: PushOutcome,
    /// Pull phase counts.
    pub pull: PullOutcome,
    /// New checkpoint, if every entity type was pulled.
    pub checkpoint: Option<i64>,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Why a sync request did not start a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another cycle is running.
    AlreadySyncing,
    /// Connectivity is down.
    Offline,
    /// No auth token is set.
    NotAuthenticated,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::AlreadySyncing => "a sync is already running",
            SkipReason::Offline => "offline",
            SkipReason::NotAuthenticated => "not authenticated",
        })
    }
}

/// Outcome of a sync request.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// No cycle ran.
    Skipped(SkipReason),
    /// A cycle ran to the end.
    Completed(SyncCycleResult),
}

impl SyncOutcome {
    /// Returns the cycle result, if one ran.
    pub fn completed(&self) -> Option<&SyncCycleResult> {
        match self {
            SyncOutcome::Completed(result) => Some(result),
            SyncOutcome::Skipped(_) => None,
        }
    }

    /// Returns the skip reason, if no cycle ran.
    pub fn skipped(&self) -> Option<SkipReason> {
        match self {
            SyncOutcome::Skipped(reason) => Some(*reason),
            SyncOutcome::Completed(_) => None,
        }
    }
}
