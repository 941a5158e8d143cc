//! The sync coordinator: owns the state machine and runs cycles.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::pull::PullPipeline;
use crate::push::PushPipeline;
use crate::state::{EngineStatus, SkipReason, SyncCycleResult, SyncOutcome, SyncState, SyncStats};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tomado_store::{LocalStore, QueueStats};
use tomado_sync_protocol::now_millis;
use tracing::{debug, error, info, warn};

struct AutoSync {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner<T: SyncTransport> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    transport: T,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    token: RwLock<Option<String>>,
    events: broadcast::Sender<SyncState>,
    in_flight: AtomicBool,
    auto_sync: Mutex<Option<AutoSync>>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs sync cycles against the REST service and publishes state changes.
///
/// Cloning is cheap; clones share one engine. At most one cycle runs at a
/// time: concurrent requests are skipped, not queued.
pub struct SyncCoordinator<T: SyncTransport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncTransport + 'static> Clone for SyncCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + 'static> SyncCoordinator<T> {
    /// Creates a coordinator over `store` and `transport`.
    ///
    /// The initial state reflects the stored checkpoint and queue counts.
    pub fn new(config: SyncConfig, store: Arc<LocalStore>, transport: T) -> SyncResult<Self> {
        let mut state = SyncState::initial(config.start_online, store.last_sync_time()?);
        let counts = store.queue_stats()?;
        state.pending_changes = counts.pending;
        state.failed_changes = counts.failed;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                transport,
                state: RwLock::new(state),
                stats: RwLock::new(SyncStats::default()),
                token: RwLock::new(None),
                events,
                in_flight: AtomicBool::new(false),
                auto_sync: Mutex::new(None),
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        self.inner.state.read().clone()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Subscribes to state changes.
    ///
    /// Every change sends a full snapshot. A receiver that falls behind
    /// by more than the channel capacity sees `Lagged` and then the most
    /// recent snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncState> {
        self.inner.events.subscribe()
    }

    /// Sets or clears the bearer token used for requests.
    pub fn set_auth_token(&self, token: Option<String>) {
        debug!(authenticated = token.is_some(), "auth token updated");
        *self.inner.token.write() = token;
    }

    /// Returns true if a token is set.
    pub fn is_authenticated(&self) -> bool {
        self.inner.token.read().is_some()
    }

    /// Returns true if connectivity is up.
    pub fn is_online(&self) -> bool {
        self.inner.state.read().is_online
    }

    fn update_state(&self, change: impl FnOnce(&mut SyncState)) {
        let snapshot = {
            let mut state = self.inner.state.write();
            change(&mut state);
            state.clone()
        };
        // No subscribers is not an error.
        let _ = self.inner.events.send(snapshot);
    }

    fn apply_counts(state: &mut SyncState, counts: &QueueStats) {
        state.pending_changes = counts.pending;
        state.failed_changes = counts.failed;
    }

    /// Runs one sync cycle: push the queue, then pull every entity type.
    ///
    /// Returns `Skipped` without touching the network when a cycle is
    /// already running, the engine is offline or no token is set. Item
    /// and per-type failures are contained in the result; an `Err` means
    /// the cycle aborted and the state moved to `error`.
    pub async fn perform_sync(&self) -> SyncResult<SyncOutcome> {
        let token = self.inner.token.read().clone();

        let begin = {
            let mut state = self.inner.state.write();
            let skip = if self.inner.in_flight.load(Ordering::SeqCst) {
                Some(SkipReason::AlreadySyncing)
            } else if !state.is_online {
                Some(SkipReason::Offline)
            } else if token.is_none() {
                Some(SkipReason::NotAuthenticated)
            } else {
                None
            };
            match skip {
                Some(reason) => Err(reason),
                None => {
                    self.inner.in_flight.store(true, Ordering::SeqCst);
                    state.status = EngineStatus::Syncing;
                    state.error = None;
                    state.current_operation = Some("Starting sync".to_string());
                    Ok(state.clone())
                }
            }
        };
        let snapshot = match begin {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                debug!(%reason, "sync skipped");
                return Ok(SyncOutcome::Skipped(reason));
            }
        };
        let _guard = CycleGuard(&self.inner.in_flight);
        let _ = self.inner.events.send(snapshot);
        info!("sync cycle started");

        let result = self.run_cycle(token.as_deref()).await;
        if result.is_err() {
            // An aborted push can leave its current item in flight.
            if let Err(err) = self.inner.store.recover_interrupted() {
                warn!(error = %err, "could not recover in-flight queue items");
            }
        }
        let counts = self.inner.store.queue_stats();

        match result {
            Ok(result) => {
                {
                    let mut stats = self.inner.stats.write();
                    stats.cycles_completed += 1;
                    stats.items_pushed += result.push.pushed;
                    stats.items_failed += result.push.failed;
                    stats.items_parked += result.push.parked;
                    stats.items_superseded += result.push.superseded;
                    stats.records_pulled += result.pull.records;
                    stats.pull_failures += result.pull.failed_types.len() as u64;
                    stats.conflicts_encountered += result.pull.conflicts;
                    stats.last_error = None;
                }
                self.update_state(|state| {
                    state.status = if state.is_online {
                        EngineStatus::Idle
                    } else {
                        EngineStatus::Offline
                    };
                    state.current_operation = None;
                    if let Some(checkpoint) = result.checkpoint {
                        state.last_sync_time = Some(checkpoint);
                    }
                    if let Ok(counts) = &counts {
                        Self::apply_counts(state, counts);
                    }
                });
                info!(
                    pushed = result.push.pushed,
                    failed = result.push.failed,
                    pulled = result.pull.records,
                    checkpoint_advanced = result.checkpoint.is_some(),
                    duration_ms = result.duration.as_millis() as u64,
                    "sync cycle completed"
                );
                Ok(SyncOutcome::Completed(result))
            }
            Err(err) => {
                error!(error = %err, "sync cycle aborted");
                {
                    let mut stats = self.inner.stats.write();
                    stats.cycles_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                self.update_state(|state| {
                    state.status = EngineStatus::Error;
                    state.error = Some(err.to_string());
                    state.current_operation = None;
                    if let Ok(counts) = &counts {
                        Self::apply_counts(state, counts);
                    }
                });
                Err(err)
            }
        }
    }

    async fn run_cycle(&self, token: Option<&str>) -> SyncResult<SyncCycleResult> {
        let started = Instant::now();
        let progress = |operation: String| {
            self.update_state(|state| state.current_operation = Some(operation));
        };
        let store = self.inner.store.as_ref();

        let push = PushPipeline::new(store, &self.inner.transport, &self.inner.config)
            .run(token, &progress)
            .await?;

        let since = store.last_sync_time()?;
        let pull_started = now_millis();
        let pull = PullPipeline::new(store, &self.inner.transport)
            .run(since, token, &progress)
            .await?;

        let checkpoint = if pull.is_complete() {
            store.set_last_sync_time(pull_started)?;
            Some(pull_started)
        } else {
            debug!(failed = ?pull.failed_types, "checkpoint kept, some types failed to pull");
            None
        };

        Ok(SyncCycleResult {
            push,
            pull,
            checkpoint,
            duration: started.elapsed(),
        })
    }

    /// Runs a cycle on user request. Same guards as [`perform_sync`].
    ///
    /// [`perform_sync`]: Self::perform_sync
    pub async fn force_sync(&self) -> SyncResult<SyncOutcome> {
        info!("manual sync requested");
        self.perform_sync().await
    }

    /// Records a connectivity change.
    ///
    /// Going offline never cancels a running cycle. Coming back online
    /// with a token set runs one cycle and returns its outcome.
    pub async fn set_online_status(&self, online: bool) -> Option<SyncResult<SyncOutcome>> {
        let mut came_online = false;
        self.update_state(|state| {
            came_online = online && !state.is_online;
            state.is_online = online;
            if !online {
                state.status = EngineStatus::Offline;
            } else if state.status == EngineStatus::Offline {
                state.status = if self.inner.in_flight.load(Ordering::SeqCst) {
                    EngineStatus::Syncing
                } else {
                    EngineStatus::Idle
                };
            }
        });
        info!(online, "connectivity changed");

        if came_online && self.is_authenticated() {
            Some(self.perform_sync().await)
        } else {
            None
        }
    }

    /// Starts running a cycle every `interval`, replacing any running timer.
    ///
    /// Ticks while offline or unauthenticated do nothing. Must be called
    /// from within a Tokio runtime.
    pub fn start_auto_sync(&self, interval: Duration) {
        let (stop, mut stopped) = oneshot::channel();
        let engine: Weak<Inner<T>> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(inner) = engine.upgrade() else { break };
                        let coordinator = SyncCoordinator { inner };
                        if coordinator.is_online() && coordinator.is_authenticated() {
                            if let Err(err) = coordinator.perform_sync().await {
                                debug!(error = %err, "scheduled sync failed");
                            }
                        }
                    }
                }
            }
            debug!("auto sync stopped");
        });

        let previous = self.inner.auto_sync.lock().replace(AutoSync { stop, task });
        if let Some(previous) = previous {
            let _ = previous.stop.send(());
        }
        info!(interval_ms = interval.as_millis() as u64, "auto sync started");
    }

    /// Starts auto-sync at the configured `auto_sync_interval`.
    ///
    /// Returns false, starting nothing, when no interval is configured.
    pub fn start_configured_auto_sync(&self) -> bool {
        match self.inner.config.auto_sync_interval {
            Some(interval) => {
                self.start_auto_sync(interval);
                true
            }
            None => false,
        }
    }

    /// Stops the auto-sync timer. A cycle already running finishes.
    pub fn stop_auto_sync(&self) {
        if let Some(auto) = self.inner.auto_sync.lock().take() {
            let _ = auto.stop.send(());
            info!("auto sync stopping");
        }
    }

    /// Returns true while the auto-sync timer runs.
    pub fn is_auto_sync_running(&self) -> bool {
        self.inner
            .auto_sync
            .lock()
            .as_ref()
            .is_some_and(|auto| !auto.task.is_finished())
    }

    /// Re-reads queue counts into the state.
    pub fn refresh_queue_stats(&self) -> SyncResult<QueueStats> {
        let counts = self.inner.store.queue_stats()?;
        self.update_state(|state| Self::apply_counts(state, &counts));
        Ok(counts)
    }

    /// Puts every failed queue item back in line for the next cycle.
    pub fn retry_failed(&self) -> SyncResult<usize> {
        let requeued = self.inner.store.retry_failed()?;
        info!(requeued, "failed queue items requeued by hand");
        self.refresh_queue_stats()?;
        Ok(requeued)
    }
}
