//! Sync commands: one-shot `sync` and periodic `watch`.

use super::{coordinator, format_millis, Remote};
use std::path::Path;
use std::time::Duration;
use tomado_sync_engine::{EngineStatus, SyncOutcome};
use tracing::warn;

/// Runs the sync command.
pub fn run(path: &Path, remote: &Remote) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let coordinator = coordinator(path, remote, remote.sync_config())?;

    match runtime.block_on(coordinator.force_sync())? {
        SyncOutcome::Skipped(reason) => println!("sync skipped: {reason}"),
        SyncOutcome::Completed(result) => {
            println!(
                "pushed {} ({} failed, {} parked, {} superseded), pulled {} record(s)",
                result.push.pushed,
                result.push.failed,
                result.push.parked,
                result.push.superseded,
                result.pull.records
            );
            if !result.pull.is_complete() {
                let failed: Vec<String> = result
                    .pull
                    .failed_types
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!("pull incomplete for: {}", failed.join(", "));
            }
            println!("last sync: {}", format_millis(coordinator.state().last_sync_time));
        }
    }
    Ok(())
}

/// Runs the watch command.
pub fn watch(
    path: &Path,
    remote: &Remote,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let config = remote
        .sync_config()
        .with_auto_sync_interval(Duration::from_secs(interval_secs.max(1)));
    let coordinator = coordinator(path, remote, config)?;
    if !coordinator.is_authenticated() {
        return Err("a token is required for watch (--token or TOMADO_TOKEN)".into());
    }

    runtime.block_on(async {
        let mut events = coordinator.subscribe();
        if let Err(err) = coordinator.force_sync().await {
            warn!(error = %err, "initial sync failed");
        }
        coordinator.start_configured_auto_sync();
        println!("watching, Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(state) if state.status != EngineStatus::Syncing => {
                        println!(
                            "[{}] pending {} failed {} last sync {}",
                            state.status,
                            state.pending_changes,
                            state.failed_changes,
                            format_millis(state.last_sync_time)
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "state updates dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        coordinator.stop_auto_sync();
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
