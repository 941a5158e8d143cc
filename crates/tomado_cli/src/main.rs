//! Tomado CLI
//!
//! Command-line client for the offline-first sync engine.
//!
//! # Commands
//!
//! - `put` - Create or update an entity locally
//! - `delete` - Soft-delete an entity locally
//! - `show` - Print local entities
//! - `sync` - Run one sync cycle
//! - `watch` - Sync periodically until interrupted
//! - `status` - Show checkpoint and queue counts
//! - `queue` - List operation queue items
//! - `retry` - Requeue failed items
//! - `gc` - Purge old completed queue items

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tomado_sync_protocol::EntityType;
use tracing_subscriber::EnvFilter;

/// Offline-first task and pomodoro sync client.
#[derive(Parser)]
#[command(name = "tomado")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local database
    #[arg(global = true, long, env = "TOMADO_DB", default_value = "tomado.db")]
    db: PathBuf,

    /// Base URL of the REST service
    #[arg(
        global = true,
        long,
        env = "TOMADO_BASE_URL",
        default_value = "http://localhost:3000/api"
    )]
    base_url: String,

    /// Bearer token for the REST service
    #[arg(global = true, long, env = "TOMADO_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update an entity from a JSON object
    Put {
        /// Entity type (workspace, project, tag, task, comment, session)
        entity: EntityType,

        /// JSON object with local field names; must include "id"
        json: String,
    },

    /// Soft-delete an entity
    Delete {
        /// Entity type
        entity: EntityType,

        /// Entity id
        id: String,
    },

    /// Print local entities
    Show {
        /// Entity type
        entity: EntityType,

        /// Only this entity
        id: Option<String>,

        /// Include soft-deleted entities
        #[arg(short, long)]
        all: bool,
    },

    /// Run one sync cycle
    Sync,

    /// Sync periodically until Ctrl-C
    Watch {
        /// Seconds between cycles
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },

    /// Show sync status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List operation queue items
    Queue {
        /// Only items with this status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of items
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Requeue every failed item
    Retry,

    /// Purge completed queue items
    Gc {
        /// Keep items completed within this many days
        #[arg(long, default_value = "7")]
        older_than_days: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let remote = commands::Remote {
        base_url: cli.base_url,
        token: cli.token,
    };

    match cli.command {
        Commands::Put { entity, json } => commands::edit::put(&cli.db, entity, &json)?,
        Commands::Delete { entity, id } => commands::edit::delete(&cli.db, entity, &id)?,
        Commands::Show { entity, id, all } => {
            commands::show::run(&cli.db, entity, id.as_deref(), all)?
        }
        Commands::Sync => commands::sync::run(&cli.db, &remote)?,
        Commands::Watch { interval } => commands::sync::watch(&cli.db, &remote, interval)?,
        Commands::Status { format } => commands::status::run(&cli.db, &format)?,
        Commands::Queue { status, limit } => {
            commands::queue::list(&cli.db, status.as_deref(), limit)?
        }
        Commands::Retry => commands::queue::retry(&cli.db)?,
        Commands::Gc { older_than_days } => commands::queue::gc(&cli.db, older_than_days)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_entity_names() {
        let cli = Cli::try_parse_from([
            "tomado",
            "--db",
            "x.db",
            "put",
            "session",
            r#"{"id":"s"}"#,
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Put {
                entity: EntityType::PomodoroSession,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["tomado", "show", "sprint"]).is_err());
    }
}
