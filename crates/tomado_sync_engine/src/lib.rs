//! # Tomado Sync Engine
//!
//! Offline-first synchronization between the local store and the REST
//! service.
//!
//! This crate provides:
//! - Push pipeline draining the operation queue in FIFO order
//! - Pull pipeline fetching changes per entity type, parents first
//! - Sync coordinator with an observable state machine
//! - Auto-sync timer and connectivity handling
//! - Retry of failed queue items with exponential backoff
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle:
//! 1. Push queued local mutations, one request per item
//! 2. Pull changes since the last checkpoint for every entity type
//! 3. Advance the checkpoint if every entity type was pulled
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - A failed item never blocks the rest of the batch
//! - A failed entity type never blocks the other types
//! - The checkpoint never moves past data that was not pulled

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod http;
mod pull;
mod push;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncResult};
pub use http::HttpTransport;
pub use pull::PullOutcome;
pub use push::PushOutcome;
pub use state::{EngineStatus, SkipReason, SyncCycleResult, SyncOutcome, SyncState, SyncStats};
pub use transport::{MockReply, MockTransport, RecordedRequest, SyncTransport};
