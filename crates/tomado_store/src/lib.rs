//! # Tomado Store
//!
//! The local half of Tomado's offline sync: an embedded SQLite database
//! holding the application entities, their sync metadata, and the durable
//! operation queue.
//!
//! ## Key Invariants
//!
//! - A local write and its queue item commit in the same transaction
//! - Server-origin writes never enqueue (no echo loop)
//! - Queue ids are strictly increasing and define push order
//! - Queue status moves `pending → processing → completed | failed`;
//!   only the retry policy moves `failed → pending`
//! - The store never hard-deletes entity rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use tomado_store::LocalStore;
//! use tomado_sync_protocol::EntityType;
//!
//! let store = LocalStore::open_in_memory()?;
//! store.upsert_local(EntityType::Workspace, record)?;
//! let pending = store.get_pending_queue_items(50)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod queue;
mod schema;
mod store;

pub use entity::{ApplyStats, EntityRow, LocalWrite, SyncMetadata, SyncStatus};
pub use error::{StoreError, StoreResult};
pub use queue::{QueueItem, QueueStats, QueueStatus};
pub use schema::SCHEMA_VERSION;
pub use store::LocalStore;
