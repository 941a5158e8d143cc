//! # Tomado Sync Protocol
//!
//! Wire-level building blocks for Tomado's offline sync.
//!
//! This crate provides:
//! - [`EntityType`] and the per-entity field-mapping tables
//! - The Transform Layer ([`to_wire`] / [`from_wire`])
//! - Timestamp conversion between epoch milliseconds and ISO-8601
//! - [`RemoteRequest`] / [`RemoteResponse`] for the consumed REST surface
//! - [`QueueOperation`] for operation queue items
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod operation;
mod request;
mod timestamp;
mod transform;

pub use entity::{EntityType, FieldKind, FieldSpec, ParentRef};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::QueueOperation;
pub use request::{
    parse_collection, pull_request, push_request, server_updated_at, Method, RemoteRequest,
    RemoteResponse,
};
pub use timestamp::{iso_to_millis, millis_to_iso, now_millis};
pub use transform::{
    from_wire, is_sync_metadata, record_id, to_wire, Record, SYNC_METADATA_FIELDS,
};
