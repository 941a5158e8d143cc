//! # Tomado Testkit
//!
//! Test utilities for the sync engine.
//!
//! This crate provides:
//! - Store fixtures with automatic cleanup
//! - Property-based test generators using proptest
//! - An in-memory REST server that speaks the sync wire format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tomado_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn syncs_against_fake_server() {
//!     let server = FakeServer::new();
//!     let store = TestStore::memory();
//!     // ... build a coordinator over `store` and `server.clone()`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
