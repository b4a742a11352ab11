//! # Isosync Server
//!
//! Reference in-memory remote for isosync replicas.
//!
//! This crate provides:
//! - A record zone with optimistic `sync_version` checks
//! - A change log compacted per record, paged with opaque continuation tokens
//! - Quota and batch limits
//! - Failure injection for tests
//! - Serde snapshots for file-backed use
//!
//! # Protocol
//!
//! 1. Client creates the zone and subscribes (both idempotent)
//! 2. Client saves and deletes records; stale saves are rejected with the
//!    stored copy
//! 3. Client fetches changes after its last token, following `has_more`

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod server;
mod zone;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{ServerSnapshot, SyncServer};
pub use zone::{Zone, ZonePage};
