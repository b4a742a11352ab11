//! # Isosync Engine
//!
//! Sync engine for local-first replicas of a remote record store.
//!
//! This crate provides:
//! - Sync engine (push local changes, then pull remote changes)
//! - Continuation token management with incremental/full selection
//! - Conflict resolution with a durable manual queue
//! - Failure classification and exponential backoff
//! - A cancellable background sync driver
//! - Local store and remote transport traits, with in-memory/mock implementations
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time per engine
//! - Sync progress is persisted only after a cycle's pull completes
//! - Remote changes are applied idempotently
//! - `sync_version` never decreases
//! - Manual strategy never writes a merge on its own

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod engine;
mod error;
mod live;
mod resolver;
mod retry;
mod store;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, SyncConfig};
pub use engine::{SyncCycleResult, SyncEngine, SyncPhase, SyncStats};
pub use error::{StoreError, StoreResult, SyncError, SyncResult, TransportError};
pub use live::SyncTrigger;
pub use resolver::{ConflictResolver, ResolutionOutcome};
pub use retry::{backoff_schedule, BackoffController, FailureClass};
pub use store::{LocalStore, MemoryStore, StoreSnapshot};
pub use transport::{DeleteOutcome, MockTransport, RemoteTransport, SaveOutcome};
