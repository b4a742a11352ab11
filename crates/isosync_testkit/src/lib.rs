//! # Isosync Testkit
//!
//! Test utilities for isosync.
//!
//! This crate provides:
//! - Record fixtures and a builder for synced/dirty/deleted states
//! - Ready-made divergent record pairs for conflict tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use isosync_testkit::prelude::*;
//!
//! let record = RecordBuilder::new("alpha").synced(1).build();
//! assert!(!record.has_local_changes());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
