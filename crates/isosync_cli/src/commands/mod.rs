//! CLI command implementations.

pub mod backoff;
pub mod conflicts;
pub mod init;
pub mod records;
pub mod status;
pub mod sync;
