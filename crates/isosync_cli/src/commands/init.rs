//! Init command implementation.

use crate::files::{FileError, ReplicaFile};
use isosync_engine::SyncConfig;
use std::path::Path;

/// Configuration preset for a new replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Five-minute interval, batches of 100.
    Default,
    /// One-minute interval, batches of 200.
    Aggressive,
    /// Thirty-minute interval, batches of 50.
    Conservative,
}

impl Preset {
    fn config(self) -> SyncConfig {
        match self {
            Preset::Default => SyncConfig::default(),
            Preset::Aggressive => SyncConfig::aggressive(),
            Preset::Conservative => SyncConfig::conservative(),
        }
    }
}

/// Runs the init command.
pub fn run(path: &Path, site: &str, preset: Preset) -> Result<(), Box<dyn std::error::Error>> {
    create(path, site, preset)?;
    println!("Initialized replica '{}' at {}", site, path.display());
    Ok(())
}

/// Creates an empty replica file.
pub fn create(path: &Path, site: &str, preset: Preset) -> Result<ReplicaFile, FileError> {
    if path.exists() {
        return Err(FileError::ReplicaExists(path.to_path_buf()));
    }
    let mut replica = ReplicaFile::new(site);
    replica.config = preset.config();
    replica.save(path)?;
    Ok(replica)
}
