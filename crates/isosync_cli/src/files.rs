//! JSON files backing a replica and the shared remote.

use isosync_engine::{MemoryStore, StoreSnapshot, SyncConfig};
use isosync_protocol::{ConflictStrategy, SiteId};
use isosync_server::{ServerSnapshot, SyncServer};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or writing CLI files.
#[derive(Error, Debug)]
pub enum FileError {
    /// The replica file does not exist.
    #[error("no replica at {0}; run `isosync init` first")]
    MissingReplica(PathBuf),

    /// `init` would overwrite an existing replica.
    #[error("replica already exists at {0}")]
    ReplicaExists(PathBuf),

    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for its type.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk form of a replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaFile {
    /// This device's site ID.
    pub site: String,
    /// Sync configuration.
    #[serde(default)]
    pub config: SyncConfig,
    /// Conflict strategy used by `sync`.
    #[serde(default)]
    pub strategy: ConflictStrategy,
    /// Store contents.
    #[serde(default)]
    pub store: StoreSnapshot,
}

impl ReplicaFile {
    /// Creates an empty replica for `site`.
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            config: SyncConfig::default(),
            strategy: ConflictStrategy::default(),
            store: StoreSnapshot::default(),
        }
    }

    /// Loads a replica, failing if it does not exist.
    pub fn load(path: &Path) -> Result<Self, FileError> {
        if !path.exists() {
            return Err(FileError::MissingReplica(path.to_path_buf()));
        }
        read_json(path)
    }

    /// Writes the replica.
    pub fn save(&self, path: &Path) -> Result<(), FileError> {
        write_json(path, self)
    }

    /// Returns the site ID.
    pub fn site_id(&self) -> SiteId {
        SiteId::new(self.site.clone())
    }

    /// Opens the stored records as a live store.
    pub fn open_store(&self) -> MemoryStore {
        MemoryStore::from_snapshot(self.store.clone())
    }
}

/// Loads the remote, starting empty if the file does not exist yet.
pub fn load_remote(path: &Path) -> Result<SyncServer, FileError> {
    if !path.exists() {
        return Ok(SyncServer::default());
    }
    let snapshot: ServerSnapshot = read_json(path)?;
    Ok(SyncServer::from_snapshot(snapshot))
}

/// Writes the remote.
pub fn save_remote(path: &Path, server: &SyncServer) -> Result<(), FileError> {
    write_json(path, &server.snapshot())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FileError> {
    let bytes = std::fs::read(path).map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| FileError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes to a sibling temp file, then renames over the target.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FileError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| FileError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let temp_path = path.with_extension("tmp");
    let io_err = |source| FileError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&temp_path, json).map_err(io_err)?;
    std::fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}
