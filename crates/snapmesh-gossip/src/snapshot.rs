//! Known peers persisted across restarts so a restarted member can rejoin
//! even when its seeds have changed.

use crate::error::{GossipError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content of the snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Name of the member that wrote the file.
    pub node_name: String,
    /// Gossip addresses of the peers alive at save time.
    pub peers: Vec<SocketAddr>,
    /// Seconds since the epoch at save time.
    pub saved_at_unix: u64,
}

impl PeerSnapshot {
    /// Snapshot stamped with the current time.
    pub fn now(node_name: impl Into<String>, mut peers: Vec<SocketAddr>) -> Self {
        peers.sort();
        peers.dedup();
        let saved_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            node_name: node_name.into(),
            peers,
            saved_at_unix,
        }
    }
}

/// JSON file holding a [`PeerSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Uses `path`, creating its parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| GossipError::Snapshot {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. A missing file is not an error.
    pub fn load(&self) -> Result<Option<PeerSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(GossipError::Snapshot {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| GossipError::Serialization(format!("{}: {}", self.path.display(), e)))
    }

    /// Replaces the snapshot atomically.
    pub fn store(&self, snapshot: &PeerSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| GossipError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let to_err = |source: std::io::Error| GossipError::Snapshot {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&tmp, json).map_err(to_err)?;
        std::fs::rename(&tmp, &self.path).map_err(to_err)?;
        Ok(())
    }
}
