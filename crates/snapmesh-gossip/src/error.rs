use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the gossip mesh.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("cannot bind gossip socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid seed {seed:?}: {reason}")]
    InvalidSeed { seed: String, reason: String },

    #[error("failed to join any of {attempted} seeds: {last_error}")]
    JoinFailed { attempted: usize, last_error: String },

    #[error("join of {addr} timed out after {timeout_ms}ms")]
    JoinTimeout { addr: SocketAddr, timeout_ms: u64 },

    #[error("user event payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("gossip message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("event loop already running")]
    EventLoopAlreadyRunning,

    #[error("mesh has left the cluster")]
    Left,

    #[error("gossip snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for mesh operations.
pub type Result<T> = std::result::Result<T, GossipError>;
