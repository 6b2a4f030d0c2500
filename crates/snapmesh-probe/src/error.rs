//! Error types for the probe subsystem.

use thiserror::Error;

/// Errors returned by the Jolokia management client.
#[derive(Debug, Error)]
pub enum ManagementError {
    /// The HTTP request could not be completed (connection refused, timeout, ...).
    #[error("transport error talking to {url}: {source}")]
    Transport {
        /// URL of the failed request.
        url: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The management endpoint answered with a non-2xx HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// URL of the failed request.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body was not a valid Jolokia envelope.
    #[error("malformed response from {url}: {source}")]
    Decode {
        /// URL of the failed request.
        url: String,
        /// JSON decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The envelope carried a non-empty `error` field.
    #[error("{message}")]
    Remote {
        /// Error text reported by the agent.
        message: String,
        /// Java exception class reported by the agent, if any.
        error_type: Option<String>,
        /// Status code carried inside the envelope.
        status: i64,
    },

    /// The request could not be serialized.
    #[error("cannot encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The HTTP client could not be constructed.
    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors returned by cluster probe accessors.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The management client failed.
    #[error(transparent)]
    Management(#[from] ManagementError),

    /// An attribute value had an unexpected shape.
    #[error("unexpected value for {attribute}: {msg}")]
    UnexpectedValue {
        /// Attribute path that was read.
        attribute: String,
        /// Description of the mismatch.
        msg: String,
    },

    /// A simulated or injected failure (used by in-memory probes).
    #[error("{0}")]
    Other(String),
}

/// Reasons the storage cluster is not stable enough for a coordinated snapshot.
#[derive(Debug, Error)]
pub enum StabilityError {
    /// At least one node is unreachable from the local node's failure detector.
    #[error("unreachable Cassandra nodes: {}", .0.join(", "))]
    Unreachable(Vec<String>),

    /// At least one node is bootstrapping into the ring.
    #[error("joining Cassandra nodes: {}", .0.join(", "))]
    Joining(Vec<String>),

    /// At least one node is leaving the ring.
    #[error("leaving Cassandra nodes: {}", .0.join(", "))]
    Leaving(Vec<String>),

    /// At least one node is moving in the ring.
    #[error("moving Cassandra nodes: {}", .0.join(", "))]
    Moving(Vec<String>),

    /// The stability readings could not be fetched.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Result alias for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
