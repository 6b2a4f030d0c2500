#![warn(missing_docs)]

//! snapmesh probe subsystem: Jolokia management client, Cassandra StorageService probe, cluster stability checks

pub mod error;
pub mod jolokia;
pub mod memory;
pub mod storage_service;
pub mod topology;

pub use error::{ManagementError, ProbeError, StabilityError};
pub use jolokia::JolokiaClient;
pub use memory::InMemoryProbe;
pub use storage_service::{ClusterProbe, StorageServiceProbe, TableSnapshot};
pub use topology::{check_cluster_stability, topology, ClusterTopology};
