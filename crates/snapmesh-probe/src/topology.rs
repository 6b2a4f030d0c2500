//! Cluster topology readings and the stability gate for coordinated snapshots.

use crate::error::{Result, StabilityError};
use crate::storage_service::ClusterProbe;
use serde::Serialize;
use tracing::debug;

/// Point-in-time view of the storage ring as seen by the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterTopology {
    /// Live node addresses.
    pub live: Vec<String>,
    /// Unreachable node addresses.
    pub unreachable: Vec<String>,
    /// Bootstrapping node addresses.
    pub joining: Vec<String>,
    /// Decommissioning node addresses.
    pub leaving: Vec<String>,
    /// Node addresses changing token ownership.
    pub moving: Vec<String>,
    /// All keyspaces.
    pub keyspaces: Vec<String>,
}

impl ClusterTopology {
    /// True when no node is unreachable, joining, leaving or moving.
    pub fn is_stable(&self) -> bool {
        self.unreachable.is_empty()
            && self.joining.is_empty()
            && self.leaving.is_empty()
            && self.moving.is_empty()
    }

    /// Whether `address` is a live storage node.
    pub fn is_live(&self, address: &str) -> bool {
        self.live.iter().any(|node| node == address)
    }
}

/// Reads every topology attribute. Nothing is cached.
pub async fn topology(probe: &dyn ClusterProbe) -> Result<ClusterTopology> {
    Ok(ClusterTopology {
        live: probe.live_nodes().await?,
        unreachable: probe.unreachable_nodes().await?,
        joining: probe.joining_nodes().await?,
        leaving: probe.leaving_nodes().await?,
        moving: probe.moving_nodes().await?,
        keyspaces: probe.keyspaces().await?,
    })
}

/// Fails when the ring is changing shape.
///
/// Conditions are checked in a fixed order (unreachable, joining, leaving,
/// moving) and the first one that holds is reported with its nodes. Later
/// attributes are not read once an earlier check fails.
pub async fn check_cluster_stability(
    probe: &dyn ClusterProbe,
) -> std::result::Result<(), StabilityError> {
    let unreachable = probe.unreachable_nodes().await?;
    if !unreachable.is_empty() {
        return Err(StabilityError::Unreachable(unreachable));
    }
    let joining = probe.joining_nodes().await?;
    if !joining.is_empty() {
        return Err(StabilityError::Joining(joining));
    }
    let leaving = probe.leaving_nodes().await?;
    if !leaving.is_empty() {
        return Err(StabilityError::Leaving(leaving));
    }
    let moving = probe.moving_nodes().await?;
    if !moving.is_empty() {
        return Err(StabilityError::Moving(moving));
    }
    debug!("storage cluster is stable");
    Ok(())
}
