//! Gossip mesh tunables.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default UDP port of the mesh.
pub const DEFAULT_GOSSIP_PORT: u16 = 7946;

/// Configuration for a [`crate::Gossiper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Unique member name. Falls back to `$HOSTNAME`, then a random name.
    pub node_name: Option<String>,
    /// UDP address the mesh listens on (default: 0.0.0.0:7946).
    pub bind_addr: SocketAddr,
    /// Address announced to peers. When unset and `bind_addr` is unspecified,
    /// the address observed by the first seed that answers is used.
    pub advertise_addr: Option<SocketAddr>,
    /// File where known peers are persisted between restarts.
    pub snapshot_path: Option<PathBuf>,
    /// Interval between failure detection probes (default: 1000ms).
    pub probe_interval_ms: u64,
    /// Time to wait for a probe ack (default: 500ms).
    pub probe_timeout_ms: u64,
    /// Peers asked to probe a member that missed a direct probe (default: 3).
    pub indirect_probes: usize,
    /// How long a suspected member may refute before it is declared failed
    /// (default: 5000ms).
    pub suspicion_timeout_ms: u64,
    /// Time to wait for a seed to answer a join (default: 2000ms).
    pub join_timeout_ms: u64,
    /// Failed or departed members are forgotten after this long (default: 30s).
    pub reap_after_secs: u64,
    /// Peers each new event is forwarded to (default: 3).
    pub gossip_fanout: usize,
    /// Member rumors piggy-backed on each ping (default: 8).
    pub max_rumors: usize,
    /// Largest encoded user event payload (default: 512 bytes).
    pub max_event_size: usize,
    /// Capacity of the internal event channel (default: 256).
    pub event_channel_capacity: usize,
    /// Largest UDP datagram accepted (default: 65000 bytes).
    pub max_packet_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            node_name: None,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_GOSSIP_PORT),
            advertise_addr: None,
            snapshot_path: None,
            probe_interval_ms: 1000,
            probe_timeout_ms: 500,
            indirect_probes: 3,
            suspicion_timeout_ms: 5000,
            join_timeout_ms: 2000,
            reap_after_secs: 30,
            gossip_fanout: 3,
            max_rumors: 8,
            max_event_size: 512,
            event_channel_capacity: 256,
            max_packet_size: 65_000,
        }
    }
}

impl GossipConfig {
    /// Config bound to an ephemeral loopback port, for tests and local runs.
    pub fn local(node_name: impl Into<String>) -> Self {
        Self {
            node_name: Some(node_name.into()),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            probe_interval_ms: 200,
            probe_timeout_ms: 100,
            suspicion_timeout_ms: 1000,
            join_timeout_ms: 1000,
            ..Self::default()
        }
    }

    /// Resolved member name.
    pub fn resolved_node_name(&self) -> String {
        if let Some(name) = self.node_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        match std::env::var("HOSTNAME") {
            Ok(host) if !host.is_empty() => host,
            _ => format!("snapmesh-{}", uuid::Uuid::new_v4()),
        }
    }

    pub(crate) fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub(crate) fn suspicion_timeout(&self) -> Duration {
        Duration::from_millis(self.suspicion_timeout_ms)
    }

    pub(crate) fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub(crate) fn reap_after(&self) -> Duration {
        Duration::from_secs(self.reap_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GossipConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_GOSSIP_PORT);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.max_event_size, 512);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.indirect_probes, 3);
        assert_eq!(config.suspicion_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_explicit_node_name_wins() {
        let config = GossipConfig::local("node-a");
        assert_eq!(config.resolved_node_name(), "node-a");
    }

    #[test]
    fn test_empty_node_name_is_replaced() {
        let config = GossipConfig {
            node_name: Some(String::new()),
            ..GossipConfig::default()
        };
        assert!(!config.resolved_node_name().is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GossipConfig =
            serde_json::from_str(r#"{"bind_addr": "10.1.2.3:8000", "gossip_fanout": 5}"#).unwrap();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.gossip_fanout, 5);
        assert_eq!(config.probe_interval_ms, 1000);
    }
}
