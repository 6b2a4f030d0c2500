use crate::agent::RetryPolicy;
use serde::{Deserialize, Serialize};
use snapmesh_gossip::GossipConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the persisted gossip peers.
pub const DEFAULT_GOSSIP_SNAPSHOT: &str = "/var/lib/snapmesh/gossip.snapshot";

/// Agent configuration, read from a TOML or JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the HTTP API listens on.
    pub http_bind_addr: SocketAddr,
    /// Base URL of the local Jolokia agent.
    pub jolokia_url: String,
    pub jolokia_timeout_secs: u64,
    /// Backups fire on multiples of this many seconds.
    pub schedule_quantum_secs: u64,
    pub startup_retry_attempts: u32,
    pub startup_retry_backoff_ms: u64,
    pub shutdown_grace_secs: u64,
    /// Zero disables the periodic mesh/storage consistency check.
    pub consistency_check_interval_secs: u64,
    /// Bearer token required by mutating endpoints. Unset leaves them open.
    pub admin_token: Option<String>,
    pub gossip: GossipConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jolokia_url: String::from("http://127.0.0.1:8778/jolokia"),
            jolokia_timeout_secs: 10,
            schedule_quantum_secs: 15,
            startup_retry_attempts: 60,
            startup_retry_backoff_ms: 1000,
            shutdown_grace_secs: 5,
            consistency_check_interval_secs: 60,
            admin_token: None,
            gossip: GossipConfig {
                snapshot_path: Some(PathBuf::from(DEFAULT_GOSSIP_SNAPSHOT)),
                ..GossipConfig::default()
            },
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: AgentConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the agent cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule_quantum_secs == 0 {
            anyhow::bail!("schedule_quantum_secs must be positive");
        }
        if self.jolokia_url.trim().is_empty() {
            anyhow::bail!("jolokia_url must not be empty");
        }
        Ok(())
    }

    pub fn jolokia_timeout(&self) -> Duration {
        Duration::from_secs(self.jolokia_timeout_secs)
    }

    pub fn schedule_quantum(&self) -> Duration {
        Duration::from_secs(self.schedule_quantum_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// `None` when the periodic check is disabled.
    pub fn consistency_check_interval(&self) -> Option<Duration> {
        (self.consistency_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.consistency_check_interval_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.startup_retry_attempts,
            backoff: Duration::from_millis(self.startup_retry_backoff_ms),
        }
    }
}
