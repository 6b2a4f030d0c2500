use crate::api::BackupAccepted;
use crate::config::AgentConfig;
use crate::orchestrator::ALL_TABLES;
use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response, Url};
use snapmesh_probe::{ClusterProbe, JolokiaClient, StorageServiceProbe};
use std::path::{Path, PathBuf};

/// Default location of the agent configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapmesh/snapmesh.toml";

#[derive(Parser)]
#[command(name = "snapmesh")]
#[command(about = "Cluster-wide Cassandra snapshot agent", long_about = None)]
pub struct Cli {
    /// Base URL of the agent the client subcommands talk to.
    #[arg(short, long, env = "SNAPMESH_SERVER", default_value = "http://localhost:8080")]
    pub server: String,

    #[arg(short, long, env = "SNAPMESH_ADMIN_TOKEN")]
    pub token: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the agent next to a Cassandra node.
    Serve {
        #[arg(short, long, env = "SNAPMESH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Print the agent version.
    Version {
        /// Also query the local Jolokia agent and Cassandra.
        #[arg(long)]
        complete: bool,
        #[arg(short, long, env = "SNAPMESH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Print the agent's status dump.
    Status,
    /// Snapshot matching keyspaces on every node.
    Backup {
        keyspace_glob: String,
        #[arg(default_value = ALL_TABLES)]
        table: String,
    },
    /// Drop every snapshot on every node.
    ClearSnapshots,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { .. } => anyhow::bail!("serve is handled by the binary entry point"),
            Command::Version {
                complete,
                ref config,
            } => version(complete, config).await,
            Command::Status => self.status().await,
            Command::Backup {
                ref keyspace_glob,
                ref table,
            } => self.backup(keyspace_glob, table).await,
            Command::ClearSnapshots => self.clear_snapshots().await,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.server)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server URL cannot be a base: {}", self.server))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn status(&self) -> Result<()> {
        let client = Client::new();
        let request = self.authorized(client.get(self.endpoint(&["status"])?));
        let response = checked(request.send().await?).await?;
        print!("{}", response.text().await?);
        Ok(())
    }

    async fn backup(&self, keyspace_glob: &str, table: &str) -> Result<()> {
        let client = Client::new();
        let url = if table == ALL_TABLES {
            self.endpoint(&["backup-keyspaces", keyspace_glob])?
        } else {
            self.endpoint(&["backup-tables", keyspace_glob, table])?
        };
        let response = checked(self.authorized(client.get(url)).send().await?).await?;
        let accepted: BackupAccepted = response.json().await?;

        println!(
            "Backup of {} (table {}) scheduled at {}",
            accepted.keyspace_glob, accepted.table, accepted.execute_at
        );
        Ok(())
    }

    async fn clear_snapshots(&self) -> Result<()> {
        let client = Client::new();
        let request = self.authorized(client.delete(self.endpoint(&["snapshots"])?));
        checked(request.send().await?).await?;
        println!("Snapshot removal requested on every node");
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("Request failed: {} {}", status, body.trim())
}

async fn version(complete: bool, config_path: &Path) -> Result<()> {
    println!("snapmesh {}", env!("CARGO_PKG_VERSION"));
    if !complete {
        return Ok(());
    }

    let config = if config_path.exists() {
        AgentConfig::from_file(config_path)?
    } else {
        AgentConfig::default()
    };
    let probe = StorageServiceProbe::new(JolokiaClient::new(
        config.jolokia_url.clone(),
        config.jolokia_timeout(),
    )?);
    match probe.agent_version().await {
        Ok(v) => println!("Jolokia {v}"),
        Err(e) => println!("Jolokia: error: {e}"),
    }
    match probe.release_version().await {
        Ok(v) => println!("Cassandra {v}"),
        Err(e) => println!("Cassandra: error: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_status_subcommand() {
        let cli = Cli::parse_from(["snapmesh", "status"]);
        assert!(matches!(cli.command, Command::Status));
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_backup_defaults_to_all_tables() {
        let cli = Cli::parse_from(["snapmesh", "backup", "app_*"]);
        match &cli.command {
            Command::Backup {
                keyspace_glob,
                table,
            } => {
                assert_eq!(keyspace_glob, "app_*");
                assert_eq!(table, "*");
            }
            _ => panic!("Expected Backup command"),
        }
    }

    #[test]
    fn test_cli_backup_with_table() {
        let cli = Cli::parse_from(["snapmesh", "backup", "logs", "events"]);
        match &cli.command {
            Command::Backup { table, .. } => assert_eq!(table, "events"),
            _ => panic!("Expected Backup command"),
        }
    }

    #[test]
    fn test_cli_serve_config() {
        let cli = Cli::parse_from(["snapmesh", "serve", "--config", "/tmp/a.toml", "--debug"]);
        match &cli.command {
            Command::Serve { config } => assert_eq!(config, &PathBuf::from("/tmp/a.toml")),
            _ => panic!("Expected Serve command"),
        }
        assert!(cli.debug);
    }

    #[test]
    fn test_cli_version_complete() {
        let cli = Cli::parse_from(["snapmesh", "--log-json", "version", "--complete"]);
        assert!(matches!(cli.command, Command::Version { complete: true, .. }));
        assert!(cli.log_json);
    }

    #[test]
    fn test_cli_with_server_flag() {
        let cli = Cli::parse_from(["snapmesh", "--server", "http://custom:9000", "clear-snapshots"]);
        assert_eq!(cli.server, "http://custom:9000");
        assert!(matches!(cli.command, Command::ClearSnapshots));
    }

    #[test]
    fn test_endpoint_escapes_glob() {
        let cli = Cli::parse_from(["snapmesh", "--server", "http://db1:8080/", "status"]);
        let url = cli.endpoint(&["backup-keyspaces", "app?"]).unwrap();
        assert_eq!(url.as_str(), "http://db1:8080/backup-keyspaces/app%3F");
        let url = cli.endpoint(&["backup-tables", "app_*", "users"]).unwrap();
        assert_eq!(url.as_str(), "http://db1:8080/backup-tables/app_*/users");
    }
}
