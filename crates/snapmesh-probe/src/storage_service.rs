//! Cassandra `StorageService` MBean accessors.
//!
//! [`ClusterProbe`] is the seam the rest of the agent depends on;
//! [`StorageServiceProbe`] implements it through Jolokia. Every accessor is a
//! pass-through: it re-queries the node and never caches.

use crate::error::{ProbeError, Result};
use crate::jolokia::JolokiaClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Object name of the Cassandra storage service MBean.
pub const STORAGE_SERVICE_MBEAN: &str = "org.apache.cassandra.db:type=StorageService";

/// One row of the `SnapshotDetails` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Snapshot tag.
    pub snapshot: String,
    /// Keyspace name.
    pub keyspace: String,
    /// Table (column family) name.
    pub table: String,
    /// Human readable size on disk.
    pub size_on_disk: String,
    /// Human readable size not shared with live sstables.
    pub true_size: String,
}

/// Read and execute access to the storage node's operational surface.
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Nodes considered live by the queried node's failure detector.
    async fn live_nodes(&self) -> Result<Vec<String>>;
    /// Nodes considered unreachable by the queried node's failure detector.
    async fn unreachable_nodes(&self) -> Result<Vec<String>>;
    /// Nodes bootstrapping into the ring.
    async fn joining_nodes(&self) -> Result<Vec<String>>;
    /// Nodes leaving the ring.
    async fn leaving_nodes(&self) -> Result<Vec<String>>;
    /// Nodes moving in the ring.
    async fn moving_nodes(&self) -> Result<Vec<String>>;
    /// All keyspaces, including system ones.
    async fn keyspaces(&self) -> Result<Vec<String>>;
    /// Keyspaces that are not owned by Cassandra itself.
    async fn non_system_keyspaces(&self) -> Result<Vec<String>>;

    /// Snapshots whole keyspaces under `tag`.
    async fn take_snapshot(&self, tag: &str, keyspaces: &[String]) -> Result<()>;
    /// Snapshots a single table under `tag`.
    async fn take_table_snapshot(&self, tag: &str, keyspace: &str, table: &str) -> Result<()>;
    /// Removes snapshots named `tag`, or every snapshot when `tag` is empty.
    async fn clear_snapshot(&self, tag: &str) -> Result<()>;
    /// Existing snapshots on the local node.
    async fn snapshot_details(&self) -> Result<Vec<TableSnapshot>>;

    /// Version of the management agent.
    async fn agent_version(&self) -> Result<String>;
    /// Cassandra release version.
    async fn release_version(&self) -> Result<String>;
    /// Current schema version.
    async fn schema_version(&self) -> Result<String>;
    /// Cluster name.
    async fn cluster_name(&self) -> Result<String>;
    /// Host id of the local node.
    async fn local_host_id(&self) -> Result<String>;
    /// Partitioner class name.
    async fn partitioner_name(&self) -> Result<String>;
    /// STARTING, NORMAL, JOINING, LEAVING, DECOMMISSIONED, MOVING, DRAINING or DRAINED.
    async fn operation_mode(&self) -> Result<String>;
    /// Configured data file directories.
    async fn all_data_file_locations(&self) -> Result<Vec<String>>;
    /// Commit log directory.
    async fn commit_log_location(&self) -> Result<String>;
    /// Saved caches directory.
    async fn saved_caches_location(&self) -> Result<String>;
    /// Whether incremental backups are enabled.
    async fn incremental_backups_enabled(&self) -> Result<bool>;
}

/// [`ClusterProbe`] backed by the Jolokia agent of the local Cassandra node.
#[derive(Debug, Clone)]
pub struct StorageServiceProbe {
    client: JolokiaClient,
}

impl StorageServiceProbe {
    /// Wraps a Jolokia client.
    pub fn new(client: JolokiaClient) -> Self {
        Self { client }
    }

    /// Underlying management client.
    pub fn client(&self) -> &JolokiaClient {
        &self.client
    }

    fn attribute(name: &str) -> String {
        format!("{}/{}", STORAGE_SERVICE_MBEAN, name)
    }

    async fn read_list(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.client.read_string_list(&Self::attribute(name)).await?)
    }

    async fn read_string(&self, name: &str) -> Result<String> {
        Ok(self.client.read_string(&Self::attribute(name)).await?)
    }

    async fn exec(&self, operation: &str, arguments: Vec<Value>) -> Result<()> {
        let value = self
            .client
            .exec(STORAGE_SERVICE_MBEAN, operation, arguments)
            .await?;
        debug!(operation, ?value, "storage service operation done");
        Ok(())
    }
}

#[async_trait]
impl ClusterProbe for StorageServiceProbe {
    async fn live_nodes(&self) -> Result<Vec<String>> {
        self.read_list("LiveNodes").await
    }

    async fn unreachable_nodes(&self) -> Result<Vec<String>> {
        self.read_list("UnreachableNodes").await
    }

    async fn joining_nodes(&self) -> Result<Vec<String>> {
        self.read_list("JoiningNodes").await
    }

    async fn leaving_nodes(&self) -> Result<Vec<String>> {
        self.read_list("LeavingNodes").await
    }

    async fn moving_nodes(&self) -> Result<Vec<String>> {
        self.read_list("MovingNodes").await
    }

    async fn keyspaces(&self) -> Result<Vec<String>> {
        self.read_list("Keyspaces").await
    }

    async fn non_system_keyspaces(&self) -> Result<Vec<String>> {
        self.read_list("NonSystemKeyspaces").await
    }

    async fn take_snapshot(&self, tag: &str, keyspaces: &[String]) -> Result<()> {
        self.exec("takeSnapshot", vec![json!(tag), json!(keyspaces)])
            .await
    }

    async fn take_table_snapshot(&self, tag: &str, keyspace: &str, table: &str) -> Result<()> {
        self.exec(
            "takeTableSnapshot",
            vec![json!(keyspace), json!(table), json!(tag)],
        )
        .await
    }

    async fn clear_snapshot(&self, tag: &str) -> Result<()> {
        let no_keyspaces: [&str; 0] = [];
        self.exec("clearSnapshot", vec![json!(tag), json!(no_keyspaces)])
            .await
    }

    async fn snapshot_details(&self) -> Result<Vec<TableSnapshot>> {
        let attribute = Self::attribute("SnapshotDetails");
        let value = self
            .client
            .read::<Value>(&attribute)
            .await?
            .unwrap_or(Value::Null);
        parse_snapshot_details(&value).map_err(|msg| ProbeError::UnexpectedValue { attribute, msg })
    }

    async fn agent_version(&self) -> Result<String> {
        Ok(self.client.version().await?.agent)
    }

    async fn release_version(&self) -> Result<String> {
        self.read_string("ReleaseVersion").await
    }

    async fn schema_version(&self) -> Result<String> {
        self.read_string("SchemaVersion").await
    }

    async fn cluster_name(&self) -> Result<String> {
        self.read_string("ClusterName").await
    }

    async fn local_host_id(&self) -> Result<String> {
        self.read_string("LocalHostId").await
    }

    async fn partitioner_name(&self) -> Result<String> {
        self.read_string("PartitionerName").await
    }

    async fn operation_mode(&self) -> Result<String> {
        self.read_string("OperationMode").await
    }

    async fn all_data_file_locations(&self) -> Result<Vec<String>> {
        self.read_list("AllDataFileLocations").await
    }

    async fn commit_log_location(&self) -> Result<String> {
        self.read_string("CommitLogLocation").await
    }

    async fn saved_caches_location(&self) -> Result<String> {
        self.read_string("SavedCachesLocation").await
    }

    async fn incremental_backups_enabled(&self) -> Result<bool> {
        Ok(self
            .client
            .read_bool(&Self::attribute("IncrementalBackupsEnabled"))
            .await?)
    }
}

/// Flattens the nested tabular `SnapshotDetails` value into rows.
///
/// Jolokia renders JMX tabular data as maps nested once per index column, so the
/// depth depends on the Cassandra version. Rows are recognised by their
/// `Snapshot name` key wherever they appear.
pub fn parse_snapshot_details(value: &Value) -> std::result::Result<Vec<TableSnapshot>, String> {
    let mut rows = Vec::new();
    collect_rows(value, &mut rows)?;
    rows.sort_by(|a, b| {
        (&a.snapshot, &a.keyspace, &a.table).cmp(&(&b.snapshot, &b.keyspace, &b.table))
    });
    Ok(rows)
}

fn collect_rows(value: &Value, rows: &mut Vec<TableSnapshot>) -> std::result::Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::Object(map) if map.contains_key("Snapshot name") => {
            let field = |key: &str| -> std::result::Result<String, String> {
                match map.get(key) {
                    Some(Value::String(s)) => Ok(s.clone()),
                    Some(Value::Null) | None => Ok(String::new()),
                    Some(other) => Err(format!("field {key:?} is not a string: {other}")),
                }
            };
            rows.push(TableSnapshot {
                snapshot: field("Snapshot name")?,
                keyspace: field("Keyspace name")?,
                table: field("Column family name")?,
                size_on_disk: field("Size on disk")?,
                true_size: field("True size")?,
            });
            Ok(())
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_rows(nested, rows)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for nested in items {
                collect_rows(nested, rows)?;
            }
            Ok(())
        }
        other => Err(format!("unexpected tabular node: {other}")),
    }
}
