//! In-memory [`ClusterProbe`] for tests and dry runs.
//!
//! Topology is set by the caller, snapshot operations are recorded instead of
//! executed, and failures can be injected per read or per snapshot target.

use crate::error::{ProbeError, Result};
use crate::storage_service::{ClusterProbe, TableSnapshot};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keyspaces every Cassandra node owns regardless of user schema.
pub const SYSTEM_KEYSPACES: &[&str] = &[
    "system",
    "system_auth",
    "system_distributed",
    "system_schema",
    "system_traces",
];

/// A snapshot operation recorded by [`InMemoryProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotCall {
    /// `take_snapshot(tag, keyspaces)`.
    Keyspaces {
        /// Snapshot tag.
        tag: String,
        /// Keyspaces snapshotted.
        keyspaces: Vec<String>,
    },
    /// `take_table_snapshot(tag, keyspace, table)`.
    Table {
        /// Snapshot tag.
        tag: String,
        /// Keyspace of the table.
        keyspace: String,
        /// Table name.
        table: String,
    },
    /// `clear_snapshot(tag)`.
    Clear {
        /// Tag cleared, empty for all.
        tag: String,
    },
}

#[derive(Debug, Default)]
struct State {
    live: Vec<String>,
    unreachable: Vec<String>,
    joining: Vec<String>,
    leaving: Vec<String>,
    moving: Vec<String>,
    non_system_keyspaces: Vec<String>,
    read_failure: Option<String>,
    failing_targets: HashSet<String>,
    calls: Vec<SnapshotCall>,
}

/// Scriptable probe that never touches the network.
#[derive(Debug, Default)]
pub struct InMemoryProbe {
    state: Mutex<State>,
    requests: AtomicUsize,
}

impl InMemoryProbe {
    /// A stable ring of `live` nodes holding `keyspaces` besides the system ones.
    pub fn new<L, K>(live: L, keyspaces: K) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let probe = Self::default();
        {
            let mut state = probe.lock();
            state.live = live.into_iter().map(Into::into).collect();
            state.non_system_keyspaces = keyspaces.into_iter().map(Into::into).collect();
        }
        probe
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        match &state.read_failure {
            Some(msg) => Err(ProbeError::Other(msg.clone())),
            None => Ok(f(&state)),
        }
    }

    fn record(&self, call: SnapshotCall, targets: &[String]) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        state.calls.push(call);
        match targets.iter().find(|t| state.failing_targets.contains(*t)) {
            Some(target) => Err(ProbeError::Other(format!("snapshot of {target} failed"))),
            None => Ok(()),
        }
    }

    /// Replaces the live node list.
    pub fn set_live<I: IntoIterator<Item = S>, S: Into<String>>(&self, nodes: I) {
        self.lock().live = nodes.into_iter().map(Into::into).collect();
    }

    /// Replaces the unreachable node list.
    pub fn set_unreachable<I: IntoIterator<Item = S>, S: Into<String>>(&self, nodes: I) {
        self.lock().unreachable = nodes.into_iter().map(Into::into).collect();
    }

    /// Replaces the joining node list.
    pub fn set_joining<I: IntoIterator<Item = S>, S: Into<String>>(&self, nodes: I) {
        self.lock().joining = nodes.into_iter().map(Into::into).collect();
    }

    /// Replaces the leaving node list.
    pub fn set_leaving<I: IntoIterator<Item = S>, S: Into<String>>(&self, nodes: I) {
        self.lock().leaving = nodes.into_iter().map(Into::into).collect();
    }

    /// Replaces the moving node list.
    pub fn set_moving<I: IntoIterator<Item = S>, S: Into<String>>(&self, nodes: I) {
        self.lock().moving = nodes.into_iter().map(Into::into).collect();
    }

    /// Makes every subsequent read fail with `msg`.
    pub fn fail_reads(&self, msg: impl Into<String>) {
        self.lock().read_failure = Some(msg.into());
    }

    /// Makes snapshots of `target` (`keyspace` or `keyspace.table`) fail.
    pub fn fail_target(&self, target: impl Into<String>) {
        self.lock().failing_targets.insert(target.into());
    }

    /// Snapshot operations received so far, in arrival order.
    pub fn snapshot_calls(&self) -> Vec<SnapshotCall> {
        self.lock().calls.clone()
    }

    /// Number of reads and operations received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterProbe for InMemoryProbe {
    async fn live_nodes(&self) -> Result<Vec<String>> {
        self.read(|s| s.live.clone())
    }

    async fn unreachable_nodes(&self) -> Result<Vec<String>> {
        self.read(|s| s.unreachable.clone())
    }

    async fn joining_nodes(&self) -> Result<Vec<String>> {
        self.read(|s| s.joining.clone())
    }

    async fn leaving_nodes(&self) -> Result<Vec<String>> {
        self.read(|s| s.leaving.clone())
    }

    async fn moving_nodes(&self) -> Result<Vec<String>> {
        self.read(|s| s.moving.clone())
    }

    async fn keyspaces(&self) -> Result<Vec<String>> {
        self.read(|s| {
            SYSTEM_KEYSPACES
                .iter()
                .map(|k| k.to_string())
                .chain(s.non_system_keyspaces.iter().cloned())
                .collect()
        })
    }

    async fn non_system_keyspaces(&self) -> Result<Vec<String>> {
        self.read(|s| s.non_system_keyspaces.clone())
    }

    async fn take_snapshot(&self, tag: &str, keyspaces: &[String]) -> Result<()> {
        self.record(
            SnapshotCall::Keyspaces {
                tag: tag.to_string(),
                keyspaces: keyspaces.to_vec(),
            },
            keyspaces,
        )
    }

    async fn take_table_snapshot(&self, tag: &str, keyspace: &str, table: &str) -> Result<()> {
        self.record(
            SnapshotCall::Table {
                tag: tag.to_string(),
                keyspace: keyspace.to_string(),
                table: table.to_string(),
            },
            &[format!("{keyspace}.{table}")],
        )
    }

    async fn clear_snapshot(&self, tag: &str) -> Result<()> {
        self.record(SnapshotCall::Clear { tag: tag.to_string() }, &[])
    }

    async fn snapshot_details(&self) -> Result<Vec<TableSnapshot>> {
        self.read(|s| {
            let mut rows = Vec::new();
            for call in &s.calls {
                match call {
                    SnapshotCall::Keyspaces { tag, keyspaces } => {
                        rows.extend(keyspaces.iter().map(|ks| TableSnapshot {
                            snapshot: tag.clone(),
                            keyspace: ks.clone(),
                            table: String::new(),
                            size_on_disk: "0 bytes".to_string(),
                            true_size: "0 bytes".to_string(),
                        }))
                    }
                    SnapshotCall::Table {
                        tag,
                        keyspace,
                        table,
                    } => rows.push(TableSnapshot {
                        snapshot: tag.clone(),
                        keyspace: keyspace.clone(),
                        table: table.clone(),
                        size_on_disk: "0 bytes".to_string(),
                        true_size: "0 bytes".to_string(),
                    }),
                    SnapshotCall::Clear { tag } if tag.is_empty() => rows.clear(),
                    SnapshotCall::Clear { tag } => rows.retain(|r| &r.snapshot != tag),
                }
            }
            rows
        })
    }

    async fn agent_version(&self) -> Result<String> {
        self.read(|_| "in-memory".to_string())
    }

    async fn release_version(&self) -> Result<String> {
        self.read(|_| "4.1.0".to_string())
    }

    async fn schema_version(&self) -> Result<String> {
        self.read(|_| "00000000-0000-0000-0000-000000000000".to_string())
    }

    async fn cluster_name(&self) -> Result<String> {
        self.read(|_| "in-memory".to_string())
    }

    async fn local_host_id(&self) -> Result<String> {
        self.read(|_| "00000000-0000-0000-0000-000000000001".to_string())
    }

    async fn partitioner_name(&self) -> Result<String> {
        self.read(|_| "org.apache.cassandra.dht.Murmur3Partitioner".to_string())
    }

    async fn operation_mode(&self) -> Result<String> {
        self.read(|_| "NORMAL".to_string())
    }

    async fn all_data_file_locations(&self) -> Result<Vec<String>> {
        self.read(|_| vec!["/var/lib/cassandra/data".to_string()])
    }

    async fn commit_log_location(&self) -> Result<String> {
        self.read(|_| "/var/lib/cassandra/commitlog".to_string())
    }

    async fn saved_caches_location(&self) -> Result<String> {
        self.read(|_| "/var/lib/cassandra/saved_caches".to_string())
    }

    async fn incremental_backups_enabled(&self) -> Result<bool> {
        self.read(|_| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_snapshot_calls_in_order() {
        let probe = InMemoryProbe::new(["10.0.0.1"], ["app"]);
        probe
            .take_snapshot("t1", &["app".to_string()])
            .await
            .unwrap();
        probe.take_table_snapshot("t2", "app", "users").await.unwrap();
        probe.clear_snapshot("").await.unwrap();

        let calls = probe.snapshot_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[1],
            SnapshotCall::Table {
                tag: "t2".into(),
                keyspace: "app".into(),
                table: "users".into()
            }
        );
        assert_eq!(probe.request_count(), 3);
    }

    #[tokio::test]
    async fn test_injected_target_failure() {
        let probe = InMemoryProbe::new(["10.0.0.1"], ["app", "logs"]);
        probe.fail_target("logs");
        probe.fail_target("app.users");
        assert!(probe.take_snapshot("t", &["app".into()]).await.is_ok());
        assert!(probe.take_snapshot("t", &["logs".into()]).await.is_err());
        assert!(probe.take_table_snapshot("t", "app", "users").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_details_tracks_clears() {
        let probe = InMemoryProbe::new(["10.0.0.1"], ["app"]);
        probe.take_table_snapshot("t1", "app", "a").await.unwrap();
        probe.take_table_snapshot("t2", "app", "b").await.unwrap();
        probe.clear_snapshot("t1").await.unwrap();
        let rows = probe.snapshot_details().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].snapshot, "t2");

        probe.clear_snapshot("").await.unwrap();
        assert!(probe.snapshot_details().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_keyspaces_are_listed() {
        let probe = InMemoryProbe::new(Vec::<String>::new(), ["app"]);
        let all = probe.keyspaces().await.unwrap();
        assert_eq!(all.len(), SYSTEM_KEYSPACES.len() + 1);
        assert_eq!(probe.non_system_keyspaces().await.unwrap(), vec!["app"]);
    }
}
