//! Snapshot orchestration.
//!
//! [`Orchestrator::backup`] is called on the agent that received the HTTP
//! request: it fixes the execution instant and broadcasts a `backup` event.
//! Every agent, the sender included, then runs
//! [`Orchestrator::execute_local_snapshot_at`] against its own Cassandra node.

use crate::payload::{BackupPayload, EmptyPayload, PayloadError};
use crate::schedule::{next_quantum, ScheduleError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use glob::{MatchOptions, Pattern};
use snapmesh_gossip::{EventMesh, GossipError};
use snapmesh_probe::{ClusterProbe, ProbeError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Event fired on every agent to take a snapshot.
pub const BACKUP_EVENT: &str = "backup";

/// Event fired on every agent to drop all snapshots.
pub const CLEAR_SNAPSHOT_EVENT: &str = "clearsnapshot";

/// Table selector meaning "every table of the keyspace".
pub const ALL_TABLES: &str = "*";

const TAG_PREFIX: &str = "snapmesh";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Reasons a snapshot request is refused before any target is attempted.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Empty or blank keyspace glob.
    #[error("A keyspace name or * is required")]
    MissingKeyspace,

    /// Empty or blank table name.
    #[error("A table name or * is required")]
    MissingTable,

    /// The keyspace glob does not compile.
    #[error("invalid keyspace pattern {pattern:?}: {msg}")]
    InvalidPattern {
        /// Pattern as given.
        pattern: String,
        /// Compiler message.
        msg: String,
    },

    /// Topology could not be read.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Payload could not be built.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Execution instant could not be computed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The event could not be broadcast.
    #[error(transparent)]
    Mesh(#[from] GossipError),
}

impl SnapshotError {
    /// True for errors caused by the request rather than the system.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            SnapshotError::MissingKeyspace
                | SnapshotError::MissingTable
                | SnapshotError::InvalidPattern { .. }
                | SnapshotError::Payload(_)
        )
    }
}

/// Outcome of a local snapshot.
#[derive(Debug)]
pub enum SnapshotResult {
    /// Nothing was attempted.
    Rejected(SnapshotError),
    /// Every matched target was attempted.
    Attempted {
        /// Tag shared by every agent firing the same event.
        tag: String,
        /// Per target outcome, keyed by `keyspace` or `keyspace.table`.
        targets: BTreeMap<String, Result<(), ProbeError>>,
    },
}

impl SnapshotResult {
    /// True when the request was rejected or any target failed.
    pub fn has_error(&self) -> bool {
        match self {
            SnapshotResult::Rejected(_) => true,
            SnapshotResult::Attempted { targets, .. } => targets.values().any(Result::is_err),
        }
    }

    /// Human readable summary of what went wrong, if anything.
    pub fn error_message(&self) -> Option<String> {
        match self {
            SnapshotResult::Rejected(e) => Some(e.to_string()),
            SnapshotResult::Attempted { targets, .. } => {
                let failures: Vec<String> = targets
                    .iter()
                    .filter_map(|(target, r)| r.as_ref().err().map(|e| format!("{target}: {e}")))
                    .collect();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.join("; "))
                }
            }
        }
    }

    /// Snapshot tag, when the snapshot was attempted.
    pub fn tag(&self) -> Option<&str> {
        match self {
            SnapshotResult::Rejected(_) => None,
            SnapshotResult::Attempted { tag, .. } => Some(tag),
        }
    }

    /// Per target outcomes. Empty when rejected.
    pub fn targets(&self) -> Option<&BTreeMap<String, Result<(), ProbeError>>> {
        match self {
            SnapshotResult::Rejected(_) => None,
            SnapshotResult::Attempted { targets, .. } => Some(targets),
        }
    }
}

impl fmt::Display for SnapshotResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotResult::Rejected(e) => write!(f, "snapshot rejected: {e}"),
            SnapshotResult::Attempted { tag, targets } => {
                let failed = targets.values().filter(|r| r.is_err()).count();
                write!(f, "snapshot {tag}: {} targets, {failed} failed", targets.len())?;
                if let Some(msg) = self.error_message() {
                    write!(f, " ({msg})")?;
                }
                Ok(())
            }
        }
    }
}

/// Checks a request without touching the network.
pub fn validate(keyspace_glob: &str, table: &str) -> Result<(), SnapshotError> {
    if keyspace_glob.trim().is_empty() {
        return Err(SnapshotError::MissingKeyspace);
    }
    if table.trim().is_empty() {
        return Err(SnapshotError::MissingTable);
    }
    Ok(())
}

/// Keyspaces whole-matched by the shell glob, case sensitively.
pub fn match_keyspaces(
    keyspace_glob: &str,
    keyspaces: &[String],
) -> Result<Vec<String>, SnapshotError> {
    // Keyspace names never contain a separator, so `**` means the same as `*`.
    let mut collapsed = String::with_capacity(keyspace_glob.len());
    for c in keyspace_glob.chars() {
        if !(c == '*' && collapsed.ends_with('*')) {
            collapsed.push(c);
        }
    }
    let pattern = Pattern::new(&collapsed).map_err(|e| SnapshotError::InvalidPattern {
        pattern: keyspace_glob.to_string(),
        msg: e.msg.to_string(),
    })?;
    Ok(keyspaces
        .iter()
        .filter(|ks| pattern.matches_with(ks, GLOB_OPTIONS))
        .cloned()
        .collect())
}

/// Tag derived from the request and the execution instant.
///
/// Every agent that fires the same event computes the same tag. Characters that
/// are not safe in a directory name are dropped.
pub fn snapshot_tag(keyspace_glob: &str, table: &str, execute_at: DateTime<Utc>) -> String {
    fn clean(s: &str) -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect()
    }
    format!(
        "{TAG_PREFIX}:{}:{}:{}",
        clean(keyspace_glob),
        clean(table),
        execute_at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Coordinates snapshot requests across the mesh.
pub struct Orchestrator {
    probe: Arc<dyn ClusterProbe>,
    mesh: Arc<dyn EventMesh>,
    quantum: Duration,
}

impl Orchestrator {
    /// Schedules backups on `quantum` boundaries.
    pub fn new(probe: Arc<dyn ClusterProbe>, mesh: Arc<dyn EventMesh>, quantum: Duration) -> Self {
        Self {
            probe,
            mesh,
            quantum,
        }
    }

    /// Storage probe used for local snapshots.
    pub fn probe(&self) -> &Arc<dyn ClusterProbe> {
        &self.probe
    }

    /// Broadcasts a backup request and returns the agreed execution instant.
    pub async fn backup(
        &self,
        keyspace_glob: &str,
        table: &str,
    ) -> Result<DateTime<Utc>, SnapshotError> {
        validate(keyspace_glob, table)?;
        match_keyspaces(keyspace_glob, &[])?;
        let execute_at = next_quantum(Utc::now(), self.quantum)?;
        let payload = BackupPayload::new(keyspace_glob, table, execute_at)?;
        self.mesh.send_event(BACKUP_EVENT, &payload).await?;
        info!(
            keyspace_glob,
            table,
            execute_at = %execute_at,
            "backup event broadcast"
        );
        Ok(execute_at)
    }

    /// Snapshots the local node now.
    pub async fn execute_local_snapshot(&self, keyspace_glob: &str, table: &str) -> SnapshotResult {
        self.execute_local_snapshot_at(keyspace_glob, table, Utc::now())
            .await
    }

    /// Snapshots the local node, tagging the snapshot after `execute_at`.
    pub async fn execute_local_snapshot_at(
        &self,
        keyspace_glob: &str,
        table: &str,
        execute_at: DateTime<Utc>,
    ) -> SnapshotResult {
        if let Err(e) = validate(keyspace_glob, table) {
            return SnapshotResult::Rejected(e);
        }
        // Compile the pattern before reading topology so a bad glob costs no request.
        if let Err(e) = match_keyspaces(keyspace_glob, &[]) {
            return SnapshotResult::Rejected(e);
        }
        let keyspaces = match self.probe.non_system_keyspaces().await {
            Ok(keyspaces) => keyspaces,
            Err(e) => return SnapshotResult::Rejected(e.into()),
        };
        let matched = match match_keyspaces(keyspace_glob, &keyspaces) {
            Ok(matched) => matched,
            Err(e) => return SnapshotResult::Rejected(e),
        };

        let tag = snapshot_tag(keyspace_glob, table, execute_at);
        debug!(%tag, keyspaces = ?matched, table, "taking local snapshot");

        let probe = &self.probe;
        let tag_ref = tag.as_str();
        let attempts = matched.iter().map(|ks| async move {
            if table == ALL_TABLES {
                let result = probe.take_snapshot(tag_ref, std::slice::from_ref(ks)).await;
                (ks.clone(), result)
            } else {
                let result = probe.take_table_snapshot(tag_ref, ks, table).await;
                (format!("{ks}.{table}"), result)
            }
        });
        let targets: BTreeMap<_, _> = join_all(attempts).await.into_iter().collect();
        SnapshotResult::Attempted { tag, targets }
    }

    /// Drops every snapshot on the local node.
    pub async fn clear_snapshots(&self) -> Result<(), ProbeError> {
        self.probe.clear_snapshot("").await?;
        info!("local snapshots cleared");
        Ok(())
    }

    /// Asks every agent to drop its snapshots.
    pub async fn request_clear_snapshots(&self) -> Result<(), SnapshotError> {
        self.mesh
            .send_event(CLEAR_SNAPSHOT_EVENT, &EmptyPayload)
            .await?;
        info!("clear snapshot event broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMesh;
    use chrono::TimeZone;
    use snapmesh_gossip::EventPayload;
    use snapmesh_probe::memory::SnapshotCall;
    use snapmesh_probe::InMemoryProbe;

    fn setup(keyspaces: &[&str]) -> (Arc<InMemoryProbe>, Arc<RecordingMesh>, Orchestrator) {
        let probe = Arc::new(InMemoryProbe::new(["10.0.0.1"], keyspaces.iter().copied()));
        let mesh = Arc::new(RecordingMesh::new(["10.0.0.1"]));
        let orchestrator = Orchestrator::new(probe.clone(), mesh.clone(), Duration::from_secs(15));
        (probe, mesh, orchestrator)
    }

    fn names(v: &[String]) -> Vec<&str> {
        v.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_glob_matching() {
        let keyspaces: Vec<String> = ["app_prod", "app_staging", "logs", "App_x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names(&match_keyspaces("app_*", &keyspaces).unwrap()),
            vec!["app_prod", "app_staging"]
        );
        assert_eq!(match_keyspaces("*", &keyspaces).unwrap().len(), 4);
        assert_eq!(names(&match_keyspaces("log?", &keyspaces).unwrap()), vec!["logs"]);
        assert_eq!(names(&match_keyspaces("[lA]*", &keyspaces).unwrap()), vec!["logs", "App_x"]);
        assert!(match_keyspaces("app", &keyspaces).unwrap().is_empty());
        assert!(match_keyspaces("prod", &keyspaces).unwrap().is_empty());
        assert!(matches!(
            match_keyspaces("[app", &keyspaces),
            Err(SnapshotError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_repeated_stars_match_like_one() {
        let keyspaces: Vec<String> = ["app_prod", "app_staging", "logs"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names(&match_keyspaces("app**", &keyspaces).unwrap()),
            vec!["app_prod", "app_staging"]
        );
        assert_eq!(match_keyspaces("***", &keyspaces).unwrap().len(), 3);
        assert_eq!(names(&match_keyspaces("l**s", &keyspaces).unwrap()), vec!["logs"]);
    }

    #[test]
    fn test_blank_arguments_are_missing() {
        assert!(matches!(validate("   ", "*"), Err(SnapshotError::MissingKeyspace)));
        assert!(matches!(validate("\t", "*"), Err(SnapshotError::MissingKeyspace)));
        assert!(matches!(validate("app", " "), Err(SnapshotError::MissingTable)));
        assert!(validate("app", "*").is_ok());
    }

    #[test]
    fn test_tag_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 3, 18, 11, 6, 20).unwrap();
        assert_eq!(
            snapshot_tag("app_*", "*", at),
            "snapmesh:app_::20240318T110620Z"
        );
        assert_eq!(snapshot_tag("app_*", "*", at), snapshot_tag("app_*", "*", at));
        assert_eq!(
            snapshot_tag("logs", "events", at),
            "snapmesh:logs:events:20240318T110620Z"
        );
    }

    #[tokio::test]
    async fn test_validation_short_circuits() {
        let (probe, _, orchestrator) = setup(&["app"]);
        let result = orchestrator.execute_local_snapshot("", "*").await;
        assert!(matches!(result, SnapshotResult::Rejected(SnapshotError::MissingKeyspace)));
        assert_eq!(
            result.error_message().unwrap(),
            "A keyspace name or * is required"
        );

        let result = orchestrator.execute_local_snapshot("app", "").await;
        assert!(matches!(result, SnapshotResult::Rejected(SnapshotError::MissingTable)));

        let result = orchestrator.execute_local_snapshot("   ", "*").await;
        assert!(matches!(result, SnapshotResult::Rejected(SnapshotError::MissingKeyspace)));
        let result = orchestrator.execute_local_snapshot("app", " ").await;
        assert!(matches!(result, SnapshotResult::Rejected(SnapshotError::MissingTable)));

        let result = orchestrator.execute_local_snapshot("[app", "*").await;
        assert!(matches!(
            result,
            SnapshotResult::Rejected(SnapshotError::InvalidPattern { .. })
        ));
        assert_eq!(probe.request_count(), 0);
    }

    #[tokio::test]
    async fn test_keyspace_snapshot_per_matched_keyspace() {
        let (probe, _, orchestrator) = setup(&["app_prod", "app_staging", "logs"]);
        let result = orchestrator.execute_local_snapshot("app_*", "*").await;
        assert!(!result.has_error());
        let targets = result.targets().unwrap();
        assert_eq!(
            targets.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["app_prod", "app_staging"]
        );
        let calls = probe.snapshot_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| matches!(c, SnapshotCall::Keyspaces { keyspaces, .. } if keyspaces.len() == 1)));
    }

    #[tokio::test]
    async fn test_table_snapshot_keys() {
        let (probe, _, orchestrator) = setup(&["app_prod", "app_staging"]);
        let result = orchestrator.execute_local_snapshot("app_*", "users").await;
        let keys: Vec<&str> = result
            .targets()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["app_prod.users", "app_staging.users"]);
        let tag = result.tag().unwrap().to_string();
        assert!(probe
            .snapshot_calls()
            .iter()
            .all(|c| matches!(c, SnapshotCall::Table { tag: t, table, .. } if *t == tag && table == "users")));
    }

    #[tokio::test]
    async fn test_partial_failure_is_aggregated() {
        let (probe, _, orchestrator) = setup(&["a", "b", "c"]);
        probe.fail_target("b");
        let result = orchestrator.execute_local_snapshot("*", "*").await;
        assert!(result.has_error());
        let targets = result.targets().unwrap();
        assert!(targets["a"].is_ok());
        assert!(targets["b"].is_err());
        assert!(targets["c"].is_ok());
        let msg = result.error_message().unwrap();
        assert!(msg.starts_with("b: "));
        assert!(result.to_string().contains("3 targets, 1 failed"));
    }

    #[tokio::test]
    async fn test_no_match_is_empty_success() {
        let (probe, _, orchestrator) = setup(&["logs"]);
        let result = orchestrator.execute_local_snapshot("app_*", "*").await;
        assert!(!result.has_error());
        assert!(result.targets().unwrap().is_empty());
        assert!(result.error_message().is_none());
        assert!(probe.snapshot_calls().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_rejects() {
        let (probe, _, orchestrator) = setup(&["logs"]);
        probe.fail_reads("connection refused");
        let result = orchestrator.execute_local_snapshot("*", "*").await;
        assert!(matches!(result, SnapshotResult::Rejected(SnapshotError::Probe(_))));
        assert!(result.tag().is_none());
    }

    #[tokio::test]
    async fn test_backup_broadcasts_payload() {
        let (probe, mesh, orchestrator) = setup(&["logs"]);
        let before = Utc::now();
        let execute_at = orchestrator.backup("lo*", "events").await.unwrap();
        assert!(execute_at > before);
        assert!(execute_at - before <= chrono::Duration::seconds(15));

        let sent = mesh.sent_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, BACKUP_EVENT);
        let payload = BackupPayload::decode(&sent[0].1).unwrap();
        assert_eq!(payload.keyspace_glob, "lo*");
        assert_eq!(payload.table, "events");
        assert_eq!(payload.execute_at, execute_at);
        assert_eq!(probe.request_count(), 0);
    }

    #[tokio::test]
    async fn test_backup_validates_before_sending() {
        let (_, mesh, orchestrator) = setup(&["logs"]);
        let err = orchestrator.backup("", "*").await.unwrap_err();
        assert!(err.is_invalid_request());
        let err = orchestrator.backup("[app", "*").await.unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidPattern { .. }));
        let err = orchestrator.backup(" ", "events").await.unwrap_err();
        assert!(matches!(err, SnapshotError::MissingKeyspace));
        let err = orchestrator.backup("logs", "  ").await.unwrap_err();
        assert!(matches!(err, SnapshotError::MissingTable));
        assert!(mesh.sent_events().is_empty());
    }

    #[tokio::test]
    async fn test_backup_accepts_repeated_stars() {
        let (_, mesh, orchestrator) = setup(&["app_prod"]);
        orchestrator.backup("app**", "*").await.unwrap();
        let sent = mesh.sent_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(BackupPayload::decode(&sent[0].1).unwrap().keyspace_glob, "app**");
    }

    #[tokio::test]
    async fn test_repeated_stars_snapshot_matching_keyspaces() {
        let (probe, _, orchestrator) = setup(&["app_prod", "logs"]);
        let result = orchestrator.execute_local_snapshot("app**", "*").await;
        assert!(!result.has_error());
        assert_eq!(
            result.targets().unwrap().keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["app_prod"]
        );
        assert_eq!(probe.snapshot_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_snapshots() {
        let (probe, mesh, orchestrator) = setup(&["logs"]);
        orchestrator.clear_snapshots().await.unwrap();
        assert_eq!(
            probe.snapshot_calls(),
            vec![SnapshotCall::Clear { tag: String::new() }]
        );

        orchestrator.request_clear_snapshots().await.unwrap();
        let sent = mesh.sent_events();
        assert_eq!(sent[0].0, CLEAR_SNAPSHOT_EVENT);
        assert_eq!(sent[0].1, EmptyPayload.encode());
    }
}
