//! Agent composition root: stability gate, mesh join, handler wiring.

use crate::orchestrator::{Orchestrator, BACKUP_EVENT, CLEAR_SNAPSHOT_EVENT};
use crate::payload::BackupPayload;
use async_trait::async_trait;
use chrono::Utc;
use snapmesh_gossip::{EventHandler, EventMesh, Flow, GossipError, UserEvent};
use snapmesh_probe::{check_cluster_stability, ClusterProbe, ProbeError, StabilityError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Reasons the agent cannot start.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The storage ring is changing shape.
    #[error(transparent)]
    Unstable(#[from] StabilityError),

    /// Topology could not be read.
    #[error("cannot read storage topology: {0}")]
    Probe(#[from] ProbeError),

    /// No seed answered.
    #[error("cannot join the mesh: {0}")]
    Join(#[source] GossipError),

    /// A mesh member is not a live storage node.
    #[error("mesh member {address} is not a live Cassandra node")]
    Inconsistent {
        /// IP address of the mesh member.
        address: String,
    },

    /// The event loop could not be started.
    #[error("cannot start the event loop: {0}")]
    EventLoop(#[source] GossipError),

    /// Every start attempt failed.
    #[error("agent did not start after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        last: Box<AgentError>,
    },
}

/// How [`Agent::start_with_retry`] retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up; zero is treated as one.
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            backoff: Duration::from_secs(1),
        }
    }
}

/// One agent per Cassandra node.
pub struct Agent {
    probe: Arc<dyn ClusterProbe>,
    mesh: Arc<dyn EventMesh>,
    orchestrator: Arc<Orchestrator>,
    retry: RetryPolicy,
    handlers_registered: AtomicBool,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Wires the agent's collaborators.
    pub fn new(
        probe: Arc<dyn ClusterProbe>,
        mesh: Arc<dyn EventMesh>,
        orchestrator: Arc<Orchestrator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            probe,
            mesh,
            orchestrator,
            retry,
            handlers_registered: AtomicBool::new(false),
            event_loop: Mutex::new(None),
        }
    }

    /// Storage probe.
    pub fn probe(&self) -> &Arc<dyn ClusterProbe> {
        &self.probe
    }

    /// Event mesh.
    pub fn mesh(&self) -> &Arc<dyn EventMesh> {
        &self.mesh
    }

    /// Snapshot orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Starts the agent once.
    ///
    /// 1. The storage ring must be stable; nothing is joined otherwise.
    /// 2. The mesh is joined using the live storage nodes as seeds.
    /// 3. Every alive mesh member must be a live storage node.
    /// 4. The `backup` and `clearsnapshot` handlers are registered.
    /// 5. The event loop is spawned.
    pub async fn start(&self) -> Result<(), AgentError> {
        check_cluster_stability(self.probe.as_ref()).await?;

        let seeds = self.probe.live_nodes().await?;
        let joined = self.mesh.join(&seeds).await.map_err(AgentError::Join)?;
        info!(seeds = seeds.len(), joined, "joined snapshot mesh");

        self.check_clusters_consistency().await?;

        if !self.handlers_registered.swap(true, Ordering::SeqCst) {
            self.mesh.register_event_handler(
                BACKUP_EVENT,
                Arc::new(BackupHandler {
                    orchestrator: Arc::clone(&self.orchestrator),
                }),
            );
            self.mesh.register_event_handler(
                CLEAR_SNAPSHOT_EVENT,
                Arc::new(ClearSnapshotHandler {
                    orchestrator: Arc::clone(&self.orchestrator),
                }),
            );
        }

        let handle = self
            .mesh
            .spawn_event_loop()
            .map_err(AgentError::EventLoop)?;
        *self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("agent started");
        Ok(())
    }

    /// Retries [`Agent::start`] with a fixed backoff.
    pub async fn start_with_retry(&self) -> Result<(), AgentError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.start().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    return Err(AgentError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    })
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "agent start failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fails when an alive mesh member is not a live storage node.
    pub async fn check_clusters_consistency(&self) -> Result<(), AgentError> {
        let live = self.probe.live_nodes().await?;
        match self
            .mesh
            .alive_members()
            .into_iter()
            .find(|member| !live.contains(member))
        {
            Some(address) => Err(AgentError::Inconsistent { address }),
            None => Ok(()),
        }
    }

    /// Re-checks consistency every `every` until `shutdown` flips, logging disagreements.
    pub async fn watch_consistency(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_clusters_consistency().await {
                        warn!("mesh and storage membership disagree: {e}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

struct BackupHandler {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl EventHandler for BackupHandler {
    async fn handle(&self, event: &UserEvent) -> anyhow::Result<Flow> {
        let payload = BackupPayload::decode(&event.payload)?;
        let wait = (payload.execute_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        info!(
            origin = %event.origin,
            keyspace_glob = %payload.keyspace_glob,
            table = %payload.table,
            execute_at = %payload.execute_at,
            "backup scheduled"
        );
        tokio::time::sleep(wait).await;

        let result = self
            .orchestrator
            .execute_local_snapshot_at(&payload.keyspace_glob, &payload.table, payload.execute_at)
            .await;
        if result.has_error() {
            error!(%result, "local snapshot failed");
        } else {
            info!(%result, "local snapshot done");
        }
        Ok(Flow::Continue)
    }
}

struct ClearSnapshotHandler {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl EventHandler for ClearSnapshotHandler {
    async fn handle(&self, event: &UserEvent) -> anyhow::Result<Flow> {
        info!(origin = %event.origin, "clearing local snapshots");
        self.orchestrator.clear_snapshots().await?;
        Ok(Flow::Continue)
    }
}
