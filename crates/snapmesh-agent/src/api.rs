use crate::agent::Agent;
use crate::orchestrator::{SnapshotError, ALL_TABLES};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapmesh_probe::{check_cluster_stability, ProbeError};
use std::fmt::{Display, Write as _};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Body of an accepted backup request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupAccepted {
    pub keyspace_glob: String,
    pub table: String,
    pub execute_at: DateTime<Utc>,
}

/// HTTP control plane of one agent.
pub struct AgentApi {
    agent: Arc<Agent>,
    admin_token: Option<String>,
}

impl AgentApi {
    pub fn new(agent: Arc<Agent>, admin_token: Option<String>) -> Self {
        Self { agent, admin_token }
    }

    pub fn router(self: Arc<Self>) -> Router {
        let protected = Router::new()
            .route("/backup-keyspaces/:keyspace_glob", get(backup_keyspaces_handler))
            .route(
                "/backup-tables/:keyspace_glob/:table",
                get(backup_tables_handler),
            )
            .route("/snapshots", delete(clear_snapshots_handler))
            .route_layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth_middleware,
            ));

        let public = Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler));

        Router::new()
            .merge(protected)
            .merge(public)
            .with_state(self)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn serve<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.admin_token.is_none() {
            warn!("HTTP API is running without authentication, set admin_token in config");
        }
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("HTTP API listening on {}", addr);

        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn backup_keyspaces_handler(
    State(state): State<Arc<AgentApi>>,
    Path(keyspace_glob): Path<String>,
) -> Response {
    backup(&state, keyspace_glob, ALL_TABLES.to_string()).await
}

async fn backup_tables_handler(
    State(state): State<Arc<AgentApi>>,
    Path((keyspace_glob, table)): Path<(String, String)>,
) -> Response {
    backup(&state, keyspace_glob, table).await
}

async fn backup(state: &AgentApi, keyspace_glob: String, table: String) -> Response {
    match state
        .agent
        .orchestrator()
        .backup(&keyspace_glob, &table)
        .await
    {
        Ok(execute_at) => (
            StatusCode::ACCEPTED,
            Json(BackupAccepted {
                keyspace_glob,
                table,
                execute_at,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn clear_snapshots_handler(State(state): State<Arc<AgentApi>>) -> Response {
    match state.agent.orchestrator().request_clear_snapshots().await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "accepted" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: SnapshotError) -> Response {
    let status = if e.is_invalid_request() {
        StatusCode::BAD_REQUEST
    } else {
        warn!(error = %e, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

fn line<T: Display>(out: &mut String, label: &str, reading: Result<T, ProbeError>) {
    let _ = match reading {
        Ok(value) => writeln!(out, "{label}: {value}"),
        Err(e) => writeln!(out, "{label}: error: {e}"),
    };
}

fn list(reading: Result<Vec<String>, ProbeError>) -> Result<String, ProbeError> {
    reading.map(|items| items.join(", "))
}

async fn status_handler(State(state): State<Arc<AgentApi>>) -> (StatusCode, String) {
    let probe = state.agent.probe();
    let mut out = String::new();

    line(&mut out, "Jolokia agent", probe.agent_version().await);
    line(&mut out, "Cassandra version", probe.release_version().await);
    line(&mut out, "Cluster name", probe.cluster_name().await);
    line(&mut out, "Schema version", probe.schema_version().await);
    line(&mut out, "Host ID", probe.local_host_id().await);
    line(&mut out, "Partitioner", probe.partitioner_name().await);
    line(&mut out, "Operation mode", probe.operation_mode().await);
    line(&mut out, "Live nodes", list(probe.live_nodes().await));
    line(&mut out, "Unreachable nodes", list(probe.unreachable_nodes().await));
    line(&mut out, "Joining nodes", list(probe.joining_nodes().await));
    line(&mut out, "Leaving nodes", list(probe.leaving_nodes().await));
    line(&mut out, "Moving nodes", list(probe.moving_nodes().await));
    line(&mut out, "Keyspaces", list(probe.keyspaces().await));
    line(
        &mut out,
        "Non-system keyspaces",
        list(probe.non_system_keyspaces().await),
    );
    line(
        &mut out,
        "Data file locations",
        list(probe.all_data_file_locations().await),
    );
    line(&mut out, "Commit log location", probe.commit_log_location().await);
    line(
        &mut out,
        "Saved caches location",
        probe.saved_caches_location().await,
    );
    line(
        &mut out,
        "Incremental backups",
        probe.incremental_backups_enabled().await,
    );

    let stability = match check_cluster_stability(probe.as_ref()).await {
        Ok(()) => "stable".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let _ = writeln!(out, "Cluster stability: {stability}");
    let _ = writeln!(
        out,
        "Mesh members: {}",
        state.agent.mesh().alive_members().join(", ")
    );
    let consistency = match state.agent.check_clusters_consistency().await {
        Ok(()) => "consistent".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let _ = writeln!(out, "Mesh consistency: {consistency}");

    match probe.snapshot_details().await {
        Ok(rows) => {
            let _ = writeln!(out, "Snapshots: {}", rows.len());
            for row in rows {
                let target = if row.table.is_empty() {
                    row.keyspace
                } else {
                    format!("{}.{}", row.keyspace, row.table)
                };
                let _ = writeln!(
                    out,
                    "  {} {} {} (true size {})",
                    row.snapshot, target, row.size_on_disk, row.true_size
                );
            }
        }
        Err(e) => {
            let _ = writeln!(out, "Snapshots: error: {e}");
        }
    }

    (StatusCode::OK, out)
}

async fn auth_middleware(
    State(state): State<Arc<AgentApi>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = state.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(provided) if bool::from(provided.as_bytes().ct_eq(token.as_bytes())) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, r#"Bearer realm="snapmesh""#)],
            "Unauthorized",
        )
            .into_response(),
    }
}
