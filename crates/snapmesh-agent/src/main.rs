use anyhow::Result;
use clap::Parser;
use snapmesh_agent::cli::{Cli, Command};
use snapmesh_agent::{Agent, AgentApi, AgentConfig, Orchestrator};
use snapmesh_gossip::{EventMesh, Gossiper};
use snapmesh_probe::{ClusterProbe, JolokiaClient, StorageServiceProbe};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    match &cli.command {
        Command::Serve { config } => serve(config).await,
        _ => cli.run().await,
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (plain, json) = if json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = if config_path.exists() {
        AgentConfig::from_file(config_path)?
    } else {
        warn!("Config file not found, using defaults: {}", config_path.display());
        AgentConfig::default()
    };
    info!(version = env!("CARGO_PKG_VERSION"), "snapmesh agent starting");

    let probe: Arc<dyn ClusterProbe> = Arc::new(StorageServiceProbe::new(JolokiaClient::new(
        config.jolokia_url.clone(),
        config.jolokia_timeout(),
    )?));
    let mesh: Arc<dyn EventMesh> = Arc::new(Gossiper::bind(config.gossip.clone()).await?);
    let orchestrator = Arc::new(Orchestrator::new(
        probe.clone(),
        mesh.clone(),
        config.schedule_quantum(),
    ));
    let agent = Arc::new(Agent::new(
        probe,
        mesh.clone(),
        orchestrator,
        config.retry_policy(),
    ));

    if let Err(e) = agent.start_with_retry().await {
        if let Err(leave) = mesh.leave().await {
            warn!("leaving the mesh failed: {leave}");
        }
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consistency = config
        .consistency_check_interval()
        .map(|every| tokio::spawn(agent.clone().watch_consistency(every, shutdown_rx.clone())));

    let api = Arc::new(AgentApi::new(agent.clone(), config.admin_token.clone()));
    let mut server_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(api.serve(config.http_bind_addr, async move {
        let _ = server_shutdown.changed().await;
    }));

    let mut server_done = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("cannot listen for ctrl-c: {e}");
            }
            info!("shutdown requested");
        }
        result = &mut server => {
            server_done = true;
            match result {
                Ok(Ok(())) => warn!("HTTP API stopped"),
                Ok(Err(e)) => error!("HTTP API failed: {e}"),
                Err(e) => error!("HTTP API task failed: {e}"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !server_done {
        let grace = config.shutdown_grace();
        if tokio::time::timeout(grace, &mut server).await.is_err() {
            warn!("HTTP API did not drain within {:?}, aborting", grace);
            server.abort();
        }
    }
    if let Some(consistency) = consistency {
        let _ = consistency.await;
    }

    mesh.leave().await?;
    info!("snapmesh agent stopped");
    Ok(())
}
