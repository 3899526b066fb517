//! # Switchyard Server
//!
//! Job dispatcher and service registry for a cluster of worker nodes.
//!
//! On start the node registers itself, fails over work it left behind in a
//! previous run and then dispatches queued jobs and probes job producers on
//! fixed intervals until it receives Ctrl-C.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use switchyard_config::{ConfigLoader, ServerConfig};
use switchyard_core::{
    HeartbeatMonitor, HttpWorkerClient, JobDispatcher, RegistryRuntime,
};
use switchyard_server::{
    AppState,
    bootstrap::{Stores, build_registry, identity_directory, own_host},
    create_router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "switchyard-server")]
#[command(about = "Cluster job dispatcher and service registry")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Load environment overrides from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    let load = loader.load().context("failed to load configuration")?;
    let mut config = load.config;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,switchyard_core=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(source) = &load.source {
        info!(path = %source.display(), "configuration loaded");
    }
    load.warnings.log();

    apply_cli_overrides(&mut config.server, &cli);

    let stores = Stores::from_config(&config).await?;
    let registry = build_registry(&stores, &config);
    let local_host = config.server.public_url.clone();

    registry
        .register_host(own_host(&config)?)
        .await
        .context("failed to register this node")?;
    let orphaned = registry
        .cancel_orphaned_jobs(&local_host)
        .await
        .context("failed to recover jobs from a previous run")?;
    if orphaned > 0 {
        warn!(orphaned, "recovered jobs left behind by a previous run");
    }

    let client = Arc::new(
        HttpWorkerClient::from_config(&config.registry.dispatch)
            .context("failed to build worker HTTP client")?,
    );
    let dispatcher = Arc::new(JobDispatcher::new(
        Arc::clone(&registry),
        Arc::new(identity_directory(&config.identity)),
        client.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatMonitor::new(Arc::clone(&registry), client));
    let runtime = RegistryRuntime::new(
        Arc::clone(&dispatcher),
        heartbeat,
        config.registry.dispatch.interval(),
        config.registry.heartbeat.interval(),
    );
    runtime.start().await;

    let state = AppState::new(Arc::clone(&registry)).with_dispatcher(dispatcher);
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let bind = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %bind, public_url = %local_host, "switchyard listening");

    let token = runtime.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = token.cancelled() => {}
            }
        })
        .await
        .context("server error")?;

    runtime.shutdown().await;
    if let Err(err) = registry.unregister_host(&local_host).await {
        warn!(error = %err, "failed to unregister this node");
    }
    info!("switchyard stopped");
    Ok(())
}

/// Applies `--host`/`--port`. A public URL that was derived from the bind
/// address follows the new address.
fn apply_cli_overrides(server: &mut ServerConfig, cli: &Cli) {
    if cli.host.is_none() && cli.port.is_none() {
        return;
    }
    let derived = ServerConfig::derived_public_url(&server.host, server.port);
    if let Some(host) = &cli.host {
        server.host = host.clone();
    }
    if let Some(port) = cli.port {
        server.port = port;
    }
    if server.public_url == derived {
        server.public_url = ServerConfig::derived_public_url(&server.host, server.port);
    }
}
