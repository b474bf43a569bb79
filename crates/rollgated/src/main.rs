//! rollgated — the Rollgate daemon.
//!
//! Single binary that assembles:
//! - State store (redb) for clusters and the audit trail
//! - Platform clients, one per registered cluster
//! - Rollout controller and watcher registry
//! - REST API
//!
//! # Usage
//!
//! ```text
//! rollgated serve --config /etc/rollgate/rollgate.toml --port 8080
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rollgate_api::{ApiState, PlatformRegistry};
use rollgate_core::{ClusterConfig, DaemonConfig};
use rollgate_platform::MemoryPlatform;
use rollgate_rollout::{RolloutLocks, RolloutSettings};
use rollgate_state::{ClusterRecord, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rollgated", about = "Rollgate staged rollout daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Path to rollgate.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state. Overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,

        /// Serve every cluster from an in-process platform instead of a
        /// real API server.
        #[arg(long)]
        dev_platform: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

const DEFAULT_FILTER: &str = "info,rollgated=debug,rollgate_rollout=debug,rollgate_api=debug";

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_format,
            dev_platform,
        } => {
            init_tracing(log_format);
            let mut daemon = match &config {
                Some(path) => DaemonConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                daemon.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                daemon.server.data_dir = data_dir;
            }
            run_serve(daemon, dev_platform).await
        }
    }
}

async fn run_serve(config: DaemonConfig, dev_platform: bool) -> anyhow::Result<()> {
    info!("Rollgate daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("rollgate.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    for cluster in &config.clusters {
        register_cluster(&store, cluster)?;
    }

    let platforms = if dev_platform {
        warn!("serving every cluster from the in-process dev platform");
        PlatformRegistry::fixed(Arc::new(MemoryPlatform::new()))
    } else {
        PlatformRegistry::new()
    };

    let settings = RolloutSettings {
        watch_timeout: config.rollout.watch_timeout()?,
    };
    info!(watch_timeout = ?settings.watch_timeout, "rollout settings loaded");

    let locks = RolloutLocks::new();
    let state = ApiState::new(store, platforms, locks.clone(), settings);

    // ── Start API server ───────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let router = rollgate_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    let cancelled = locks.cancel_all();
    if cancelled > 0 {
        info!(cancelled, "cancelled in-flight rollout watchers");
    }

    info!("Rollgate daemon stopped");
    Ok(())
}

/// Upsert one configured cluster into the state store.
fn register_cluster(store: &StateStore, cluster: &ClusterConfig) -> anyhow::Result<()> {
    let created_at = match store.get_cluster(&cluster.id)? {
        Some(existing) => existing.created_at,
        None => epoch_secs(),
    };
    let record = ClusterRecord {
        id: cluster.id.clone(),
        name: cluster.name.clone().unwrap_or_else(|| cluster.id.clone()),
        api_server: cluster.api_server.clone(),
        token: cluster.resolve_token()?,
        ca_cert_pem: cluster.resolve_ca_pem()?,
        insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        created_at,
    };
    store.put_cluster(&record)?;
    info!(cluster = %record.id, api_server = %record.api_server, "cluster registered from config");
    Ok(())
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

