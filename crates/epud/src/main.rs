//! epud — the EPUM/PDC control-plane daemon.
//!
//! Single binary that assembles all EPUM/PDC subsystems:
//! - Domain & instance store (redb)
//! - EE registry (static, from config)
//! - EPUM reactor + decider
//! - Subscriber notifier
//! - Process Dispatcher Core
//! - Metrics collector
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! epud standalone --config epud.toml --data-dir /var/lib/epud
//! epud scaffold > epud.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use epu_core::{DaemonConfig, EeRegistryTable, LoggingEeAgent, LoggingEpumClient, LoggingProvisioner, LoggingSubscriberSink};
use epu_decider::Decider;
use epu_dispatch::Dispatcher;
use epu_metrics::MetricsCollector;
use epu_reactor::EpumReactor;
use epu_store::EpumStore;

#[derive(Parser)]
#[command(name = "epud", about = "EPUM/PDC control-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: store, reactor, decider, dispatcher, API, metrics
    /// all in one process, all domains decided by this worker.
    Standalone {
        /// Path to a TOML config file (spec §10.2). Falls back to
        /// built-in defaults for any section it omits, and to pure
        /// defaults if the flag is not given at all.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the redb store files.
        #[arg(long, default_value = "/var/lib/epud")]
        data_dir: PathBuf,

        /// Overrides `[api].bind_address` from the config file.
        #[arg(long)]
        bind: Option<String>,

        /// Overrides `[epum].decide_tick_secs`.
        #[arg(long)]
        decide_tick_secs: Option<u64>,

        /// Overrides `[metrics].snapshot_interval_secs`.
        #[arg(long)]
        metrics_interval_secs: Option<u64>,
    },
    /// Print a minimal default config to stdout, for `epud standalone --config` to consume.
    Scaffold,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,epud=debug,epu=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            data_dir,
            bind,
            decide_tick_secs,
            metrics_interval_secs,
        } => run_standalone(config, data_dir, bind, decide_tick_secs, metrics_interval_secs).await,
        Command::Scaffold => {
            print!("{}", DaemonConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_standalone(
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    bind_override: Option<String>,
    decide_tick_override: Option<u64>,
    metrics_interval_override: Option<u64>,
) -> anyhow::Result<()> {
    info!("epud starting in standalone mode");

    let mut config = match &config_path {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(bind) = bind_override {
        config.api.bind_address = bind;
    }
    if let Some(secs) = decide_tick_override {
        config.epum.decide_tick_secs = secs;
    }
    if let Some(secs) = metrics_interval_override {
        config.metrics.snapshot_interval_secs = secs;
    }

    std::fs::create_dir_all(&data_dir)?;
    let epum_db_path = data_dir.join(&config.epum.store_path);

    // ── Store ────────────────────────────────────────────────────
    let store = EpumStore::open(&epum_db_path)?;
    info!(path = ?epum_db_path, "domain/instance store opened");

    // ── EE registry (static, loaded once from config) ──────────────
    let registry = EeRegistryTable::new(config.ee_registry.clone());
    info!(entries = registry.len(), "ee registry loaded");

    // ── External collaborators ──────────────────────────────────────
    // No real provisioner/EE-agent/EPUM-transport is in scope for this
    // crate (spec §1); these logging stubs are the standalone default.
    let notifier: Arc<dyn epu_core::SubscriberSink> = Arc::new(LoggingSubscriberSink);
    let provisioner: Arc<dyn epu_core::ProvisionerClient> = Arc::new(LoggingProvisioner);
    let ee_agent: Arc<dyn epu_core::EeAgentClient> = Arc::new(LoggingEeAgent);
    let epum_client: Arc<dyn epu_core::EpumClient> = Arc::new(LoggingEpumClient);

    // ── EPUM reactor + decider ───────────────────────────────────────
    let reactor = Arc::new(EpumReactor::new(store.clone(), notifier.clone()));
    let decider = Arc::new(Decider::new(store.clone(), provisioner.clone()));
    info!("epum reactor and decider initialized");

    // ── Process Dispatcher Core ──────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        "epud-pdc",
        ee_agent,
        epum_client,
        notifier.clone(),
        registry,
    ));
    dispatcher.initialize().await?;
    info!("process dispatcher core initialized");

    // ── Metrics ───────────────────────────────────────────────────
    let metrics = Arc::new(MetricsCollector::new(
        store.clone(),
        Duration::from_secs(config.metrics.snapshot_interval_secs),
    ));

    // ── Shutdown signal ───────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let decider_shutdown = shutdown_rx.clone();
    let metrics_shutdown = shutdown_rx.clone();

    // ── Background tasks ─────────────────────────────────────────
    let decider_for_loop = decider.clone();
    let decide_tick = Duration::from_secs(config.epum.decide_tick_secs);
    let decider_handle = tokio::spawn(async move {
        decider_for_loop.run(decide_tick, decider_shutdown).await;
    });

    let metrics_for_loop = metrics.clone();
    let metrics_handle = tokio::spawn(async move {
        metrics_for_loop.run(metrics_shutdown).await;
    });

    // ── API server ────────────────────────────────────────────────
    let api_state = epu_api::ApiState {
        reactor,
        dispatcher,
        metrics,
        default_owner: "default".to_string(),
    };
    let router = epu_api::build_router(api_state);

    let addr: SocketAddr = config.api.bind_address.parse()?;
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = decider_handle.await;
    let _ = metrics_handle.await;

    info!("epud stopped");
    Ok(())
}
