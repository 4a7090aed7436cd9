//! civo-controller: reconciles a declared cluster list with the Civo API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civo_controller::config::{self, FileConfig, Overrides, Settings};
use civo_controller::{
    spawn_config_reload, server, CivoClient, ClusterHandler, Controller, ControllerConfig,
    ControllerMetrics, DesiredState, DriftDetector, ProviderGateway, ProviderStorage,
};

/// Civo cluster controller
#[derive(Parser, Debug)]
#[command(name = "civo-controller", version, about)]
struct Cli {
    /// Config file (default: search ./, $HOME, /etc/civo-controller)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Civo API key
    #[arg(long, global = true)]
    token: Option<String>,

    /// Allow deleting clusters that are not in the config
    #[arg(long, global = true)]
    dangerous: bool,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the controller loop
    Run,
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Run => {
            let flags = Overrides {
                token: cli.token,
                dangerous: cli.dangerous.then_some(true),
                log_level: cli.log_level,
            };
            run(cli.config, flags).await
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("civo_controller={level},tower=warn,hyper=warn,reqwest=warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_path: Option<PathBuf>, flags: Overrides) -> Result<()> {
    let path = config::locate(config_path.as_deref())?;
    let file = FileConfig::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    let settings = Settings::resolve(path, file, flags)?;

    init_tracing(&settings.log_level);
    info!(
        "Starting civo-controller {} with config {}",
        env!("CARGO_PKG_VERSION"),
        settings.config_path.display()
    );
    info!(
        "{} desired clusters, polling every {:?}",
        settings.clusters.len(),
        settings.interval
    );
    if settings.dangerous {
        warn!("Dangerous mode enabled: clusters not in the config will be deleted");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let metrics = Arc::new(ControllerMetrics::new().context("Failed to register metrics")?);

    // Desired state and hot reload
    let desired = Arc::new(DesiredState::new(settings.clusters.clone()));
    let (watcher_handle, reload_handle) = spawn_config_reload(
        &settings.config_path,
        Arc::clone(&desired),
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    );

    // Provider and controller components
    let provider: Arc<dyn ProviderGateway> =
        Arc::new(CivoClient::new(&settings.api_url, &settings.token)?);
    let detector = DriftDetector::new(
        Arc::clone(&desired),
        Arc::clone(&provider),
        Arc::clone(&metrics),
        settings.interval,
    )
    .recreate_missing(settings.recreate_missing);
    let controller = Controller::new(ControllerConfig {
        name: "civo-clusters".to_string(),
        workers: settings.workers,
        max_retries: settings.max_retries,
        retry_delay: settings.retry_delay,
        lister_watcher: Arc::new(detector),
        storage: Arc::new(ProviderStorage::new(Arc::clone(&provider))),
        handler: Arc::new(ClusterHandler::new(
            Arc::clone(&provider),
            Arc::clone(&desired),
            settings.dangerous,
        )),
        metrics: Arc::clone(&metrics),
    })?;

    // Metrics endpoint
    let listener = TcpListener::bind(&settings.metrics_listen)
        .await
        .with_context(|| format!("Failed to bind metrics listener {}", settings.metrics_listen))?;
    let server_handle = tokio::spawn(server::serve(
        listener,
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    ));

    let mut controller_handle = tokio::spawn(controller.run(shutdown_rx));

    // Wait for shutdown signal
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            None
        }
        result = &mut controller_handle => Some(result),
    };

    let _ = shutdown_tx.send(true);

    let result = match finished {
        Some(result) => result,
        None => controller_handle.await,
    };
    if let Ok(Err(e)) = server_handle.await {
        warn!("Metrics server error: {}", e);
    }
    let _ = watcher_handle.await;
    let _ = reload_handle.await;

    result??;
    info!("Shutdown complete");
    Ok(())
}
