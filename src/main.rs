use clap::Parser;
use log::{error, info, warn};
use std::path::Path;
use tokio::signal;
use transmux::configuration::config::Config;
use transmux::controller::Orchestrator;

#[derive(Parser)]
#[command(name = "transmux")]
#[command(version)]
#[command(about = "A server-side video transcoding orchestrator")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(env = "TRANSMUX_CONFIG")]
    config_file: String,

    /// Overrides the configured storage root.
    #[arg(long, env = "TRANSMUX_STORAGE_ROOT")]
    storage_root: Option<std::path::PathBuf>,

    /// Overrides the configured session database URL.
    #[arg(long, env = "TRANSMUX_DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() {
    // Respect RUST_LOG for the overall level; keep the ORM quiet.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("sea_orm", log::LevelFilter::Warn)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .filter_module("sea_orm::query", log::LevelFilter::Error)
        .filter_module("sqlx::query", log::LevelFilter::Error)
        .format_target(false)
        .init();

    println!(
        "transmux v{} (transcoding orchestrator)",
        env!("CARGO_PKG_VERSION")
    );
    info!("transmux starting up");

    let args = Args::parse();
    let mut config = match Config::from_file(Path::new(args.config_file.as_str())) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from {}: {}", args.config_file, e);
            std::process::exit(1);
        }
    };
    if let Some(root) = args.storage_root {
        info!("Storage root overridden to {}", root.display());
        config.storage.root = root;
    }
    if let Some(url) = args.database_url {
        info!("Session database URL overridden");
        config.storage.database_url = Some(url);
    }

    let mut orchestrator = match Orchestrator::new(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to initialize orchestrator: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let orchestrator_handle = tokio::spawn(async move {
        if let Err(e) = orchestrator.run(shutdown_rx).await {
            error!("Orchestrator error: {}", e);
        }
    });

    info!("transmux is now operational");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping transmux...");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Err(e) = shutdown_tx.send(()) {
        error!("Failed to send shutdown signal: {:?}", e);
    }

    match tokio::time::timeout(
        tokio::time::Duration::from_secs(30),
        orchestrator_handle,
    )
    .await
    {
        Ok(Ok(())) => {
            info!("transmux shutdown completed");
        }
        Ok(Err(e)) => {
            error!("Orchestrator task failed during shutdown: {:?}", e);
        }
        Err(_) => {
            warn!("Orchestrator shutdown timed out after 30 seconds");
        }
    }
}
