//! ucv-bills - Bill Verification Service
//!
//! Accepts utility bill uploads, fingerprints them for duplicate detection
//! and verifies each one in the background (field extraction, then tamper
//! verification). Submitters poll the entry for the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ucv_bills::config::{CliOverrides, ServiceConfig};
use ucv_bills::{extractors, validators, AppState};
use ucv_common::config::RootFolderInitializer;

/// Command-line arguments for ucv-bills
#[derive(Parser, Debug)]
#[command(name = "ucv-bills")]
#[command(about = "Bill verification service")]
#[command(version)]
struct Args {
    /// Root folder holding the database and stored documents
    #[arg(short, long, env = "UCV_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config dir>/ucv/ucv-bills.toml)
    #[arg(short, long, env = "UCV_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:5740
    #[arg(short, long, env = "UCV_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(&CliOverrides {
        root_folder: args.root_folder,
        config_path: args.config,
        bind_address: args.bind,
    })
    .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ucv-bills (Bill Verification) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = ucv_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let extractor = extractors::from_config(&config.extractor).context("Failed to build field extractor")?;
    let verifier = validators::from_config(&config.verifier).context("Failed to build tamper verifier")?;
    if config.verifier.seed.is_some() {
        warn!("Stub verifier seeded: acceptance draws are reproducible");
    }

    let state = AppState::from_config(db_pool, &config, extractor, verifier);
    let app = ucv_bills::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
///
/// Detached verification runs still in flight are dropped with the runtime;
/// their entries stay `PENDING` for manual review.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
