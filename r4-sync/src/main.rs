//! r4-sync - local-first channel sync engine
//!
//! Keeps a local SQLite store in step with the remote channel store and the
//! frozen legacy archive. Runs one sync job from the command line, or serves
//! the HTTP control surface (`serve`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r4_common::config::{self, TomlConfig};
use r4_common::events::EventBus;
use serde::Serialize;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use r4_sync::services::{HttpLegacyArchive, HttpRemoteGateway, SnapshotSource, SyncOptions};
use r4_sync::{AppState, SyncEngine};

const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for r4-sync
#[derive(Parser, Debug)]
#[command(name = "r4-sync")]
#[command(about = "Local-first sync engine for radio channels and tracks")]
#[command(version)]
struct Args {
    /// Bootstrap TOML config file
    #[arg(short, long, env = "R4_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the local store
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP control surface
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long, env = "R4_PORT")]
        port: Option<u16>,
    },
    /// Pull channel metadata, then tracks of every stale live channel
    Full,
    /// Pull one channel's tracks if they are stale
    Channel {
        slug: String,
        /// Pull without checking staleness
        #[arg(long)]
        force: bool,
    },
    /// Pull tracks of every stale live channel
    Stale {
        #[arg(long)]
        force: bool,
    },
    /// Report which channels would be pulled, without writing anything
    Analyze {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("r4_sync={0},r4_common={0},tower_http=info", toml_config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting r4-sync v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = config::database_path(&root_folder, &toml_config);
    info!("Root folder: {}", root_folder.display());
    info!("Database: {}", db_path.display());

    let engine = Arc::new(build_engine(&toml_config, &db_path).await?);

    match args.command {
        Command::Serve { port } => {
            serve(engine, port.unwrap_or(toml_config.server.port)).await?;
        }
        Command::Full => print_json(&engine.full_sync().await?)?,
        Command::Channel { slug, force } => {
            let pulled = engine
                .sync_one_channel(&slug, SyncOptions { skip_check: force })
                .await?;
            print_json(&serde_json::json!({ "slug": slug, "pulled": pulled }))?;
        }
        Command::Stale { force } => {
            let report = engine
                .sync_tracks_for_stale(SyncOptions { skip_check: force })
                .await?;
            print_json(&report)?;
        }
        Command::Analyze { force } => {
            print_json(&engine.analyze(SyncOptions { skip_check: force }).await?)?;
        }
    }

    Ok(())
}

async fn build_engine(toml_config: &TomlConfig, db_path: &std::path::Path) -> Result<SyncEngine> {
    let pool = r4_common::db::init_database(db_path)
        .await
        .context("Failed to open local store")?;

    let remote = HttpRemoteGateway::new(
        toml_config.remote.base_url.clone(),
        config::resolve_api_key(toml_config),
    )
    .context("Failed to create remote gateway client")?;

    let legacy = HttpLegacyArchive::new(
        SnapshotSource::parse(&toml_config.legacy.snapshot),
        toml_config.legacy.tracks_base_url.clone(),
        toml_config.sync.legacy_limit,
    )
    .context("Failed to create legacy archive client")?;

    let engine = SyncEngine::new(
        pool,
        Arc::new(remote),
        Arc::new(legacy),
        toml_config.sync.clone(),
        EventBus::new(EVENT_BUS_CAPACITY),
    )
    .await
    .context("Failed to initialize sync engine")?;

    info!(
        remote = %toml_config.remote.base_url,
        concurrency = toml_config.sync.concurrency,
        chunk_size = toml_config.sync.chunk_size,
        "Sync engine initialized"
    );
    Ok(engine)
}

async fn serve(engine: Arc<SyncEngine>, port: u16) -> Result<()> {
    let app = r4_sync::build_router(AppState::new(engine))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
