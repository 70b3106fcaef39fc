//! Heart-rate API (hrm-api) - Main entry point
//!
//! Serves heart-rate readings over HTTP and streams new readings to
//! connected clients as Server-Sent Events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hrm_common::config::{ConfigResolver, StoreBackend, TomlConfig};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hrm_api::store::{FirebaseStore, MemoryStore, RealtimeStore};
use hrm_api::{build_router, AppState};

/// Command-line arguments for hrm-api
#[derive(Parser, Debug)]
#[command(name = "hrm-api")]
#[command(about = "Heart-rate readings API with live SSE relay")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "HRM_PORT")]
    port: Option<u16>,

    /// Firebase Realtime Database URL (overrides config)
    #[arg(long, env = "FIREBASE_DATABASE_URL")]
    database_url: Option<String>,

    /// Use the in-memory store regardless of config
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigResolver::new(args.config.clone())
        .resolve()
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.database_url.clone() {
        config.store.database_url = Some(url);
    }
    if args.memory {
        config.store.backend = StoreBackend::Memory;
    }

    // Initialize tracing
    let default_filter = format!(
        "hrm_api={level},hrm_common={level},tower_http={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting hrm-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    config.validate().context("Invalid configuration")?;
    info!(
        "Store backend: {:?}, readings at '{}', replay {} readings",
        config.store.backend, config.store.readings_path, config.relay.replay_count
    );

    let store = open_store(&config).context("Failed to open backing store")?;
    let state = AppState::new(store, &config);

    state
        .listener
        .start()
        .context("Failed to subscribe to reading changes")?;

    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, config.port))?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open streams only end once the hub closes
            shutdown_state.shutdown();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn open_store(config: &TomlConfig) -> Result<Arc<dyn RealtimeStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Firebase => {
            let url = config
                .store
                .database_url
                .as_deref()
                .context("Firebase backend selected without a database URL")?;
            info!("Using Firebase Realtime Database at {}", url);
            let store = FirebaseStore::new(
                url,
                config.store.auth_token.clone(),
                config.relay.reconnect_max_backoff(),
            )?;
            Ok(Arc::new(store))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
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
