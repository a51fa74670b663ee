//! parch-relay binary entry point.
//!
//! Usage:
//! ```bash
//! parch-relay --config relay.toml
//! parch-relay --bind 127.0.0.1:9000
//! ```

use anyhow::Context;
use clap::Parser;
use parch_relay::cleanup::spawn_cleanup_task;
use parch_relay::config::Config;
use parch_relay::http::build_router;
use parch_relay::storage::SqliteHostStore;
use parch_relay::Relay;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Federated real-time chat relay.
#[derive(Debug, Parser)]
#[command(name = "parch-relay", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        tracing::warn!("{} not found, using defaults", cli.config.display());
        Config::default()
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    let store = SqliteHostStore::new(&config.storage.database)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let cleanup = config.cleanup.clone();
    let relay = Arc::new(Relay::new(config, Arc::new(store)));
    let _cleanup = spawn_cleanup_task(relay.clone(), cleanup);

    let app = build_router(relay);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("parch-relay v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("parch-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
