mod cache;
mod config;
mod error;
mod git;
mod http;
mod provider;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cache::GitCache;
use crate::git::shell::ShellGit;
use crate::http::AppState;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "git-rest-cache", about = "Read-through REST cache for git hosting providers")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port the HTTP server listens on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Directory where repositories are cloned.
    #[arg(short, long)]
    pub storage_folder: Option<PathBuf>,

    /// Seconds an unused branch stays cached. Zero disables eviction.
    #[arg(long)]
    pub repo_ttl: Option<u64>,

    /// Seconds a token-access entry stays cached.
    #[arg(long)]
    pub token_ttl: Option<u64>,

    /// Seconds between maintenance passes over the cache.
    #[arg(long)]
    pub repo_check_interval: Option<u64>,
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI & config ----
    let cli = Cli::parse();
    let config = Arc::new(config::load(&cli)?);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        storage_folder = %config.storage_folder.display(),
        port = config.port,
        "starting git-rest-cache"
    );

    // ---- Cache ----
    let cancel = CancellationToken::new();
    let executor = Arc::new(ShellGit::new(cancel.clone()));
    let cache = Arc::new(GitCache::new(Arc::clone(&config), executor, cancel.clone()));
    cache.start().context("failed to start cache maintenance")?;

    // ---- HTTP ----
    let http_client = reqwest::Client::builder()
        .user_agent("git-rest-cache/1.0")
        .build()
        .context("failed to build reqwest client")?;

    let state = Arc::new(AppState {
        cache: Arc::clone(&cache),
        http_client,
    });
    let app = http::create_router(state, provider::default_providers());

    let listen_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // ---- Shutdown ----
    cache.stop();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while cache.is_running() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    tracing::info!("git-rest-cache shut down cleanly");
    Ok(())
}
