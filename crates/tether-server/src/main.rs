//! tether server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, starts the verification scheduler, and serves the JSON API over
//! HTTP until Ctrl-C or SIGTERM.

mod config;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use tether_engine::{
  HttpLocationSource, HttpNotificationSink, LocationProvider, MemoryCache,
  NotificationDispatcher, Scheduler, VerificationEngine,
};
use tether_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Tether location-verification server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config).required(false))
    .add_source(
      ::config::Environment::with_prefix("TETHER")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  let engine_cfg = &server_cfg.engine;
  engine_cfg.validate().context("invalid engine configuration")?;

  // Open SQLite store.
  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );
  let cache = Arc::new(MemoryCache::new());

  // Outbound integrations.
  let source = HttpLocationSource::new(&engine_cfg.provider)
    .context("failed to configure location provider")?;
  let provider = LocationProvider::new(source, engine_cfg.retry, engine_cfg.timeouts);

  let (primary, fallback) = HttpNotificationSink::pair(&engine_cfg.notification)
    .context("failed to configure notifications")?;
  let notifier = NotificationDispatcher::new(
    primary,
    fallback,
    engine_cfg.notification.fallback_recipient.clone(),
    engine_cfg.timeouts.notify(),
  );

  let engine = Arc::new(VerificationEngine::new(
    Arc::clone(&store),
    Arc::clone(&cache),
    provider,
    notifier,
    engine_cfg.zone_cache_ttl(),
  ));

  // Scheduler: builds the job table from the store, then re-syncs.
  let scheduler = Scheduler::new(Arc::clone(&store), cache, Arc::clone(&engine), engine_cfg)
    .context("failed to build scheduler")?;
  scheduler.start();

  let app = Router::new()
    .nest("/api", tether_api::api_router(store, Arc::new(scheduler.clone()), engine))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  tracing::info!("stopping scheduler");
  scheduler.shutdown().await;

  Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {},
    () = terminate => {},
  }
  tracing::info!("shutdown signal received");
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tilde_is_expanded_against_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/tether.db")), PathBuf::from(home).join("tether.db"));
    assert_eq!(expand_tilde(Path::new("/var/tether.db")), PathBuf::from("/var/tether.db"));
  }
}
