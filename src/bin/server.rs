//! HTTP gateway entry point.
//!
//! Loads environment configuration, starts one scheduler per configured
//! suggestion type, and serves the figment API until interrupted.

use anyhow::Context;
use figmentator::figment::scheduler::SchedulerCollection;
use figmentator::http::{self, AppState};
use figmentator::{Settings, cache};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("failed to load settings")?;
    init_tracing(settings.debug);

    let cache = cache::from_url(&settings.cache_url)
        .await
        .context("failed to initialize the story cache")?;
    let schedulers = Arc::new(
        SchedulerCollection::from_settings(&settings)
            .context("failed to build the scheduler collection")?,
    );
    schedulers.startup().await;

    let app = http::router(AppState {
        schedulers: Arc::clone(&schedulers),
        cache,
    });

    let listener = TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", settings.host, settings.port))?;
    info!("figmentator listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    schedulers.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
