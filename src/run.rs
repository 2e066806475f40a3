//! Platform server bootstrap.
//!
//! Wires the store, the webhook dispatcher, the shared rate limiter and
//! its prune sweep, then serves the HTTP surface. SIGTERM/SIGINT cancel a
//! shared token; the dispatcher and sweep tasks watch it and wind down
//! with the server.

use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use apitoll_store::Store;

use crate::config::Config;
use crate::http;
use crate::ratelimit::{SlidingWindowLimiter, StoreCounterBackend};
use crate::state::AppState;
use crate::webhook::Dispatcher;

/// Public routes (signup, discovery) share this per-IP budget.
const PUBLIC_LIMIT_PER_MINUTE: u32 = 50;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load();
    let store = Store::new();

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let webhooks = Dispatcher::spawn(store.clone(), shutdown.clone());
    SlidingWindowLimiter::spawn_prune_task(store.clone(), shutdown.clone());
    let public_limiter = Arc::new(SlidingWindowLimiter::new(
        PUBLIC_LIMIT_PER_MINUTE,
        Arc::new(StoreCounterBackend::new(store.clone())),
    ));

    let addr = SocketAddr::new(config.host, config.port);
    let state = AppState {
        config: Arc::new(config),
        store,
        webhooks,
        public_limiter,
    };

    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("platform listening on http://{addr}");

    let graceful = {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(graceful)
        .await?;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) -> Result<(), std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
    Ok(())
}
