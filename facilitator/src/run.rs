//! Facilitator server bootstrap.
//!
//! Loads `.env` and configuration, connects executors for every chain with
//! an RPC endpoint, resumes unfinished payments, and serves the HTTP API
//! until SIGTERM/SIGINT. In-flight execution tasks are drained on shutdown;
//! anything still unfinished is picked up by recovery on the next start.

use alloy_signer_local::PrivateKeySigner;
use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use apitoll_store::Store;
use apitoll_types::chain::Chain;

use crate::config::Config;
use crate::handlers;
use crate::ledger::PaymentLedger;
use crate::state::AppState;
use crate::transfer::{EvmExecutor, ExecutorRegistry};
use crate::worker;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load();

    let mut executors = ExecutorRegistry::default();
    if let Some(key) = &config.evm_executor_key {
        let signer: PrivateKeySigner = key.parse()?;
        for chain in [Chain::Base, Chain::BaseSepolia] {
            if let Some(rpc_url) = config.rpc_url(chain) {
                let executor = EvmExecutor::connect(
                    chain,
                    rpc_url.clone(),
                    signer.clone(),
                    config.confirmations,
                    Duration::from_secs(config.receipt_timeout_secs),
                )?;
                tracing::info!(chain = %chain, "executor connected");
                executors.register(executor);
            }
        }
    }
    if executors.is_empty() {
        tracing::warn!("no executors configured; /pay will fail all settlements");
    }

    let ledger = PaymentLedger::new(Store::new(), config.shared_secret.clone());
    let addr = SocketAddr::new(config.host, config.port);
    let state = AppState::new(config, ledger, executors);

    worker::recover(state.clone()).await;

    let router: Router = handlers::routes().with_state(state.clone()).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("facilitator listening on http://{addr}");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let graceful = {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(graceful)
        .await?;

    // Let in-flight execution tasks finish; recovery handles the rest on
    // the next boot.
    state.tasks.close();
    state.tasks.wait().await;
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
