//! Shared application state.

use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::ledger::PaymentLedger;
use crate::transfer::ExecutorRegistry;

/// Cloneable handle to everything the handlers and workers need.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: PaymentLedger,
    pub executors: Arc<ExecutorRegistry>,
    pub http: reqwest::Client,
    /// Tracks execution and recovery tasks for graceful shutdown.
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(config: Config, ledger: PaymentLedger, executors: ExecutorRegistry) -> Self {
        AppState {
            config: Arc::new(config),
            ledger,
            executors: Arc::new(executors),
            http: reqwest::Client::new(),
            tasks: TaskTracker::new(),
        }
    }
}
