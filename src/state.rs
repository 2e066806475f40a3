//! Shared platform state.

use std::sync::Arc;

use apitoll_store::Store;

use crate::config::Config;
use crate::ratelimit::SlidingWindowLimiter;
use crate::webhook::DispatcherHandle;

/// Cloneable handle carried by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub webhooks: DispatcherHandle,
    /// Shared limiter for public routes (50/min per IP).
    pub public_limiter: Arc<SlidingWindowLimiter>,
}
