//! Application state shared across handlers

use std::sync::Arc;

use crate::finder::MatchFinder;
use crate::lifecycle::MatchLifecycle;
use crate::metrics::MatchMetrics;
use crate::rate_limiter::RateLimiter;
use crate::store::QueueStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub finder: Arc<MatchFinder>,
    pub lifecycle: Arc<MatchLifecycle>,
    pub queue: Arc<dyn QueueStore>,
    pub metrics: MatchMetrics,
    pub rate_limiter: RateLimiter,
}
