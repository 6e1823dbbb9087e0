//! Per-user rate limiter for the synchronous matching path

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of requests allowed per window
    pub max_requests: u32,
    /// Fixed window length in seconds
    pub window_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_seconds: 60,
        }
    }
}

#[derive(Debug)]
struct WindowEntry {
    window_start: Instant,
    count: u32,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the window resets
    pub retry_after_secs: u64,
}

/// Fixed-window rate limiter keyed by user id
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    entries: Arc<Mutex<HashMap<Uuid, WindowEntry>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request from the user and decide whether it may proceed
    pub async fn check(&self, user_id: Uuid) -> RateDecision {
        let window = Duration::from_secs(self.config.window_seconds);
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let entry = entries.entry(user_id).or_insert(WindowEntry {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;
        let elapsed = now.duration_since(entry.window_start);
        let retry_after_secs = window.saturating_sub(elapsed).as_secs().max(1);

        if entry.count > self.config.max_requests {
            debug!(
                "Rate limited user {} ({} requests in window)",
                user_id, entry.count
            );
            return RateDecision {
                allowed: false,
                retry_after_secs,
            };
        }

        // Opportunistic pruning keeps the map bounded without a
        // dedicated cleanup task
        if entries.len() > 10_000 {
            let cutoff = window * 2;
            entries.retain(|_, e| now.duration_since(e.window_start) < cutoff);
        }

        RateDecision {
            allowed: true,
            retry_after_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 3,
            window_seconds: 60,
        });
        let user = Uuid::new_v4();

        for _ in 0..3 {
            assert!(limiter.check(user).await.allowed);
        }
        let decision = limiter.check(user).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs >= 1);
    }

    #[tokio::test]
    async fn test_users_are_limited_independently() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            window_seconds: 60,
        });
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(limiter.check(a).await.allowed);
        assert!(!limiter.check(a).await.allowed);
        assert!(limiter.check(b).await.allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            window_seconds: 0,
        });
        let user = Uuid::new_v4();

        assert!(limiter.check(user).await.allowed);
        // Zero-length window: every request starts a fresh window
        assert!(limiter.check(user).await.allowed);
    }
}
