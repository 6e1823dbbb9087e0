//! Configuration for the matching engine
//!
//! Follows the per-component `from_env` convention used across the
//! Amora services: every knob has a default so a bare environment
//! still boots.

use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Which storage backend the service wires at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Volatile, for local runs and tests
    Memory,
}

/// Tunables for candidate retrieval and the lifecycle state machine
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Geohash precision for location codes (4 is roughly city scale)
    pub geohash_precision: usize,
    /// Candidates fetched per store page
    pub page_size: i64,
    /// Hard cap on candidates accumulated per retrieval
    pub max_candidates: usize,
    /// Below this many prefix hits the retriever widens to a full scan
    pub sparse_threshold: usize,
    /// Only profiles active within this window are candidates
    pub active_window_days: i64,
    /// Presented matches older than this are auto-passed by the sweep
    pub presentation_ttl_hours: i64,
}

impl MatchingConfig {
    /// Create a new MatchingConfig from environment variables
    ///
    /// # Environment Variables
    /// - `MATCHING_GEOHASH_PRECISION` (default: 4)
    /// - `MATCHING_PAGE_SIZE` (default: 100)
    /// - `MATCHING_MAX_CANDIDATES` (default: 500)
    /// - `MATCHING_SPARSE_THRESHOLD` (default: 10)
    /// - `MATCHING_ACTIVE_WINDOW_DAYS` (default: 14)
    /// - `MATCHING_PRESENTATION_TTL_HOURS` (default: 24)
    pub fn from_env() -> Self {
        Self {
            geohash_precision: env_or("MATCHING_GEOHASH_PRECISION", 4),
            page_size: env_or("MATCHING_PAGE_SIZE", 100),
            max_candidates: env_or("MATCHING_MAX_CANDIDATES", 500),
            sparse_threshold: env_or("MATCHING_SPARSE_THRESHOLD", 10),
            active_window_days: env_or("MATCHING_ACTIVE_WINDOW_DAYS", 14),
            presentation_ttl_hours: env_or("MATCHING_PRESENTATION_TTL_HOURS", 24),
        }
    }

    pub fn store_backend() -> StoreBackend {
        match env::var("MATCHING_STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            geohash_precision: 4,
            page_size: 100,
            max_candidates: 500,
            sparse_threshold: 10,
            active_window_days: 14,
            presentation_ttl_hours: 24,
        }
    }
}

/// Tunables for the async match queue workers
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Messages claimed per batch
    pub batch_size: i64,
    /// How long a claimed message stays invisible to other workers
    pub visibility_timeout_secs: u64,
    /// Claims before a message is dead-lettered
    pub max_attempts: i32,
    /// Idle sleep between empty polls
    pub poll_interval_secs: u64,
    /// Delay before a released message becomes claimable again
    pub retry_backoff_secs: u64,
    /// Number of concurrent worker tasks
    pub workers: usize,
}

impl QueueConfig {
    /// Create a new QueueConfig from environment variables
    ///
    /// # Environment Variables
    /// - `MATCH_QUEUE_BATCH_SIZE` (default: 10)
    /// - `MATCH_QUEUE_VISIBILITY_TIMEOUT_SECS` (default: 60)
    /// - `MATCH_QUEUE_MAX_ATTEMPTS` (default: 3)
    /// - `MATCH_QUEUE_POLL_INTERVAL_SECS` (default: 5)
    /// - `MATCH_QUEUE_RETRY_BACKOFF_SECS` (default: 30)
    /// - `MATCH_QUEUE_WORKERS` (default: 2)
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("MATCH_QUEUE_BATCH_SIZE", 10),
            visibility_timeout_secs: env_or("MATCH_QUEUE_VISIBILITY_TIMEOUT_SECS", 60),
            max_attempts: env_or("MATCH_QUEUE_MAX_ATTEMPTS", 3),
            poll_interval_secs: env_or("MATCH_QUEUE_POLL_INTERVAL_SECS", 5),
            retry_backoff_secs: env_or("MATCH_QUEUE_RETRY_BACKOFF_SECS", 30),
            workers: env_or("MATCH_QUEUE_WORKERS", 2),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            visibility_timeout_secs: 60,
            max_attempts: 3,
            poll_interval_secs: 5,
            retry_backoff_secs: 30,
            workers: 2,
        }
    }
}

/// Tunables for the profile cache tiers
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries held in the in-process tier
    pub l1_capacity: usize,
    /// TTL of the in-process tier
    pub l1_ttl_secs: u64,
    /// Whether to attach the shared Redis tier
    pub l2_enabled: bool,
    /// TTL of the Redis tier
    pub l2_ttl_secs: u64,
}

impl CacheConfig {
    /// Create a new CacheConfig from environment variables
    ///
    /// # Environment Variables
    /// - `PROFILE_CACHE_L1_CAPACITY` (default: 1000)
    /// - `PROFILE_CACHE_L1_TTL_SECS` (default: 60)
    /// - `PROFILE_CACHE_REDIS` (default: false)
    /// - `PROFILE_CACHE_L2_TTL_SECS` (default: 300)
    pub fn from_env() -> Self {
        Self {
            l1_capacity: env_or("PROFILE_CACHE_L1_CAPACITY", 1000),
            l1_ttl_secs: env_or("PROFILE_CACHE_L1_TTL_SECS", 60),
            l2_enabled: env_or("PROFILE_CACHE_REDIS", false),
            l2_ttl_secs: env_or("PROFILE_CACHE_L2_TTL_SECS", 300),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1000,
            l1_ttl_secs: 60,
            l2_enabled: false,
            l2_ttl_secs: 300,
        }
    }
}
