//! Metrics collection and threshold alerting for the matching path
//!
//! A shared, mutex-guarded window accumulates per-attempt observations;
//! a periodic reporter job snapshots it, logs the aggregates, raises
//! threshold alerts, and resets the window. Purely observational: no
//! code on the matching path ever blocks on or fails through this.

use std::env;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How a match attempt concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NoMatch,
    Error,
}

/// Which retrieval path served an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPath {
    /// Location-code prefix query
    Prefix,
    /// Degraded full-population scan
    FullScan,
}

#[derive(Default)]
struct Window {
    durations_ms: Vec<u64>,
    scanned: Vec<u64>,
    matched: u64,
    no_match: u64,
    errors: u64,
    cache_hits: u64,
    cache_misses: u64,
    prefix_queries: u64,
    full_scans: u64,
}

/// Aggregates over one reporting window
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub matched: u64,
    pub no_match: u64,
    pub errors: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
    pub scanned_avg: f64,
    pub scanned_max: u64,
    pub success_rate_pct: f64,
    pub cache_lookups: u64,
    pub cache_hit_rate_pct: f64,
    pub full_scans: u64,
    pub prefix_queries: u64,
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

/// Shared collector for matching observations
#[derive(Clone, Default)]
pub struct MatchMetrics {
    window: Arc<Mutex<Window>>,
}

impl MatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_attempt(
        &self,
        duration_ms: u64,
        scanned: usize,
        outcome: MatchOutcome,
        path: QueryPath,
    ) {
        let mut window = self.window.lock().await;
        window.durations_ms.push(duration_ms);
        window.scanned.push(scanned as u64);
        match outcome {
            MatchOutcome::Matched => window.matched += 1,
            MatchOutcome::NoMatch => window.no_match += 1,
            MatchOutcome::Error => window.errors += 1,
        }
        match path {
            QueryPath::Prefix => window.prefix_queries += 1,
            QueryPath::FullScan => window.full_scans += 1,
        }
    }

    pub async fn record_cache_hit(&self) {
        self.window.lock().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.window.lock().await.cache_misses += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let window = self.window.lock().await;
        let mut sorted = window.durations_ms.clone();
        sorted.sort_unstable();

        let decided = window.matched + window.no_match;
        let cache_total = window.cache_hits + window.cache_misses;
        let scanned_sum: u64 = window.scanned.iter().sum();

        MetricsSnapshot {
            attempts: window.durations_ms.len() as u64,
            matched: window.matched,
            no_match: window.no_match,
            errors: window.errors,
            latency_p50_ms: percentile(&sorted, 50.0),
            latency_p95_ms: percentile(&sorted, 95.0),
            latency_p99_ms: percentile(&sorted, 99.0),
            scanned_avg: if window.scanned.is_empty() {
                0.0
            } else {
                scanned_sum as f64 / window.scanned.len() as f64
            },
            scanned_max: window.scanned.iter().copied().max().unwrap_or(0),
            success_rate_pct: if decided == 0 {
                0.0
            } else {
                window.matched as f64 / decided as f64 * 100.0
            },
            cache_lookups: cache_total,
            cache_hit_rate_pct: if cache_total == 0 {
                0.0
            } else {
                window.cache_hits as f64 / cache_total as f64 * 100.0
            },
            full_scans: window.full_scans,
            prefix_queries: window.prefix_queries,
        }
    }

    pub async fn reset(&self) {
        *self.window.lock().await = Window::default();
    }

    /// Snapshot, log, alert on crossed thresholds, and start a fresh
    /// window. Called from the periodic reporter job.
    pub async fn report(&self, thresholds: &MetricsThresholds) {
        let snapshot = self.snapshot().await;
        self.reset().await;

        if snapshot.attempts == 0 && snapshot.errors == 0 {
            return;
        }

        info!(
            attempts = snapshot.attempts,
            matched = snapshot.matched,
            p50_ms = snapshot.latency_p50_ms,
            p95_ms = snapshot.latency_p95_ms,
            p99_ms = snapshot.latency_p99_ms,
            scanned_avg = snapshot.scanned_avg,
            full_scans = snapshot.full_scans,
            "matching metrics window"
        );

        for alert in thresholds.check(&snapshot) {
            warn!("ALERT: {}", alert);
        }
    }
}

/// Alerting thresholds for the metrics reporter
#[derive(Debug, Clone)]
pub struct MetricsThresholds {
    /// p95 latency above this raises an alert
    pub p95_latency_ms: u64,
    /// Average candidates scanned per attempt above this raises an alert
    pub avg_scanned: f64,
    /// Success rate below this raises an alert
    pub min_success_rate_pct: f64,
    /// Cache hit rate below this raises an alert
    pub min_cache_hit_rate_pct: f64,
}

impl Default for MetricsThresholds {
    fn default() -> Self {
        Self {
            p95_latency_ms: 500,
            avg_scanned: 500.0,
            min_success_rate_pct: 25.0,
            min_cache_hit_rate_pct: 30.0,
        }
    }
}

impl MetricsThresholds {
    /// Create thresholds from environment variables
    ///
    /// # Environment Variables
    /// - `METRICS_P95_LATENCY_MS` (default: 500)
    /// - `METRICS_AVG_SCANNED` (default: 500)
    /// - `METRICS_MIN_SUCCESS_RATE_PCT` (default: 25)
    /// - `METRICS_MIN_CACHE_HIT_RATE_PCT` (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            p95_latency_ms: parse_env("METRICS_P95_LATENCY_MS", defaults.p95_latency_ms),
            avg_scanned: parse_env("METRICS_AVG_SCANNED", defaults.avg_scanned),
            min_success_rate_pct: parse_env(
                "METRICS_MIN_SUCCESS_RATE_PCT",
                defaults.min_success_rate_pct,
            ),
            min_cache_hit_rate_pct: parse_env(
                "METRICS_MIN_CACHE_HIT_RATE_PCT",
                defaults.min_cache_hit_rate_pct,
            ),
        }
    }

    /// Alerts for every threshold the snapshot crosses
    pub fn check(&self, snapshot: &MetricsSnapshot) -> Vec<String> {
        let mut alerts = Vec::new();

        if snapshot.latency_p95_ms > self.p95_latency_ms {
            alerts.push(format!(
                "p95 latency {}ms exceeds threshold {}ms",
                snapshot.latency_p95_ms, self.p95_latency_ms
            ));
        }
        if snapshot.scanned_avg > self.avg_scanned {
            alerts.push(format!(
                "average scan volume {:.0} exceeds threshold {:.0}",
                snapshot.scanned_avg, self.avg_scanned
            ));
        }
        if snapshot.attempts > 0 && snapshot.success_rate_pct < self.min_success_rate_pct {
            alerts.push(format!(
                "match success rate {:.1}% below threshold {:.1}%",
                snapshot.success_rate_pct, self.min_success_rate_pct
            ));
        }
        if snapshot.cache_lookups > 0 && snapshot.cache_hit_rate_pct < self.min_cache_hit_rate_pct {
            alerts.push(format!(
                "cache hit rate {:.1}% below threshold {:.1}%",
                snapshot.cache_hit_rate_pct, self.min_cache_hit_rate_pct
            ));
        }

        alerts
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_percentiles_over_known_distribution() {
        let metrics = MatchMetrics::new();
        for ms in 1..=100 {
            metrics
                .record_attempt(ms, 10, MatchOutcome::Matched, QueryPath::Prefix)
                .await;
        }

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.attempts, 100);
        assert_eq!(snapshot.latency_p50_ms, 50);
        assert_eq!(snapshot.latency_p95_ms, 95);
        assert_eq!(snapshot.latency_p99_ms, 99);
        assert_eq!(snapshot.scanned_avg, 10.0);
        assert_eq!(snapshot.success_rate_pct, 100.0);
    }

    #[tokio::test]
    async fn test_threshold_alerts() {
        let metrics = MatchMetrics::new();
        metrics
            .record_attempt(900, 2000, MatchOutcome::NoMatch, QueryPath::FullScan)
            .await;

        let snapshot = metrics.snapshot().await;
        let alerts = MetricsThresholds::default().check(&snapshot);

        assert!(alerts.iter().any(|a| a.contains("p95 latency")));
        assert!(alerts.iter().any(|a| a.contains("scan volume")));
        assert!(alerts.iter().any(|a| a.contains("success rate")));
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let metrics = MatchMetrics::new();
        metrics
            .record_attempt(10, 5, MatchOutcome::Matched, QueryPath::Prefix)
            .await;
        metrics.reset().await;
        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.attempts, 0);
        assert_eq!(snapshot.matched, 0);
    }

    #[test]
    fn test_empty_percentile_is_zero() {
        assert_eq!(percentile(&[], 95.0), 0);
    }
}
