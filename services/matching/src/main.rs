use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, health_check, init_pool};

use matching::cache::ProfileCache;
use matching::config::{CacheConfig, MatchingConfig, QueueConfig, StoreBackend};
use matching::finder::MatchFinder;
use matching::lifecycle::MatchLifecycle;
use matching::metrics::{MatchMetrics, MetricsThresholds};
use matching::queue::QueueWorker;
use matching::rate_limiter::{RateLimiter, RateLimiterConfig};
use matching::state::AppState;
use matching::store::{
    BlockStore, HistoryStore, MatchStore, MemoryStore, PostgresStore, ProfileStore, QueueStore,
};
use matching::routes;

struct Stores {
    profiles: Arc<dyn ProfileStore>,
    matches: Arc<dyn MatchStore>,
    history: Arc<dyn HistoryStore>,
    blocks: Arc<dyn BlockStore>,
    queue: Arc<dyn QueueStore>,
}

async fn init_stores() -> Result<Stores> {
    match MatchingConfig::store_backend() {
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(common::error::DatabaseError::Migration)?;

            let store = Arc::new(PostgresStore::new(pool));
            Ok(Stores {
                profiles: store.clone(),
                matches: store.clone(),
                history: store.clone(),
                blocks: store.clone(),
                queue: store,
            })
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store backend; all state is volatile");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                profiles: store.clone(),
                matches: store.clone(),
                history: store.clone(),
                blocks: store.clone(),
                queue: store,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting matching service");

    let matching_config = MatchingConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let cache_config = CacheConfig::from_env();

    let stores = init_stores().await?;

    // Optional shared Redis tier behind the in-process profile cache
    let redis = if cache_config.l2_enabled {
        let redis_config = RedisConfig::from_env()?;
        let pool = RedisPool::new(&redis_config).await?;
        if pool.health_check().await? {
            info!("Redis connection successful");
        } else {
            anyhow::bail!("Failed to connect to Redis");
        }
        Some(pool)
    } else {
        None
    };
    let cache = ProfileCache::new(&cache_config, redis);

    let metrics = MatchMetrics::new();
    let thresholds = MetricsThresholds::from_env();

    let finder = Arc::new(MatchFinder::new(
        stores.profiles.clone(),
        stores.matches.clone(),
        stores.history.clone(),
        stores.blocks.clone(),
        cache.clone(),
        metrics.clone(),
        matching_config.clone(),
    ));
    let match_lifecycle = Arc::new(MatchLifecycle::new(
        stores.profiles.clone(),
        stores.matches.clone(),
        stores.history.clone(),
        cache,
        matching_config,
    ));

    info!("Matching service initialized successfully");

    // Queue workers absorb bursty load without serializing retrieval
    let worker = Arc::new(QueueWorker::new(
        stores.queue.clone(),
        finder.clone(),
        match_lifecycle.clone(),
        queue_config.clone(),
    ));
    for worker_id in 0..queue_config.workers {
        tokio::spawn(worker.clone().run(worker_id));
    }

    start_scheduler(metrics.clone(), thresholds, match_lifecycle.clone()).await?;

    let app_state = AppState {
        finder,
        lifecycle: match_lifecycle,
        queue: stores.queue,
        metrics,
        rate_limiter: RateLimiter::new(RateLimiterConfig::default()),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let bind_addr = env::var("MATCHING_BIND").unwrap_or_else(|_| "0.0.0.0:3002".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Matching service listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic jobs: metrics reporting and the presentation expiry sweep
async fn start_scheduler(
    metrics: MatchMetrics,
    thresholds: MetricsThresholds,
    match_lifecycle: Arc<MatchLifecycle>,
) -> Result<()> {
    let scheduler = JobScheduler::new().await?;

    let report_schedule =
        env::var("METRICS_REPORT_SCHEDULE").unwrap_or_else(|_| "0 * * * * *".to_string());
    let report_job = Job::new_async(report_schedule.as_str(), move |_, _| {
        let metrics = metrics.clone();
        let thresholds = thresholds.clone();
        Box::pin(async move {
            metrics.report(&thresholds).await;
        })
    })?;
    scheduler.add(report_job).await?;

    let sweep_schedule =
        env::var("MATCH_EXPIRY_SCHEDULE").unwrap_or_else(|_| "0 */5 * * * *".to_string());
    let sweep_job = Job::new_async(sweep_schedule.as_str(), move |_, _| {
        let match_lifecycle = match_lifecycle.clone();
        Box::pin(async move {
            if let Err(e) = match_lifecycle.sweep_expired().await {
                error!("Presentation expiry sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(sweep_job).await?;

    scheduler.start().await?;
    info!(
        "Started schedulers (metrics: {}, expiry sweep: {})",
        report_schedule, sweep_schedule
    );
    Ok(())
}
