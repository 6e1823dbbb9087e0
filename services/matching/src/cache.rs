//! Bounded, time-limited profile cache
//!
//! Two tiers: a small in-process map with per-entry TTL and
//! least-recently-used eviction, and an optional shared Redis tier
//! behind it. Retrieval tolerates slightly stale entries; lifecycle
//! transitions never read through this cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::cache::RedisPool;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::models::Profile;

struct CacheEntry {
    profile: Profile,
    expires_at: Instant,
    /// Monotone use counter; the smallest value is the eviction victim
    last_used: u64,
}

struct L1 {
    entries: HashMap<Uuid, CacheEntry>,
    clock: u64,
}

/// Profile cache shared across handlers and queue workers
#[derive(Clone)]
pub struct ProfileCache {
    l1: Arc<Mutex<L1>>,
    capacity: usize,
    ttl: Duration,
    l2: Option<RedisPool>,
    l2_ttl_secs: u64,
}

impl ProfileCache {
    pub fn new(config: &CacheConfig, redis: Option<RedisPool>) -> Self {
        Self {
            l1: Arc::new(Mutex::new(L1 {
                entries: HashMap::new(),
                clock: 0,
            })),
            capacity: config.l1_capacity.max(1),
            ttl: Duration::from_secs(config.l1_ttl_secs),
            l2: redis.filter(|_| config.l2_enabled),
            l2_ttl_secs: config.l2_ttl_secs,
        }
    }

    fn redis_key(user_id: Uuid) -> String {
        format!("profile:{user_id}")
    }

    /// Look up a profile, filling L1 from L2 on the way
    pub async fn get(&self, user_id: Uuid) -> Option<Profile> {
        {
            let mut l1 = self.l1.lock().await;
            l1.clock += 1;
            let clock = l1.clock;
            match l1.entries.get_mut(&user_id) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    entry.last_used = clock;
                    return Some(entry.profile.clone());
                }
                Some(_) => {
                    l1.entries.remove(&user_id);
                }
                None => {}
            }
        }

        let redis = self.l2.as_ref()?;
        match redis.get(&Self::redis_key(user_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Profile>(&raw) {
                Ok(profile) => {
                    self.fill_l1(profile.clone()).await;
                    Some(profile)
                }
                Err(e) => {
                    warn!("Discarding undecodable cached profile {}: {}", user_id, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // Cache degradation must never fail the matching path
                warn!("Redis cache read failed for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Store a freshly fetched profile in both tiers
    pub async fn fill(&self, profile: Profile) {
        if let Some(redis) = &self.l2 {
            match serde_json::to_string(&profile) {
                Ok(raw) => {
                    if let Err(e) = redis
                        .set(
                            &Self::redis_key(profile.user_id),
                            &raw,
                            Some(self.l2_ttl_secs),
                        )
                        .await
                    {
                        warn!("Redis cache write failed for {}: {}", profile.user_id, e);
                    }
                }
                Err(e) => warn!("Could not serialize profile {}: {}", profile.user_id, e),
            }
        }
        self.fill_l1(profile).await;
    }

    async fn fill_l1(&self, profile: Profile) {
        let mut l1 = self.l1.lock().await;
        l1.clock += 1;
        let clock = l1.clock;

        if l1.entries.len() >= self.capacity && !l1.entries.contains_key(&profile.user_id) {
            if let Some(victim) = l1
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id)
            {
                l1.entries.remove(&victim);
            }
        }

        l1.entries.insert(
            profile.user_id,
            CacheEntry {
                profile,
                expires_at: Instant::now() + self.ttl,
                last_used: clock,
            },
        );
    }

    /// Drop a user from both tiers, forcing the next read to the store
    pub async fn invalidate(&self, user_id: Uuid) {
        self.l1.lock().await.entries.remove(&user_id);
        if let Some(redis) = &self.l2 {
            if let Err(e) = redis.delete(&Self::redis_key(user_id)).await {
                warn!("Redis cache delete failed for {}: {}", user_id, e);
            }
        }
    }
}
