//! Candidate retrieval, ranking, and presentation
//!
//! The finder pulls a bounded set of plausible candidates from the
//! spatial index, keeps the ones that satisfy preferences in both
//! directions, scores the survivors, and hands the best unseen one to
//! the lifecycle state machine as a `presented` record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ProfileCache;
use crate::config::MatchingConfig;
use crate::error::{MatchError, MatchResult};
use crate::matcher;
use crate::metrics::{MatchMetrics, MatchOutcome, QueryPath};
use crate::models::api::{RetrievalStats, ScoreEntry};
use crate::models::{Candidate, HistoryAction, HistoryEntry, MatchRecord, MatchState, Profile};
use crate::scoring;
use crate::store::{BlockStore, CandidateQuery, HistoryStore, MatchStore, ProfileStore};

/// Finds and presents the next match for a requester
pub struct MatchFinder {
    profiles: Arc<dyn ProfileStore>,
    matches: Arc<dyn MatchStore>,
    history: Arc<dyn HistoryStore>,
    blocks: Arc<dyn BlockStore>,
    cache: ProfileCache,
    metrics: MatchMetrics,
    config: MatchingConfig,
}

struct RankedCandidate {
    profile: Profile,
    distance_miles: f64,
    compatibility: i32,
}

impl MatchFinder {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        matches: Arc<dyn MatchStore>,
        history: Arc<dyn HistoryStore>,
        blocks: Arc<dyn BlockStore>,
        cache: ProfileCache,
        metrics: MatchMetrics,
        config: MatchingConfig,
    ) -> Self {
        Self {
            profiles,
            matches,
            history,
            blocks,
            cache,
            metrics,
            config,
        }
    }

    /// Find, score, and present the next match for a requester.
    ///
    /// Returns no candidate when the pool is empty or the requester is
    /// out of circulation; both are normal outcomes.
    pub async fn find_next(
        &self,
        requester_id: Uuid,
    ) -> MatchResult<(Option<Candidate>, RetrievalStats)> {
        let started = Instant::now();
        let mut stats = RetrievalStats::default();

        // Lifecycle decisions always start from a fresh profile read
        let requester = self
            .profiles
            .get(requester_id)
            .await?
            .ok_or(MatchError::ProfileNotFound(requester_id))?;

        if !requester.visible || requester.active_match.is_some() {
            debug!("Requester {} is not in the matching pool", requester_id);
            return Ok((None, stats));
        }

        // An undecided presentation is simply presented again; a new
        // candidate would violate per-requester presentation ordering.
        // A candidate who left the pool in the meantime is skipped and
        // left to the expiry sweep.
        if let Some(unresolved) = self.matches.unresolved_for(requester_id).await? {
            if let Some(profile) = self.profiles.get(unresolved.candidate_id).await? {
                if profile.visible && profile.active_match.is_none() {
                    debug!(
                        "Re-presenting unresolved candidate {} to {}",
                        unresolved.candidate_id, requester_id
                    );
                    return Ok((Some(candidate_view(&profile, &unresolved)), stats));
                }
            }
        }

        let seen = self.history.seen_partners(requester_id).await?;

        let (pool, path) = self.retrieve(&requester, &seen, &mut stats).await?;

        let mut ranked = Vec::new();
        for profile in pool {
            if self.blocks.is_blocked(requester_id, profile.user_id).await? {
                continue;
            }

            // Both directions must hold before a pair is eligible
            let distance = match matcher::evaluate(&profile, &requester.preferences, &requester) {
                Ok(distance) => distance,
                Err(reason) => {
                    debug!("Candidate {} rejected: {}", profile.user_id, reason.as_str());
                    continue;
                }
            };
            if let Err(reason) = matcher::evaluate(&requester, &profile.preferences, &profile) {
                debug!(
                    "Requester does not fit candidate {}: {}",
                    profile.user_id,
                    reason.as_str()
                );
                continue;
            }

            let compatibility = scoring::compatibility(&requester, &profile);
            // Warm the cache for subsequent batch scoring of this pool
            self.cache.fill(profile.clone()).await;
            ranked.push(RankedCandidate {
                profile,
                distance_miles: distance,
                compatibility,
            });
        }

        stats.eligible = ranked.len();
        ranked.sort_by(|a, b| b.compatibility.cmp(&a.compatibility));

        for candidate in ranked {
            let record = MatchRecord {
                user_id: requester_id,
                candidate_id: candidate.profile.user_id,
                state: MatchState::Presented,
                compatibility: candidate.compatibility,
                distance_miles: candidate.distance_miles,
                presented_at: Utc::now(),
                decided_at: None,
            };

            // A concurrent request for the same requester may have won
            // the presentation slot; hand back whatever it presented.
            if !self.matches.insert_presented(&record).await? {
                if let Some(winner) = self.matches.unresolved_for(requester_id).await? {
                    if let Some(profile) = self.profiles.get(winner.candidate_id).await? {
                        return Ok((Some(candidate_view(&profile, &winner)), stats));
                    }
                }
                continue;
            }

            self.history
                .append(&HistoryEntry {
                    user_id: requester_id,
                    other_id: record.candidate_id,
                    action: HistoryAction::Presented,
                    recorded_at: record.presented_at,
                })
                .await?;

            info!(
                "Presented {} to {} ({}% compatible, {} mi)",
                record.candidate_id, requester_id, record.compatibility, record.distance_miles
            );
            self.metrics
                .record_attempt(
                    started.elapsed().as_millis() as u64,
                    stats.scanned,
                    MatchOutcome::Matched,
                    path,
                )
                .await;
            return Ok((Some(candidate_view(&candidate.profile, &record)), stats));
        }

        self.metrics
            .record_attempt(
                started.elapsed().as_millis() as u64,
                stats.scanned,
                MatchOutcome::NoMatch,
                path,
            )
            .await;
        Ok((None, stats))
    }

    /// Pull candidate pages until the accumulation cap, widening to a
    /// full scan when the location prefix is too sparse
    async fn retrieve(
        &self,
        requester: &Profile,
        seen: &HashSet<Uuid>,
        stats: &mut RetrievalStats,
    ) -> MatchResult<(Vec<Profile>, QueryPath)> {
        let active_since = Utc::now() - Duration::days(self.config.active_window_days);
        let prefix = requester.location_code.as_ref().map(|code| {
            let precision = self.config.geohash_precision.min(code.len());
            code[..precision].to_string()
        });

        let base_query = CandidateQuery {
            exclude: requester.user_id,
            gender: requester.preferences.interested_in.target_gender(),
            location_prefix: prefix.clone(),
            active_since,
            page_size: self.config.page_size,
        };

        if prefix.is_some() {
            let pool = self.collect(&base_query, seen, stats).await?;
            if pool.len() >= self.config.sparse_threshold {
                return Ok((pool, QueryPath::Prefix));
            }
            // Known degradation path: too few nearby candidates, widen
            // to the whole population under the same cap
            warn!(
                "Sparse location prefix for {} ({} candidates); widening to full scan",
                requester.user_id,
                pool.len()
            );
        }

        let scan_query = CandidateQuery {
            location_prefix: None,
            ..base_query
        };
        let pool = self.collect(&scan_query, seen, stats).await?;
        stats.full_scan = true;
        Ok((pool, QueryPath::FullScan))
    }

    async fn collect(
        &self,
        query: &CandidateQuery,
        seen: &HashSet<Uuid>,
        stats: &mut RetrievalStats,
    ) -> MatchResult<Vec<Profile>> {
        let mut pool = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.profiles.candidates(query, token.as_deref()).await?;
            if page.profiles.is_empty() {
                break;
            }
            stats.scanned += page.profiles.len();
            pool.extend(
                page.profiles
                    .into_iter()
                    .filter(|p| !seen.contains(&p.user_id)),
            );

            if pool.len() >= self.config.max_candidates {
                pool.truncate(self.config.max_candidates);
                break;
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(pool)
    }

    /// Score a batch of known candidates against one requester.
    ///
    /// Unknown candidate ids are omitted from the result rather than
    /// failing the batch. Served from the profile cache where possible.
    pub async fn score_batch(
        &self,
        requester_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> MatchResult<Vec<ScoreEntry>> {
        let requester = self
            .profiles
            .get(requester_id)
            .await?
            .ok_or(MatchError::ProfileNotFound(requester_id))?;

        let mut entries = Vec::with_capacity(candidate_ids.len());
        for &candidate_id in candidate_ids {
            let Some(profile) = self.cached_profile(candidate_id).await? else {
                debug!("Skipping unknown candidate {} in score batch", candidate_id);
                continue;
            };
            entries.push(ScoreEntry {
                candidate_id,
                score: scoring::compatibility(&requester, &profile),
            });
        }
        Ok(entries)
    }

    async fn cached_profile(&self, user_id: Uuid) -> MatchResult<Option<Profile>> {
        if let Some(profile) = self.cache.get(user_id).await {
            self.metrics.record_cache_hit().await;
            return Ok(Some(profile));
        }
        self.metrics.record_cache_miss().await;

        let Some(profile) = self.profiles.get(user_id).await? else {
            return Ok(None);
        };
        self.cache.fill(profile.clone()).await;
        Ok(Some(profile))
    }
}

fn candidate_view(profile: &Profile, record: &MatchRecord) -> Candidate {
    Candidate {
        user_id: profile.user_id,
        display_name: profile.display_name.clone(),
        gender: profile.gender,
        age: profile.age,
        interests: profile.interests.clone(),
        distance_miles: record.distance_miles,
        compatibility: record.compatibility,
    }
}
