//! Match lifecycle state machine
//!
//! Owns the directional record transitions and the one irreversible
//! pair transition: both sides accepted, the pair turns mutual, both
//! profiles leave the pool. All reads here go straight to the store;
//! cached profile state is never trusted for a lifecycle decision.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::ProfileCache;
use crate::config::MatchingConfig;
use crate::error::{MatchError, MatchResult};
use crate::models::api::StatusResponse;
use crate::models::{HistoryAction, HistoryEntry, MatchState};
use crate::store::{HistoryStore, MatchStore, ProfileStore, TransitionOutcome};

/// Drives accept/pass decisions and the mutual-match transition
pub struct MatchLifecycle {
    profiles: Arc<dyn ProfileStore>,
    matches: Arc<dyn MatchStore>,
    history: Arc<dyn HistoryStore>,
    cache: ProfileCache,
    config: MatchingConfig,
}

impl MatchLifecycle {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        matches: Arc<dyn MatchStore>,
        history: Arc<dyn HistoryStore>,
        cache: ProfileCache,
        config: MatchingConfig,
    ) -> Self {
        Self {
            profiles,
            matches,
            history,
            cache,
            config,
        }
    }

    async fn record_history(&self, user_id: Uuid, other_id: Uuid, action: HistoryAction) -> MatchResult<()> {
        self.history
            .append(&HistoryEntry {
                user_id,
                other_id,
                action,
                recorded_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Accept a presented candidate.
    ///
    /// Returns whether the pair is now mutual. Repeating an accept on
    /// an already-accepted or already-mutual pair reports the current
    /// state; accepting a pair that was never presented, or was passed,
    /// is an invalid-state error.
    pub async fn accept(&self, requester_id: Uuid, candidate_id: Uuid) -> MatchResult<bool> {
        let record = self.matches.get(requester_id, candidate_id).await?;
        let Some(record) = record else {
            return Err(MatchError::InvalidState {
                action: "accept",
                state: "none",
            });
        };

        match record.state {
            MatchState::Presented => {
                match self
                    .matches
                    .transition(
                        requester_id,
                        candidate_id,
                        MatchState::Presented,
                        MatchState::Accepted,
                    )
                    .await?
                {
                    TransitionOutcome::Applied => {
                        self.record_history(requester_id, candidate_id, HistoryAction::Accepted)
                            .await?;
                        info!("{} accepted {}", requester_id, candidate_id);
                    }
                    TransitionOutcome::WrongState(MatchState::Passed) => {
                        return Err(MatchError::InvalidState {
                            action: "accept",
                            state: MatchState::Passed.as_str(),
                        });
                    }
                    // A concurrent identical accept got there first;
                    // treat this one as the idempotent retry it is
                    TransitionOutcome::WrongState(_) => {}
                    TransitionOutcome::NotFound => {
                        return Err(MatchError::InvalidState {
                            action: "accept",
                            state: "none",
                        });
                    }
                }
            }
            MatchState::Accepted => {
                debug!("Repeated accept from {} for {}", requester_id, candidate_id);
            }
            MatchState::Mutual => return Ok(true),
            MatchState::Passed => {
                return Err(MatchError::InvalidState {
                    action: "accept",
                    state: MatchState::Passed.as_str(),
                });
            }
        }

        let reverse = self.matches.get(candidate_id, requester_id).await?;
        match reverse.map(|r| r.state) {
            Some(MatchState::Accepted) => {
                // Both sides accepted: the conditional pair flip decides
                // the race, then the visibility writes run as an
                // idempotent retry-safe sequence on either outcome.
                let won = self.matches.mark_mutual(requester_id, candidate_id).await?;
                self.finalize_mutual(requester_id, candidate_id).await?;
                if won {
                    info!(
                        "Mutual match created between {} and {}",
                        requester_id, candidate_id
                    );
                } else {
                    debug!(
                        "Mutual match between {} and {} already processed",
                        requester_id, candidate_id
                    );
                }
                Ok(true)
            }
            Some(MatchState::Mutual) => {
                // Pair already mutual; make sure both visibility flips
                // landed before reporting it
                self.finalize_mutual(requester_id, candidate_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Hide both profiles and bind them together. Every write in here
    /// is conditional and idempotent, so crashed or racing callers can
    /// simply run it again.
    async fn finalize_mutual(&self, a: Uuid, b: Uuid) -> MatchResult<()> {
        self.profiles.hide_matched(a, b).await?;
        self.profiles.hide_matched(b, a).await?;
        self.cache.invalidate(a).await;
        self.cache.invalidate(b).await;
        Ok(())
    }

    /// Pass on a presented candidate, permanently retiring the pair in
    /// this direction. Repeating a pass is an idempotent ack.
    pub async fn pass(&self, requester_id: Uuid, candidate_id: Uuid) -> MatchResult<()> {
        let record = self.matches.get(requester_id, candidate_id).await?;
        let Some(record) = record else {
            return Err(MatchError::InvalidState {
                action: "pass",
                state: "none",
            });
        };

        match record.state {
            MatchState::Presented => {
                match self
                    .matches
                    .transition(
                        requester_id,
                        candidate_id,
                        MatchState::Presented,
                        MatchState::Passed,
                    )
                    .await?
                {
                    TransitionOutcome::Applied => {
                        self.record_history(requester_id, candidate_id, HistoryAction::Passed)
                            .await?;
                        info!("{} passed on {}", requester_id, candidate_id);
                        Ok(())
                    }
                    TransitionOutcome::WrongState(MatchState::Passed) => Ok(()),
                    TransitionOutcome::WrongState(state) => Err(MatchError::InvalidState {
                        action: "pass",
                        state: state.as_str(),
                    }),
                    TransitionOutcome::NotFound => Err(MatchError::InvalidState {
                        action: "pass",
                        state: "none",
                    }),
                }
            }
            MatchState::Passed => Ok(()),
            state => Err(MatchError::InvalidState {
                action: "pass",
                state: state.as_str(),
            }),
        }
    }

    /// End an active mutual match: both users return to the pool and
    /// can never be presented to each other again.
    ///
    /// The mutual match records themselves stay as they are; the
    /// permanent exclusion lives in the history.
    pub async fn unmatch(&self, requester_id: Uuid) -> MatchResult<()> {
        let profile = self
            .profiles
            .get(requester_id)
            .await?
            .ok_or(MatchError::ProfileNotFound(requester_id))?;

        let Some(partner_id) = profile.active_match else {
            return Err(MatchError::InvalidState {
                action: "unmatch",
                state: "no_active_match",
            });
        };

        self.record_history(requester_id, partner_id, HistoryAction::Unmatched)
            .await?;
        self.record_history(partner_id, requester_id, HistoryAction::Unmatched)
            .await?;

        self.profiles.restore_visibility(requester_id).await?;
        self.profiles.restore_visibility(partner_id).await?;
        self.cache.invalidate(requester_id).await;
        self.cache.invalidate(partner_id).await;

        info!(
            "{} unmatched from {}; both are visible again",
            requester_id, partner_id
        );
        Ok(())
    }

    /// A user's current visibility and active match, from a fresh read
    pub async fn status(&self, requester_id: Uuid) -> MatchResult<StatusResponse> {
        let profile = self
            .profiles
            .get(requester_id)
            .await?
            .ok_or(MatchError::ProfileNotFound(requester_id))?;

        Ok(StatusResponse {
            visible: profile.visible,
            active_match: profile.active_match,
        })
    }

    /// Number of profiles currently visible in the pool
    pub async fn pool_stats(&self) -> MatchResult<i64> {
        Ok(self.profiles.count_visible().await?)
    }

    /// Auto-pass presentations older than the configured expiration so
    /// a stale match never pins a requester. Returns how many were
    /// retired.
    pub async fn sweep_expired(&self) -> MatchResult<usize> {
        let cutoff = Utc::now() - Duration::hours(self.config.presentation_ttl_hours);
        let expired = self.matches.presented_before(cutoff).await?;

        let mut swept = 0;
        for record in expired {
            match self
                .matches
                .transition(
                    record.user_id,
                    record.candidate_id,
                    MatchState::Presented,
                    MatchState::Passed,
                )
                .await?
            {
                TransitionOutcome::Applied => {
                    self.record_history(
                        record.user_id,
                        record.candidate_id,
                        HistoryAction::AutoPassed,
                    )
                    .await?;
                    swept += 1;
                }
                // Decided while the sweep was running
                _ => {}
            }
        }

        if swept > 0 {
            info!("Auto-passed {} expired presentations", swept);
        }
        Ok(swept)
    }
}
