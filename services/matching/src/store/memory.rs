//! In-memory storage backend
//!
//! Backs tests and local development runs. A single async mutex guards
//! all collections, which also gives the mutual-match flip the same
//! atomicity the PostgreSQL backend gets from a transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    HistoryEntry, MatchRecord, MatchState, Profile, QueueAction, QueueMessage,
};

use super::{
    BlockStore, CandidatePage, CandidateQuery, HistoryStore, MatchStore, PageToken, ProfileStore,
    QueueStore, StoreResult, TransitionOutcome,
};

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: Uuid,
    requester_id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    enqueued_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct DeadLetter {
    message: QueueMessage,
    error: String,
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<Uuid, Profile>,
    matches: HashMap<(Uuid, Uuid), MatchRecord>,
    history: Vec<HistoryEntry>,
    blocks: HashSet<(Uuid, Uuid)>,
    queue: Vec<QueuedMessage>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory implementation of every storage trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile
    pub async fn insert_profile(&self, profile: Profile) {
        let mut inner = self.inner.lock().await;
        inner.profiles.insert(profile.user_id, profile);
    }

    /// Snapshot of a profile, for assertions
    pub async fn profile(&self, user_id: Uuid) -> Option<Profile> {
        self.inner.lock().await.profiles.get(&user_id).cloned()
    }

    /// Seed a match record directly, bypassing the state machine
    pub async fn insert_record(&self, record: MatchRecord) {
        let mut inner = self.inner.lock().await;
        inner
            .matches
            .insert((record.user_id, record.candidate_id), record);
    }

    /// Seed a directional block
    pub async fn add_block(&self, blocker_id: Uuid, blocked_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.blocks.insert((blocker_id, blocked_id));
    }

    /// Enqueue an arbitrary payload, valid or not
    pub async fn enqueue_raw(&self, requester_id: Uuid, payload: serde_json::Value) -> Uuid {
        let mut inner = self.inner.lock().await;
        let message_id = Uuid::new_v4();
        let now = Utc::now();
        inner.queue.push(QueuedMessage {
            message_id,
            requester_id,
            payload,
            attempts: 0,
            enqueued_at: now,
            visible_at: now,
        });
        message_id
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Dead-lettered messages with the errors that retired them
    pub async fn dead_letters(&self) -> Vec<(QueueMessage, String)> {
        self.inner
            .lock()
            .await
            .dead_letters
            .iter()
            .map(|d| (d.message.clone(), d.error.clone()))
            .collect()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.inner.lock().await.profiles.get(&user_id).cloned())
    }

    async fn candidates(
        &self,
        query: &CandidateQuery,
        token: Option<&str>,
    ) -> StoreResult<CandidatePage> {
        let cursor = token.map(PageToken::decode).transpose()?;
        let inner = self.inner.lock().await;

        let mut rows: Vec<&Profile> = inner
            .profiles
            .values()
            .filter(|p| {
                p.user_id != query.exclude
                    && p.visible
                    && p.active_match.is_none()
                    && p.last_active >= query.active_since
                    && query.gender.is_none_or(|g| p.gender == g)
                    && query.location_prefix.as_ref().is_none_or(|prefix| {
                        p.location_code
                            .as_ref()
                            .is_some_and(|code| code.starts_with(prefix))
                    })
            })
            .collect();

        rows.sort_by(|a, b| {
            (b.last_active, b.user_id).cmp(&(a.last_active, a.user_id))
        });

        let page: Vec<Profile> = rows
            .into_iter()
            .filter(|p| {
                cursor.is_none_or(|c| (p.last_active, p.user_id) < (c.last_active, c.user_id))
            })
            .take(query.page_size.max(0) as usize)
            .cloned()
            .collect();

        let next = if page.len() == query.page_size as usize {
            page.last().map(|p| {
                PageToken {
                    last_active: p.last_active,
                    user_id: p.user_id,
                }
                .encode()
            })
        } else {
            None
        };

        Ok(CandidatePage {
            profiles: page,
            next,
        })
    }

    async fn hide_matched(&self, user_id: Uuid, partner_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(profile) = inner.profiles.get_mut(&user_id) else {
            return Ok(false);
        };
        match profile.active_match {
            None => {
                profile.visible = false;
                profile.active_match = Some(partner_id);
                Ok(true)
            }
            Some(existing) if existing == partner_id => {
                profile.visible = false;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn restore_visibility(&self, user_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(profile) = inner.profiles.get_mut(&user_id) {
            profile.visible = true;
            profile.active_match = None;
        }
        Ok(())
    }

    async fn count_visible(&self) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner.profiles.values().filter(|p| p.visible).count() as i64)
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn get(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .matches
            .get(&(user_id, candidate_id))
            .cloned())
    }

    async fn unresolved_for(&self, user_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .matches
            .values()
            .filter(|r| r.user_id == user_id && r.state == MatchState::Presented)
            .max_by_key(|r| r.presented_at)
            .cloned())
    }

    async fn insert_presented(&self, record: &MatchRecord) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let key = (record.user_id, record.candidate_id);
        if inner.matches.contains_key(&key) {
            return Ok(false);
        }
        // One undecided presentation per requester at a time
        let has_unresolved = inner
            .matches
            .values()
            .any(|r| r.user_id == record.user_id && r.state == MatchState::Presented);
        if has_unresolved {
            return Ok(false);
        }
        inner.matches.insert(key, record.clone());
        Ok(true)
    }

    async fn transition(
        &self,
        user_id: Uuid,
        candidate_id: Uuid,
        from: MatchState,
        to: MatchState,
    ) -> StoreResult<TransitionOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.matches.get_mut(&(user_id, candidate_id)) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if record.state != from {
            return Ok(TransitionOutcome::WrongState(record.state));
        }
        record.state = to;
        record.decided_at = Some(Utc::now());
        Ok(TransitionOutcome::Applied)
    }

    async fn mark_mutual(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let forward = inner
            .matches
            .get(&(user_id, candidate_id))
            .map(|r| r.state);
        let reverse = inner
            .matches
            .get(&(candidate_id, user_id))
            .map(|r| r.state);

        if forward != Some(MatchState::Accepted) || reverse != Some(MatchState::Accepted) {
            return Ok(false);
        }

        let now = Utc::now();
        for key in [(user_id, candidate_id), (candidate_id, user_id)] {
            if let Some(record) = inner.matches.get_mut(&key) {
                record.state = MatchState::Mutual;
                record.decided_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn presented_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .matches
            .values()
            .filter(|r| r.state == MatchState::Presented && r.presented_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: &HistoryEntry) -> StoreResult<()> {
        self.inner.lock().await.history.push(entry.clone());
        Ok(())
    }

    async fn seen_partners(&self, user_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.other_id)
            .collect())
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.blocks.contains(&(a, b)) || inner.blocks.contains(&(b, a)))
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, requester_id: Uuid, action: &QueueAction) -> StoreResult<Uuid> {
        let payload = serde_json::to_value(action)
            .map_err(|e| super::StoreError::Corrupt(e.to_string()))?;
        Ok(self.enqueue_raw(requester_id, payload).await)
    }

    async fn receive(
        &self,
        batch_size: i64,
        visibility: Duration,
    ) -> StoreResult<Vec<QueueMessage>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let invisible_until = now
            + chrono::Duration::from_std(visibility)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut due: Vec<&mut QueuedMessage> = inner
            .queue
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .collect();
        due.sort_by_key(|m| m.enqueued_at);

        let mut claimed = Vec::new();
        for message in due.into_iter().take(batch_size.max(0) as usize) {
            message.visible_at = invisible_until;
            message.attempts += 1;
            claimed.push(QueueMessage {
                message_id: message.message_id,
                requester_id: message.requester_id,
                payload: message.payload.clone(),
                attempts: message.attempts,
                enqueued_at: message.enqueued_at,
            });
        }
        Ok(claimed)
    }

    async fn ack(&self, message_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.retain(|m| m.message_id != message_id);
        Ok(())
    }

    async fn release(&self, message_id: Uuid, delay: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let visible_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(message) = inner.queue.iter_mut().find(|m| m.message_id == message_id) {
            message.visible_at = visible_at;
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, error: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.retain(|m| m.message_id != message.message_id);
        inner.dead_letters.push(DeadLetter {
            message: message.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    async fn dead_letter_count(&self) -> StoreResult<i64> {
        Ok(self.inner.lock().await.dead_letters.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterestedIn;
    use crate::models::Preferences;

    fn test_profile(last_active: DateTime<Utc>) -> Profile {
        Profile {
            user_id: Uuid::new_v4(),
            display_name: "test".to_string(),
            gender: crate::models::Gender::Female,
            age: 30,
            coordinates: None,
            location_code: Some("dr5r".to_string()),
            drinking: None,
            smoking: None,
            exercise: None,
            children: None,
            religion: None,
            looking_for: None,
            interests: Vec::new(),
            visible: true,
            active_match: None,
            last_active,
            preferences: Preferences {
                interested_in: InterestedIn::Everyone,
                ..Preferences::default()
            },
        }
    }

    #[tokio::test]
    async fn test_candidate_pagination_resumes_without_overlap() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut p = test_profile(base - chrono::Duration::minutes(i));
            p.display_name = format!("user-{i}");
            store.insert_profile(p).await;
        }

        let query = CandidateQuery {
            exclude: Uuid::new_v4(),
            gender: None,
            location_prefix: None,
            active_since: base - chrono::Duration::days(1),
            page_size: 2,
        };

        let mut seen = HashSet::new();
        let mut token: Option<String> = None;
        loop {
            let page = store
                .candidates(&query, token.as_deref())
                .await
                .expect("candidates should succeed");
            for p in &page.profiles {
                assert!(seen.insert(p.user_id), "page overlap on {}", p.user_id);
            }
            match page.next {
                Some(next) if !page.profiles.is_empty() => token = Some(next),
                _ => break,
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_receive_hides_messages_until_visibility_expires() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        QueueStore::enqueue(&store, requester, &QueueAction::FindNextMatch)
            .await
            .expect("enqueue should succeed");

        let first = store
            .receive(10, Duration::from_secs(30))
            .await
            .expect("receive should succeed");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempts, 1);

        // Claimed message is invisible to a second receive
        let second = store
            .receive(10, Duration::from_secs(30))
            .await
            .expect("receive should succeed");
        assert!(second.is_empty());

        // Released with no delay, it becomes claimable again
        store
            .release(first[0].message_id, Duration::ZERO)
            .await
            .expect("release should succeed");
        let third = store
            .receive(10, Duration::from_secs(30))
            .await
            .expect("receive should succeed");
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_ack_and_dead_letter_remove_from_queue() {
        let store = MemoryStore::new();
        let requester = Uuid::new_v4();
        QueueStore::enqueue(&store, requester, &QueueAction::FindNextMatch)
            .await
            .expect("enqueue should succeed");
        QueueStore::enqueue(&store, requester, &QueueAction::FindNextMatch)
            .await
            .expect("enqueue should succeed");

        let batch = store
            .receive(10, Duration::from_secs(30))
            .await
            .expect("receive should succeed");
        assert_eq!(batch.len(), 2);

        store.ack(batch[0].message_id).await.expect("ack");
        store
            .dead_letter(&batch[1], "boom")
            .await
            .expect("dead letter");

        assert_eq!(store.queue_len().await, 0);
        assert_eq!(store.dead_letter_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_mark_mutual_requires_both_accepted() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let record = |user_id, candidate_id, state| MatchRecord {
            user_id,
            candidate_id,
            state,
            compatibility: 70,
            distance_miles: 5.0,
            presented_at: Utc::now(),
            decided_at: None,
        };

        store
            .insert_record(record(a, b, MatchState::Accepted))
            .await;
        store
            .insert_record(record(b, a, MatchState::Presented))
            .await;
        assert!(!store.mark_mutual(a, b).await.expect("mark_mutual"));

        store
            .insert_record(record(b, a, MatchState::Accepted))
            .await;
        assert!(store.mark_mutual(a, b).await.expect("mark_mutual"));

        // Second attempt finds the pair already mutual
        assert!(!store.mark_mutual(a, b).await.expect("mark_mutual"));
    }
}
