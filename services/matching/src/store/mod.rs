//! Injectable storage interfaces for the matching engine
//!
//! Each logical collection (profiles, match records, history, blocks,
//! queue) has its own trait with a PostgreSQL implementation for
//! production and an in-memory implementation for tests and local runs.
//! The backend is selected by configuration at wiring time; business
//! logic only ever sees the traits.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Gender, HistoryEntry, MatchRecord, MatchState, Profile, QueueAction, QueueMessage,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Errors surfaced by the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store is unreachable or failed mid-operation;
    /// retryable with backoff
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    /// A persisted record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A continuation token could not be decoded
    #[error("invalid continuation token")]
    BadToken,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err)
    }
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Keyset cursor for candidate pagination, serialized as an opaque
/// base64 token
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageToken {
    pub last_active: DateTime<Utc>,
    pub user_id: Uuid,
}

impl PageToken {
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.last_active.timestamp_millis(), self.user_id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> StoreResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| StoreError::BadToken)?;
        let raw = String::from_utf8(raw).map_err(|_| StoreError::BadToken)?;
        let (millis, id) = raw.split_once(':').ok_or(StoreError::BadToken)?;
        let millis: i64 = millis.parse().map_err(|_| StoreError::BadToken)?;
        let last_active =
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or(StoreError::BadToken)?;
        let user_id = id.parse().map_err(|_| StoreError::BadToken)?;
        Ok(PageToken {
            last_active,
            user_id,
        })
    }
}

/// Server-side filters for one candidate page
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// The requester, always excluded
    pub exclude: Uuid,
    /// Narrow to one gender when the requester's category allows it
    pub gender: Option<Gender>,
    /// Location-code prefix; `None` means full scan
    pub location_prefix: Option<String>,
    /// Only profiles active after this instant
    pub active_since: DateTime<Utc>,
    pub page_size: i64,
}

/// One page of candidate profiles plus the cursor to resume from
#[derive(Debug)]
pub struct CandidatePage {
    pub profiles: Vec<Profile>,
    pub next: Option<String>,
}

/// Result of a conditional state transition on a match record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionOutcome {
    /// The record moved from the expected state to the target state
    Applied,
    /// The record exists but is in a different state
    WrongState(MatchState),
    /// No record exists for the pair
    NotFound,
}

/// Read access to profiles plus the visibility flips owned by the
/// lifecycle manager
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    /// One page of visible, recently active candidates matching the
    /// query filters, ordered by last activity
    async fn candidates(
        &self,
        query: &CandidateQuery,
        token: Option<&str>,
    ) -> StoreResult<CandidatePage>;

    /// Hide a profile and bind it to its match partner.
    ///
    /// Conditional: only applies when the profile has no active match
    /// or is already bound to the same partner, so concurrent retries
    /// are safe. Returns whether the write applied.
    async fn hide_matched(&self, user_id: Uuid, partner_id: Uuid) -> StoreResult<bool>;

    /// Restore visibility and clear the active match binding
    async fn restore_visibility(&self, user_id: Uuid) -> StoreResult<()>;

    async fn count_visible(&self) -> StoreResult<i64>;
}

/// Directional match records and their state machine transitions
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn get(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<Option<MatchRecord>>;

    /// The requester's not-yet-decided presentation, if any
    async fn unresolved_for(&self, user_id: Uuid) -> StoreResult<Option<MatchRecord>>;

    /// Insert a `presented` record for a pair with no existing record.
    /// Returns false when a record already exists (concurrent present).
    async fn insert_presented(&self, record: &MatchRecord) -> StoreResult<bool>;

    /// Conditionally move a record from `from` to `to`
    async fn transition(
        &self,
        user_id: Uuid,
        candidate_id: Uuid,
        from: MatchState,
        to: MatchState,
    ) -> StoreResult<TransitionOutcome>;

    /// Atomically flip both directional records of a pair from
    /// `accepted` to `mutual`.
    ///
    /// This is the arbiter for racing accepts: exactly one caller
    /// observes true; any later caller finds the records already
    /// mutual and gets false.
    async fn mark_mutual(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<bool>;

    /// Presented records older than the cutoff, for the expiration sweep
    async fn presented_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>>;
}

/// Append-only presentation/decision history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: &HistoryEntry) -> StoreResult<()>;

    /// Every user this requester has already seen in any capacity;
    /// none of them may be presented again
    async fn seen_partners(&self, user_id: Uuid) -> StoreResult<HashSet<Uuid>>;
}

/// Directional block records, read-only for the matching engine
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Whether a block exists in either direction between two users
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> StoreResult<bool>;
}

/// The async match queue with visibility timeout and dead-letter path
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, requester_id: Uuid, action: &QueueAction) -> StoreResult<Uuid>;

    /// Claim up to `batch_size` due messages, making them invisible to
    /// other workers for `visibility` and bumping their attempt count
    async fn receive(&self, batch_size: i64, visibility: Duration)
    -> StoreResult<Vec<QueueMessage>>;

    /// Delete a successfully processed message
    async fn ack(&self, message_id: Uuid) -> StoreResult<()>;

    /// Return a failed message to the queue, visible again after `delay`
    async fn release(&self, message_id: Uuid, delay: Duration) -> StoreResult<()>;

    /// Move a message to the dead-letter table with the error that
    /// exhausted it
    async fn dead_letter(&self, message: &QueueMessage, error: &str) -> StoreResult<()>;

    async fn dead_letter_count(&self) -> StoreResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_token_round_trip() {
        let token = PageToken {
            last_active: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000)
                .expect("valid timestamp"),
            user_id: Uuid::new_v4(),
        };
        let decoded = PageToken::decode(&token.encode()).expect("token should decode");
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(matches!(
            PageToken::decode("not a token"),
            Err(StoreError::BadToken)
        ));
        assert!(matches!(PageToken::decode(""), Err(StoreError::BadToken)));
    }
}
