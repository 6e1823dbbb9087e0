//! Request and response payloads for the matching API

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Candidate, QueueAction};

/// Request for the next match
#[derive(Debug, Deserialize)]
pub struct NextMatchRequest {
    pub requester_id: Uuid,
}

/// Retrieval statistics returned alongside a match result
#[derive(Debug, Default, Serialize)]
pub struct RetrievalStats {
    /// Profiles pulled from the store before preference evaluation
    pub scanned: usize,
    /// Pairs that satisfied preferences in both directions
    pub eligible: usize,
    /// Whether retrieval had to widen to a full scan
    pub full_scan: bool,
}

/// Response for a next-match request.
///
/// A null candidate means "no match right now", which is a normal
/// outcome, not an error.
#[derive(Debug, Serialize)]
pub struct NextMatchResponse {
    pub candidate: Option<Candidate>,
    pub stats: RetrievalStats,
}

/// Request for an accept or pass decision
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub requester_id: Uuid,
    pub candidate_id: Uuid,
}

/// Response for an accept decision
#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub mutual: bool,
}

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Request to score a batch of candidates for one requester
#[derive(Debug, Deserialize)]
pub struct ScoreBatchRequest {
    pub requester_id: Uuid,
    pub candidate_ids: Vec<Uuid>,
}

/// Compatibility score for one candidate
#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub candidate_id: Uuid,
    pub score: i32,
}

/// Request to end an active mutual match
#[derive(Debug, Deserialize)]
pub struct UnmatchRequest {
    pub requester_id: Uuid,
}

/// Request to defer a lifecycle action through the queue
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub requester_id: Uuid,
    #[serde(flatten)]
    pub action: QueueAction,
}

/// Response for an enqueued action
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub message_id: Uuid,
}

/// Query parameters for a match status lookup
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub requester_id: Uuid,
}

/// A user's current standing in the matching pool
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub visible: bool,
    pub active_match: Option<Uuid>,
}

/// Size of the currently visible matching pool
#[derive(Debug, Serialize)]
pub struct PoolStatsResponse {
    pub visible_profiles: i64,
}
