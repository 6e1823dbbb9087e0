//! Matching service routes

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use crate::{
    error::MatchError,
    models::api::{
        AcceptResponse, AckResponse, DecisionRequest, EnqueueRequest, EnqueueResponse,
        NextMatchRequest, NextMatchResponse, PoolStatsResponse, ScoreBatchRequest, StatusQuery,
        UnmatchRequest,
    },
    state::AppState,
};

/// Create the router for the matching service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/match/next", post(next_match))
        .route("/api/match/accept", post(accept_match))
        .route("/api/match/pass", post(pass_match))
        .route("/api/match/score-batch", post(score_batch))
        .route("/api/match/unmatch", post(unmatch))
        .route("/api/match/enqueue", post(enqueue))
        .route("/api/match/status", get(match_status))
        .route("/api/match/pool-stats", get(pool_stats))
        .route("/api/match/metrics", get(metrics_snapshot))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "matching-service"
    }))
}

/// Find and present the next match for a requester
pub async fn next_match(
    State(state): State<AppState>,
    Json(payload): Json<NextMatchRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let decision = state.rate_limiter.check(payload.requester_id).await;
    if !decision.allowed {
        return Err(MatchError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let (candidate, stats) = state.finder.find_next(payload.requester_id).await?;
    Ok(Json(NextMatchResponse { candidate, stats }))
}

/// Accept a presented match
pub async fn accept_match(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let mutual = state
        .lifecycle
        .accept(payload.requester_id, payload.candidate_id)
        .await?;
    Ok(Json(AcceptResponse { mutual }))
}

/// Pass on a presented match
pub async fn pass_match(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> Result<impl IntoResponse, MatchError> {
    state
        .lifecycle
        .pass(payload.requester_id, payload.candidate_id)
        .await?;
    Ok(Json(AckResponse { ok: true }))
}

/// Score a batch of candidates for a requester
pub async fn score_batch(
    State(state): State<AppState>,
    Json(payload): Json<ScoreBatchRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let scores = state
        .finder
        .score_batch(payload.requester_id, &payload.candidate_ids)
        .await?;
    Ok(Json(scores))
}

/// End an active mutual match
pub async fn unmatch(
    State(state): State<AppState>,
    Json(payload): Json<UnmatchRequest>,
) -> Result<impl IntoResponse, MatchError> {
    state.lifecycle.unmatch(payload.requester_id).await?;
    Ok(Json(AckResponse { ok: true }))
}

/// Defer a lifecycle action through the match queue
pub async fn enqueue(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, MatchError> {
    let message_id = state
        .queue
        .enqueue(payload.requester_id, &payload.action)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { message_id }),
    ))
}

/// A user's current visibility and active match
pub async fn match_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, MatchError> {
    let status = state.lifecycle.status(query.requester_id).await?;
    Ok(Json(status))
}

/// Size of the visible matching pool
pub async fn pool_stats(State(state): State<AppState>) -> Result<impl IntoResponse, MatchError> {
    let visible_profiles = state.lifecycle.pool_stats().await?;
    Ok(Json(PoolStatsResponse { visible_profiles }))
}

/// Current metrics window aggregates
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot().await)
}
