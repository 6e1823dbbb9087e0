//! PostgreSQL storage backend
//!
//! Each logical collection lives in its own table; identity references
//! are plain UUID columns, never concatenated key strings. Conditional
//! writes carry their condition in the statement itself so concurrent
//! workers stay correct without application-level locks.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{
    Coordinates, Gender, HistoryEntry, MatchRecord, MatchState, Preferences, Profile, QueueAction,
    QueueMessage,
};

use super::{
    BlockStore, CandidatePage, CandidateQuery, HistoryStore, MatchStore, PageToken, ProfileStore,
    QueueStore, StoreError, StoreResult, TransitionOutcome,
};

const PROFILE_COLUMNS: &str = "user_id, display_name, gender, age, lat, lng, location_code, \
     drinking, smoking, exercise, children, religion, looking_for, interests, visible, \
     active_match, last_active, preferences";

const RECORD_COLUMNS: &str =
    "user_id, candidate_id, state, compatibility, distance_miles, presented_at, decided_at";

/// PostgreSQL implementation of every storage trait
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn profile_from_row(row: &PgRow) -> StoreResult<Profile> {
    let gender: String = row.get("gender");
    let gender = Gender::parse(&gender)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown gender: {gender}")))?;

    let lat: Option<f64> = row.get("lat");
    let lng: Option<f64> = row.get("lng");
    let coordinates = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    };

    let preferences: Json<Preferences> = row.get("preferences");

    Ok(Profile {
        user_id: row.get("user_id"),
        display_name: row.get("display_name"),
        gender,
        age: row.get("age"),
        coordinates,
        location_code: row.get("location_code"),
        drinking: row.get("drinking"),
        smoking: row.get("smoking"),
        exercise: row.get("exercise"),
        children: row.get("children"),
        religion: row.get("religion"),
        looking_for: row.get("looking_for"),
        interests: row.get("interests"),
        visible: row.get("visible"),
        active_match: row.get("active_match"),
        last_active: row.get("last_active"),
        preferences: preferences.0,
    })
}

fn record_from_row(row: &PgRow) -> StoreResult<MatchRecord> {
    let state: String = row.get("state");
    let state = MatchState::parse(&state)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown match state: {state}")))?;

    Ok(MatchRecord {
        user_id: row.get("user_id"),
        candidate_id: row.get("candidate_id"),
        state,
        compatibility: row.get("compatibility"),
        distance_miles: row.get("distance_miles"),
        presented_at: row.get("presented_at"),
        decided_at: row.get("decided_at"),
    })
}

#[async_trait]
impl ProfileStore for PostgresStore {
    async fn get(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    async fn candidates(
        &self,
        query: &CandidateQuery,
        token: Option<&str>,
    ) -> StoreResult<CandidatePage> {
        let cursor = token.map(PageToken::decode).transpose()?;

        let mut builder = QueryBuilder::new(format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles \
             WHERE visible = TRUE AND active_match IS NULL AND user_id <> "
        ));
        builder.push_bind(query.exclude);
        builder.push(" AND last_active >= ");
        builder.push_bind(query.active_since);

        if let Some(gender) = query.gender {
            builder.push(" AND gender = ");
            builder.push_bind(gender.as_str());
        }
        if let Some(prefix) = &query.location_prefix {
            builder.push(" AND location_code LIKE ");
            builder.push_bind(format!("{prefix}%"));
        }
        if let Some(cursor) = cursor {
            builder.push(" AND (last_active, user_id) < (");
            builder.push_bind(cursor.last_active);
            builder.push(", ");
            builder.push_bind(cursor.user_id);
            builder.push(")");
        }

        builder.push(" ORDER BY last_active DESC, user_id DESC LIMIT ");
        builder.push_bind(query.page_size);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let profiles: Vec<Profile> = rows
            .iter()
            .map(profile_from_row)
            .collect::<StoreResult<_>>()?;

        let next = if profiles.len() == query.page_size as usize {
            profiles.last().map(|p| {
                PageToken {
                    last_active: p.last_active,
                    user_id: p.user_id,
                }
                .encode()
            })
        } else {
            None
        };

        Ok(CandidatePage { profiles, next })
    }

    async fn hide_matched(&self, user_id: Uuid, partner_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET visible = FALSE, active_match = $2 \
             WHERE user_id = $1 AND (active_match IS NULL OR active_match = $2)",
        )
        .bind(user_id)
        .bind(partner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn restore_visibility(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE profiles SET visible = TRUE, active_match = NULL WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_visible(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM profiles WHERE visible = TRUE")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }
}

#[async_trait]
impl MatchStore for PostgresStore {
    async fn get(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM match_records \
             WHERE user_id = $1 AND candidate_id = $2"
        ))
        .bind(user_id)
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn unresolved_for(&self, user_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM match_records \
             WHERE user_id = $1 AND state = 'presented' \
             ORDER BY presented_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert_presented(&self, record: &MatchRecord) -> StoreResult<bool> {
        // Bare ON CONFLICT also covers the one-unresolved-per-requester
        // partial unique index, not just the pair key
        let result = sqlx::query(
            "INSERT INTO match_records \
             (user_id, candidate_id, state, compatibility, distance_miles, presented_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT DO NOTHING",
        )
        .bind(record.user_id)
        .bind(record.candidate_id)
        .bind(record.state.as_str())
        .bind(record.compatibility)
        .bind(record.distance_miles)
        .bind(record.presented_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        user_id: Uuid,
        candidate_id: Uuid,
        from: MatchState,
        to: MatchState,
    ) -> StoreResult<TransitionOutcome> {
        let result = sqlx::query(
            "UPDATE match_records SET state = $4, decided_at = now() \
             WHERE user_id = $1 AND candidate_id = $2 AND state = $3",
        )
        .bind(user_id)
        .bind(candidate_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(TransitionOutcome::Applied);
        }

        match MatchStore::get(self, user_id, candidate_id).await? {
            Some(record) => Ok(TransitionOutcome::WrongState(record.state)),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    async fn mark_mutual(&self, user_id: Uuid, candidate_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Lock both directional rows in a deterministic order, then flip
        // them together; a racing caller blocks here and finds the pair
        // already mutual.
        let rows = sqlx::query(
            "SELECT state FROM match_records \
             WHERE (user_id = $1 AND candidate_id = $2) \
                OR (user_id = $2 AND candidate_id = $1) \
             ORDER BY user_id, candidate_id \
             FOR UPDATE",
        )
        .bind(user_id)
        .bind(candidate_id)
        .fetch_all(&mut *tx)
        .await?;

        let both_accepted = rows.len() == 2
            && rows
                .iter()
                .all(|row| row.get::<String, _>("state") == "accepted");
        if !both_accepted {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE match_records SET state = 'mutual', decided_at = now() \
             WHERE (user_id = $1 AND candidate_id = $2) \
                OR (user_id = $2 AND candidate_id = $1)",
        )
        .bind(user_id)
        .bind(candidate_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn presented_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<MatchRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM match_records \
             WHERE state = 'presented' AND presented_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl HistoryStore for PostgresStore {
    async fn append(&self, entry: &HistoryEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO match_history (user_id, other_id, action, recorded_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.user_id)
        .bind(entry.other_id)
        .bind(entry.action.as_str())
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn seen_partners(&self, user_id: Uuid) -> StoreResult<HashSet<Uuid>> {
        let rows = sqlx::query("SELECT DISTINCT other_id FROM match_history WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("other_id")).collect())
    }
}

#[async_trait]
impl BlockStore for PostgresStore {
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS( \
               SELECT 1 FROM blocks \
               WHERE (blocker_id = $1 AND blocked_id = $2) \
                  OR (blocker_id = $2 AND blocked_id = $1) \
             ) AS blocked",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("blocked"))
    }
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn enqueue(&self, requester_id: Uuid, action: &QueueAction) -> StoreResult<Uuid> {
        let message_id = Uuid::new_v4();
        let payload =
            serde_json::to_value(action).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            "INSERT INTO match_queue (message_id, requester_id, payload) VALUES ($1, $2, $3)",
        )
        .bind(message_id)
        .bind(requester_id)
        .bind(Json(payload))
        .execute(&self.pool)
        .await?;

        Ok(message_id)
    }

    async fn receive(
        &self,
        batch_size: i64,
        visibility: Duration,
    ) -> StoreResult<Vec<QueueMessage>> {
        let invisible_until = Utc::now()
            + chrono::Duration::from_std(visibility)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        // SKIP LOCKED keeps concurrent workers from serializing on, or
        // double-claiming, the same batch.
        let rows = sqlx::query(
            "WITH due AS ( \
               SELECT message_id FROM match_queue \
               WHERE visible_at <= now() \
               ORDER BY enqueued_at \
               LIMIT $1 \
               FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE match_queue q \
             SET visible_at = $2, attempts = q.attempts + 1 \
             FROM due WHERE q.message_id = due.message_id \
             RETURNING q.message_id, q.requester_id, q.payload, q.attempts, q.enqueued_at",
        )
        .bind(batch_size)
        .bind(invisible_until)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let payload: Json<serde_json::Value> = row.get("payload");
                QueueMessage {
                    message_id: row.get("message_id"),
                    requester_id: row.get("requester_id"),
                    payload: payload.0,
                    attempts: row.get("attempts"),
                    enqueued_at: row.get("enqueued_at"),
                }
            })
            .collect())
    }

    async fn ack(&self, message_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM match_queue WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, message_id: Uuid, delay: Duration) -> StoreResult<()> {
        let visible_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        sqlx::query("UPDATE match_queue SET visible_at = $2 WHERE message_id = $1")
            .bind(message_id)
            .bind(visible_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, message: &QueueMessage, error: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM match_queue WHERE message_id = $1")
            .bind(message.message_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO match_queue_dlq \
             (message_id, requester_id, payload, attempts, last_error, enqueued_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(message.message_id)
        .bind(message.requester_id)
        .bind(Json(message.payload.clone()))
        .bind(message.attempts)
        .bind(error)
        .bind(message.enqueued_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter_count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM match_queue_dlq")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }
}
