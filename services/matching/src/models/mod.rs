//! Domain models for the matching engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;

/// Geographic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Declared gender of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NonBinary => "nonbinary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "nonbinary" => Some(Gender::NonBinary),
            _ => None,
        }
    }
}

/// Gender category a user wants to be matched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestedIn {
    Men,
    Women,
    Everyone,
}

impl InterestedIn {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterestedIn::Men => "men",
            InterestedIn::Women => "women",
            InterestedIn::Everyone => "everyone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "men" => Some(InterestedIn::Men),
            "women" => Some(InterestedIn::Women),
            "everyone" => Some(InterestedIn::Everyone),
            _ => None,
        }
    }

    /// Whether a declared gender falls inside this category
    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            InterestedIn::Men => gender == Gender::Male,
            InterestedIn::Women => gender == Gender::Female,
            InterestedIn::Everyone => true,
        }
    }

    /// The single gender this category maps to, if any.
    ///
    /// Used to push the gender filter into the candidate query;
    /// `everyone` cannot be narrowed server-side.
    pub fn target_gender(&self) -> Option<Gender> {
        match self {
            InterestedIn::Men => Some(Gender::Male),
            InterestedIn::Women => Some(Gender::Female),
            InterestedIn::Everyone => None,
        }
    }
}

/// A user's stated match preferences.
///
/// Lifestyle filters are optional: an empty list or `None` (or the
/// literal "any") means the filter is not applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub interested_in: InterestedIn,
    pub age_min: i32,
    pub age_max: i32,
    pub max_distance_miles: f64,
    #[serde(default)]
    pub smoking: Vec<String>,
    #[serde(default)]
    pub drinking: Vec<String>,
    #[serde(default)]
    pub religion: Option<String>,
    #[serde(default)]
    pub children: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            interested_in: InterestedIn::Everyone,
            age_min: 18,
            age_max: 99,
            max_distance_miles: 100.0,
            smoking: Vec::new(),
            drinking: Vec::new(),
            religion: None,
            children: None,
        }
    }
}

/// A dating profile as seen by the matching engine.
///
/// Owned by the profile-management collaborator; this service reads it
/// and flips `visible`/`active_match` when a mutual match forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    pub gender: Gender,
    pub age: i32,
    pub coordinates: Option<Coordinates>,
    /// Geohash of `coordinates` at the configured precision
    pub location_code: Option<String>,
    pub drinking: Option<String>,
    pub smoking: Option<String>,
    pub exercise: Option<String>,
    pub children: Option<String>,
    pub religion: Option<String>,
    pub looking_for: Option<String>,
    pub interests: Vec<String>,
    pub visible: bool,
    pub active_match: Option<Uuid>,
    pub last_active: DateTime<Utc>,
    pub preferences: Preferences,
}

/// A scored candidate relative to one requester.
///
/// Ephemeral: computed during retrieval, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub user_id: Uuid,
    pub display_name: String,
    pub gender: Gender,
    pub age: i32,
    pub interests: Vec<String>,
    pub distance_miles: f64,
    pub compatibility: i32,
}

/// State of a directional match record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchState {
    Presented,
    Accepted,
    Passed,
    Mutual,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Presented => "presented",
            MatchState::Accepted => "accepted",
            MatchState::Passed => "passed",
            MatchState::Mutual => "mutual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "presented" => Some(MatchState::Presented),
            "accepted" => Some(MatchState::Accepted),
            "passed" => Some(MatchState::Passed),
            "mutual" => Some(MatchState::Mutual),
            _ => None,
        }
    }
}

/// Directional record of one user's view of a pairing.
///
/// A pair is mutual only when both directions reached `accepted`;
/// mutual records are never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub user_id: Uuid,
    pub candidate_id: Uuid,
    pub state: MatchState,
    pub compatibility: i32,
    pub distance_miles: f64,
    pub presented_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Action recorded in the append-only match history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Presented,
    Accepted,
    Passed,
    AutoPassed,
    Unmatched,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Presented => "presented",
            HistoryAction::Accepted => "accepted",
            HistoryAction::Passed => "passed",
            HistoryAction::AutoPassed => "auto_passed",
            HistoryAction::Unmatched => "unmatched",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "presented" => Some(HistoryAction::Presented),
            "accepted" => Some(HistoryAction::Accepted),
            "passed" => Some(HistoryAction::Passed),
            "auto_passed" => Some(HistoryAction::AutoPassed),
            "unmatched" => Some(HistoryAction::Unmatched),
            _ => None,
        }
    }
}

/// Append-only history entry used to keep previously seen candidates
/// out of future retrievals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_id: Uuid,
    pub other_id: Uuid,
    pub action: HistoryAction,
    pub recorded_at: DateTime<Utc>,
}

/// One lifecycle action carried through the async match queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueAction {
    FindNextMatch,
    AcceptMatch { candidate_id: Uuid },
    PassMatch { candidate_id: Uuid },
    ScoreBatch { candidate_ids: Vec<Uuid> },
}

/// A message claimed from the match queue.
///
/// The payload stays raw JSON until dispatch so a malformed body fails
/// that one message, never the whole batch.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: Uuid,
    pub requester_id: Uuid,
    pub payload: serde_json::Value,
    /// Number of times the message has been claimed, this claim included
    pub attempts: i32,
    pub enqueued_at: DateTime<Utc>,
}
