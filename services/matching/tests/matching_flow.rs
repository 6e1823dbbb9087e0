//! End-to-end matching flows against the in-memory storage backend
//!
//! These tests drive the same finder/lifecycle/queue objects the server
//! wires at startup, with no external services involved.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use matching::cache::ProfileCache;
use matching::config::{CacheConfig, MatchingConfig, QueueConfig};
use matching::error::MatchError;
use matching::finder::MatchFinder;
use matching::geo;
use matching::lifecycle::MatchLifecycle;
use matching::metrics::MatchMetrics;
use matching::models::{
    Coordinates, Gender, InterestedIn, MatchRecord, MatchState, Preferences, Profile, QueueAction,
};
use matching::queue::QueueWorker;
use matching::store::{MatchStore, MemoryStore, QueueStore};

const NYC: (f64, f64) = (40.7128, -74.0060);
const LOS_ANGELES: (f64, f64) = (34.0522, -118.2437);

struct Harness {
    store: MemoryStore,
    finder: Arc<MatchFinder>,
    lifecycle: Arc<MatchLifecycle>,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let cache = ProfileCache::new(&CacheConfig::default(), None);
    let metrics = MatchMetrics::new();
    let config = MatchingConfig::default();

    let finder = Arc::new(MatchFinder::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cache.clone(),
        metrics,
        config.clone(),
    ));
    let lifecycle = Arc::new(MatchLifecycle::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cache,
        config,
    ));

    Harness {
        store,
        finder,
        lifecycle,
    }
}

fn profile(gender: Gender, age: i32, location: (f64, f64)) -> Profile {
    let coordinates = Coordinates {
        lat: location.0,
        lng: location.1,
    };
    Profile {
        user_id: Uuid::new_v4(),
        display_name: "someone".to_string(),
        gender,
        age,
        coordinates: Some(coordinates),
        location_code: Some(geo::encode_geohash(&coordinates, 4)),
        drinking: None,
        smoking: None,
        exercise: None,
        children: None,
        religion: None,
        looking_for: None,
        interests: Vec::new(),
        visible: true,
        active_match: None,
        last_active: Utc::now(),
        preferences: Preferences::default(),
    }
}

fn presented(user_id: Uuid, candidate_id: Uuid) -> MatchRecord {
    MatchRecord {
        user_id,
        candidate_id,
        state: MatchState::Presented,
        compatibility: 70,
        distance_miles: 5.0,
        presented_at: Utc::now(),
        decided_at: None,
    }
}

/// A point roughly `miles` north of the given location
fn miles_north(location: (f64, f64), miles: f64) -> (f64, f64) {
    (location.0 + miles / 69.0, location.1)
}

#[tokio::test]
async fn test_scenario_women_25_to_35_within_10_miles() {
    let h = harness();

    let mut requester = profile(Gender::Male, 32, NYC);
    requester.preferences = Preferences {
        interested_in: InterestedIn::Women,
        age_min: 25,
        age_max: 35,
        max_distance_miles: 10.0,
        ..Preferences::default()
    };
    let requester_id = requester.user_id;

    let candidate = profile(Gender::Female, 30, miles_north(NYC, 8.0));
    let candidate_id = candidate.user_id;

    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (found, _stats) = h.finder.find_next(requester_id).await.expect("find_next");
    let found = found.expect("candidate should be presented");
    assert_eq!(found.user_id, candidate_id);
    assert!(found.compatibility >= 50, "score was {}", found.compatibility);
    assert_eq!(found.distance_miles, 8.0);

    let record = MatchStore::get(&h.store, requester_id, candidate_id)
        .await
        .expect("record lookup")
        .expect("presented record should exist");
    assert_eq!(record.state, MatchState::Presented);
}

#[tokio::test]
async fn test_mutual_preferences_required_in_both_directions() {
    let h = harness();

    // Requester only wants women; the only other profile is a man
    let mut requester = profile(Gender::Female, 30, NYC);
    requester.preferences.interested_in = InterestedIn::Women;
    let requester_id = requester.user_id;
    h.store.insert_profile(requester).await;
    h.store.insert_profile(profile(Gender::Male, 30, NYC)).await;

    let (found, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(found.is_none());

    // The reverse direction must hold too: candidate's preferences
    // reject the requester's age
    let h = harness();
    let requester = profile(Gender::Male, 22, NYC);
    let requester_id = requester.user_id;
    let mut candidate = profile(Gender::Female, 30, NYC);
    candidate.preferences.age_min = 30;
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (found, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(found.is_none(), "one-directional fit must never present");
}

#[tokio::test]
async fn test_blocked_users_are_never_presented() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let requester_id = requester.user_id;

    // Block in the candidate-to-requester direction; either direction
    // must suppress the pairing
    h.store.add_block(candidate.user_id, requester_id).await;
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (found, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(found.is_none());
}

#[tokio::test]
async fn test_unresolved_presentation_is_re_presented_without_duplicates() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let (requester_id, candidate_id) = (requester.user_id, candidate.user_id);
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (first, _) = h.finder.find_next(requester_id).await.expect("find_next");
    let (second, _) = h.finder.find_next(requester_id).await.expect("find_next");

    assert_eq!(first.expect("first").user_id, candidate_id);
    assert_eq!(second.expect("second").user_id, candidate_id);

    let record = MatchStore::get(&h.store, requester_id, candidate_id)
        .await
        .expect("record lookup")
        .expect("record");
    assert_eq!(record.state, MatchState::Presented);
}

#[tokio::test]
async fn test_passed_pair_is_never_presented_again() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let (requester_id, candidate_id) = (requester.user_id, candidate.user_id);
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (found, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(found.is_some());

    h.lifecycle
        .pass(requester_id, candidate_id)
        .await
        .expect("pass");

    let (again, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(again.is_none(), "passed candidate must stay retired");

    // A passed pair can never become mutual
    let err = h
        .lifecycle
        .accept(requester_id, candidate_id)
        .await
        .expect_err("accept after pass must fail");
    assert!(matches!(err, MatchError::InvalidState { .. }));
}

#[tokio::test]
async fn test_accept_is_idempotent() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;
    h.store.insert_record(presented(a_id, b_id)).await;
    h.store.insert_record(presented(b_id, a_id)).await;

    assert!(!h.lifecycle.accept(a_id, b_id).await.expect("first accept"));
    assert!(!h.lifecycle.accept(a_id, b_id).await.expect("repeat accept"));

    assert!(h.lifecycle.accept(b_id, a_id).await.expect("reverse accept"));

    // After the pair is mutual, the same call still reports mutual
    assert!(h.lifecycle.accept(a_id, b_id).await.expect("post-mutual accept"));
}

#[tokio::test]
async fn test_lifecycle_actions_require_a_presentation() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;

    let err = h
        .lifecycle
        .accept(a_id, b_id)
        .await
        .expect_err("accept without presentation must fail");
    assert!(matches!(err, MatchError::InvalidState { .. }));

    let err = h
        .lifecycle
        .pass(a_id, b_id)
        .await
        .expect_err("pass without presentation must fail");
    assert!(matches!(err, MatchError::InvalidState { .. }));
}

#[tokio::test]
async fn test_mutual_acceptance_hides_both_and_retires_the_pair() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;

    // Drive the full flow: present in both directions, then accept both
    let (found, _) = h.finder.find_next(a_id).await.expect("find_next a");
    assert_eq!(found.expect("candidate for a").user_id, b_id);
    let (found, _) = h.finder.find_next(b_id).await.expect("find_next b");
    assert_eq!(found.expect("candidate for b").user_id, a_id);

    assert!(!h.lifecycle.accept(b_id, a_id).await.expect("b accepts"));
    assert!(h.lifecycle.accept(a_id, b_id).await.expect("a accepts"));

    for (user, partner) in [(a_id, b_id), (b_id, a_id)] {
        let record = MatchStore::get(&h.store, user, partner)
            .await
            .expect("record lookup")
            .expect("record");
        assert_eq!(record.state, MatchState::Mutual);

        let profile = h.store.profile(user).await.expect("profile");
        assert!(!profile.visible, "profile must be hidden after mutual");
        assert_eq!(profile.active_match, Some(partner));
    }

    // A hidden, matched requester gets no further candidates
    let (found, _) = h.finder.find_next(a_id).await.expect("find_next");
    assert!(found.is_none());
}

#[tokio::test]
async fn test_concurrent_accepts_create_exactly_one_mutual_pair() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;

    // Both directions already accepted: the two racing calls below both
    // observe a mutual pair and must settle it exactly once
    let mut forward = presented(a_id, b_id);
    forward.state = MatchState::Accepted;
    let mut reverse = presented(b_id, a_id);
    reverse.state = MatchState::Accepted;
    h.store.insert_record(forward).await;
    h.store.insert_record(reverse).await;

    let (from_a, from_b) = tokio::join!(
        h.lifecycle.accept(a_id, b_id),
        h.lifecycle.accept(b_id, a_id),
    );
    assert!(from_a.expect("accept from a"));
    assert!(from_b.expect("accept from b"));

    for (user, partner) in [(a_id, b_id), (b_id, a_id)] {
        let record = MatchStore::get(&h.store, user, partner)
            .await
            .expect("record lookup")
            .expect("record");
        assert_eq!(record.state, MatchState::Mutual);

        let profile = h.store.profile(user).await.expect("profile");
        assert!(!profile.visible);
        assert_eq!(profile.active_match, Some(partner));
    }
}

#[tokio::test]
async fn test_unmatch_restores_visibility_but_blocks_re_presentation() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;

    let (_, _) = h.finder.find_next(a_id).await.expect("find_next a");
    let (_, _) = h.finder.find_next(b_id).await.expect("find_next b");
    h.lifecycle.accept(a_id, b_id).await.expect("a accepts");
    h.lifecycle.accept(b_id, a_id).await.expect("b accepts");

    h.lifecycle.unmatch(a_id).await.expect("unmatch");

    for user in [a_id, b_id] {
        let profile = h.store.profile(user).await.expect("profile");
        assert!(profile.visible, "unmatch must restore visibility");
        assert_eq!(profile.active_match, None);
    }

    // Back in the pool, but never each other again
    let (found, _) = h.finder.find_next(a_id).await.expect("find_next");
    assert!(found.is_none());
    let (found, _) = h.finder.find_next(b_id).await.expect("find_next");
    assert!(found.is_none());
}

#[tokio::test]
async fn test_sparse_prefix_falls_back_to_full_scan() {
    let h = harness();

    let mut requester = profile(Gender::Male, 30, NYC);
    requester.preferences.max_distance_miles = 5000.0;
    let requester_id = requester.user_id;

    // The only candidate is on the other coast: zero prefix hits
    let mut candidate = profile(Gender::Female, 30, LOS_ANGELES);
    candidate.preferences.max_distance_miles = 5000.0;
    let candidate_id = candidate.user_id;

    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let (found, stats) = h.finder.find_next(requester_id).await.expect("find_next");
    assert_eq!(found.expect("fallback candidate").user_id, candidate_id);
    assert!(stats.full_scan, "sparse prefix must widen to a full scan");
}

#[tokio::test]
async fn test_expired_presentation_is_auto_passed() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let (requester_id, candidate_id) = (requester.user_id, candidate.user_id);
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let mut stale = presented(requester_id, candidate_id);
    stale.presented_at = Utc::now() - Duration::hours(25);
    h.store.insert_record(stale).await;

    let swept = h.lifecycle.sweep_expired().await.expect("sweep");
    assert_eq!(swept, 1);

    let record = MatchStore::get(&h.store, requester_id, candidate_id)
        .await
        .expect("record lookup")
        .expect("record");
    assert_eq!(record.state, MatchState::Passed);

    // The expired pairing stays retired
    let (found, _) = h.finder.find_next(requester_id).await.expect("find_next");
    assert!(found.is_none());
}

#[tokio::test]
async fn test_score_batch_omits_unknown_candidates() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let (requester_id, candidate_id) = (requester.user_id, candidate.user_id);
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    let scores = h
        .finder
        .score_batch(requester_id, &[candidate_id, Uuid::new_v4()])
        .await
        .expect("score_batch");

    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].candidate_id, candidate_id);
    assert!(scores[0].score >= 50);
}

fn queue_worker(h: &Harness, max_attempts: i32) -> QueueWorker {
    QueueWorker::new(
        Arc::new(h.store.clone()),
        h.finder.clone(),
        h.lifecycle.clone(),
        QueueConfig {
            max_attempts,
            ..QueueConfig::default()
        },
    )
}

#[tokio::test]
async fn test_queue_settles_failures_per_message() {
    let h = harness();
    let a = profile(Gender::Male, 30, NYC);
    let b = profile(Gender::Female, 30, NYC);
    let (a_id, b_id) = (a.user_id, b.user_id);
    h.store.insert_profile(a).await;
    h.store.insert_profile(b).await;
    h.store.insert_record(presented(a_id, b_id)).await;

    // One good accept, one malformed payload, one accept with no
    // presentation behind it
    QueueStore::enqueue(
        &h.store,
        a_id,
        &QueueAction::AcceptMatch { candidate_id: b_id },
    )
    .await
    .expect("enqueue");
    h.store
        .enqueue_raw(a_id, json!({ "action": "definitely_not_an_action" }))
        .await;
    QueueStore::enqueue(
        &h.store,
        b_id,
        &QueueAction::AcceptMatch { candidate_id: a_id },
    )
    .await
    .expect("enqueue");

    let worker = queue_worker(&h, 3);
    let claimed = worker.process_batch().await.expect("process_batch");
    assert_eq!(claimed, 3);

    // The good message applied and was acknowledged
    let record = MatchStore::get(&h.store, a_id, b_id)
        .await
        .expect("record lookup")
        .expect("record");
    assert_eq!(record.state, MatchState::Accepted);

    // The two failures were dead-lettered individually; nothing is left
    // in flight
    assert_eq!(h.store.queue_len().await, 0);
    let dead = h.store.dead_letters().await;
    assert_eq!(dead.len(), 2);
    assert!(
        dead.iter().any(|(_, error)| error.contains("malformed")),
        "malformed payload should record its decode error"
    );
}

#[tokio::test]
async fn test_queued_find_next_presents_a_match() {
    let h = harness();
    let requester = profile(Gender::Male, 30, NYC);
    let candidate = profile(Gender::Female, 30, NYC);
    let (requester_id, candidate_id) = (requester.user_id, candidate.user_id);
    h.store.insert_profile(requester).await;
    h.store.insert_profile(candidate).await;

    QueueStore::enqueue(&h.store, requester_id, &QueueAction::FindNextMatch)
        .await
        .expect("enqueue");

    let worker = queue_worker(&h, 3);
    assert_eq!(worker.process_batch().await.expect("process_batch"), 1);

    let record = MatchStore::get(&h.store, requester_id, candidate_id)
        .await
        .expect("record lookup")
        .expect("presented record");
    assert_eq!(record.state, MatchState::Presented);
    assert_eq!(h.store.queue_len().await, 0);
}
