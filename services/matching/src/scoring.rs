//! Compatibility scoring
//!
//! Pure and deterministic: two profiles in, an integer in [0, 100] out.
//! Runs only on pairs that already passed mutual preference matching,
//! so it ranks rather than filters.

use crate::geo;
use crate::models::Profile;

const BASE_SCORE: f64 = 50.0;
const MAX_INTEREST_BONUS: f64 = 25.0;
const LIFESTYLE_BONUS: f64 = 3.0;
const INTENT_BONUS: f64 = 10.0;

fn opt_eq_ignore_case(a: &Option<String>, b: &Option<String>) -> bool {
    match (a.as_deref(), b.as_deref()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Shared-interest bonus, proportional to overlap over the smaller set
fn interest_bonus(a: &Profile, b: &Profile) -> f64 {
    if a.interests.is_empty() || b.interests.is_empty() {
        return 0.0;
    }
    let overlap = a
        .interests
        .iter()
        .filter(|i| b.interests.iter().any(|j| j.eq_ignore_ascii_case(i)))
        .count();
    let smaller = a.interests.len().min(b.interests.len());
    (overlap as f64 / smaller as f64) * MAX_INTEREST_BONUS
}

/// Closer pairs rank higher; far pairs are penalized
fn distance_adjustment(a: &Profile, b: &Profile) -> f64 {
    let distance = geo::distance_miles(a.coordinates.as_ref(), b.coordinates.as_ref());
    if distance < 10.0 {
        20.0
    } else if distance < 25.0 {
        15.0
    } else if distance < 50.0 {
        10.0
    } else if distance > 100.0 {
        -15.0
    } else {
        0.0
    }
}

/// Compatibility score between two profiles, clamped to [0, 100]
pub fn compatibility(a: &Profile, b: &Profile) -> i32 {
    let mut score = BASE_SCORE;

    score += interest_bonus(a, b);

    for (left, right) in [
        (&a.drinking, &b.drinking),
        (&a.smoking, &b.smoking),
        (&a.exercise, &b.exercise),
        (&a.children, &b.children),
        (&a.religion, &b.religion),
    ] {
        if opt_eq_ignore_case(left, right) {
            score += LIFESTYLE_BONUS;
        }
    }

    if opt_eq_ignore_case(&a.looking_for, &b.looking_for) {
        score += INTENT_BONUS;
    }

    score += distance_adjustment(a, b);

    (score.round() as i32).clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, Gender, Preferences};
    use chrono::Utc;
    use uuid::Uuid;

    fn bare_profile() -> Profile {
        Profile {
            user_id: Uuid::new_v4(),
            display_name: "test".to_string(),
            gender: Gender::Female,
            age: 30,
            coordinates: None,
            location_code: None,
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

    fn nearby(profile: &mut Profile) {
        profile.coordinates = Some(Coordinates {
            lat: 40.7128,
            lng: -74.0060,
        });
    }

    #[test]
    fn test_bare_profiles_score_base_minus_distance_penalty() {
        // No coordinates: sentinel distance lands in the far tier
        let a = bare_profile();
        let b = bare_profile();
        assert_eq!(compatibility(&a, &b), 35);
    }

    #[test]
    fn test_nearby_pair_gets_proximity_bonus() {
        let mut a = bare_profile();
        let mut b = bare_profile();
        nearby(&mut a);
        nearby(&mut b);
        assert_eq!(compatibility(&a, &b), 70);
    }

    #[test]
    fn test_interest_overlap_uses_smaller_set() {
        let mut a = bare_profile();
        let mut b = bare_profile();
        nearby(&mut a);
        nearby(&mut b);
        a.interests = vec!["Hiking".to_string(), "cooking".to_string()];
        b.interests = vec![
            "hiking".to_string(),
            "COOKING".to_string(),
            "chess".to_string(),
            "sailing".to_string(),
        ];

        // Full overlap of the smaller set: the whole interest bonus
        assert_eq!(compatibility(&a, &b), 95);
    }

    #[test]
    fn test_full_alignment_is_clamped_to_100() {
        let mut a = bare_profile();
        nearby(&mut a);
        a.interests = vec!["hiking".to_string()];
        a.drinking = Some("socially".to_string());
        a.smoking = Some("never".to_string());
        a.exercise = Some("often".to_string());
        a.children = Some("someday".to_string());
        a.religion = Some("none".to_string());
        a.looking_for = Some("serious".to_string());

        let b = a.clone();
        // 50 + 25 + 15 + 10 + 20 would be 120 without the clamp
        assert_eq!(compatibility(&a, &b), 100);
    }

    #[test]
    fn test_score_is_deterministic_and_symmetric_inputs() {
        let mut a = bare_profile();
        let mut b = bare_profile();
        nearby(&mut a);
        nearby(&mut b);
        a.interests = vec!["music".to_string()];
        b.interests = vec!["music".to_string(), "art".to_string()];

        let first = compatibility(&a, &b);
        assert_eq!(first, compatibility(&a, &b));
        assert_eq!(first, compatibility(&b, &a));
    }
}
