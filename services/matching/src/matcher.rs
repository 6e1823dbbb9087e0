//! Two-directional preference matching
//!
//! A pairing is only eligible when each profile satisfies the other
//! side's preferences. Checks run cheapest-first and short-circuit on
//! the first failure, so a gender mismatch never pays for a haversine
//! and the first blocking reason is the one that surfaces.

use serde::Serialize;

use crate::geo;
use crate::models::{Preferences, Profile};

/// First preference check a candidate failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    GenderMismatch,
    AgeOutOfRange,
    TooFar,
    SmokingMismatch,
    DrinkingMismatch,
    ReligionMismatch,
    ChildrenMismatch,
}

impl MismatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchReason::GenderMismatch => "gender_mismatch",
            MismatchReason::AgeOutOfRange => "age_out_of_range",
            MismatchReason::TooFar => "too_far",
            MismatchReason::SmokingMismatch => "smoking_mismatch",
            MismatchReason::DrinkingMismatch => "drinking_mismatch",
            MismatchReason::ReligionMismatch => "religion_mismatch",
            MismatchReason::ChildrenMismatch => "children_mismatch",
        }
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// "any" (or empty) disables a single-value lifestyle filter
fn filter_value(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && !eq_ignore_case(v, "any"))
}

/// Whether `candidate` satisfies `prefs` as declared by `viewer`.
///
/// Returns the viewer-to-candidate distance in miles on success, since
/// the distance check already computed it.
pub fn evaluate(
    candidate: &Profile,
    prefs: &Preferences,
    viewer: &Profile,
) -> Result<f64, MismatchReason> {
    if !prefs.interested_in.accepts(candidate.gender) {
        return Err(MismatchReason::GenderMismatch);
    }

    if candidate.age < prefs.age_min || candidate.age > prefs.age_max {
        return Err(MismatchReason::AgeOutOfRange);
    }

    let distance = geo::distance_miles(
        viewer.coordinates.as_ref(),
        candidate.coordinates.as_ref(),
    );
    if distance > prefs.max_distance_miles {
        return Err(MismatchReason::TooFar);
    }

    // List filters only constrain candidates that declare the attribute
    if !prefs.smoking.is_empty()
        && let Some(smoking) = candidate.smoking.as_deref()
        && !prefs.smoking.iter().any(|s| eq_ignore_case(s, smoking))
    {
        return Err(MismatchReason::SmokingMismatch);
    }

    if !prefs.drinking.is_empty()
        && let Some(drinking) = candidate.drinking.as_deref()
        && !prefs.drinking.iter().any(|d| eq_ignore_case(d, drinking))
    {
        return Err(MismatchReason::DrinkingMismatch);
    }

    // Single-value filters require the candidate to declare and match
    if let Some(required) = filter_value(&prefs.religion) {
        match candidate.religion.as_deref() {
            Some(religion) if eq_ignore_case(religion, required) => {}
            _ => return Err(MismatchReason::ReligionMismatch),
        }
    }

    if let Some(required) = filter_value(&prefs.children) {
        match candidate.children.as_deref() {
            Some(children) if eq_ignore_case(children, required) => {}
            _ => return Err(MismatchReason::ChildrenMismatch),
        }
    }

    Ok(distance)
}
