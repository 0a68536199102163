//! Weighted score aggregation.
//!
//! The single scoring module: every caller that surfaces a total (slot
//! completion, event detail, exports) computes through these two functions so
//! no two views can ever disagree on a score.
//!
//! Criteria absent from a grade map are excluded from both the numerator and
//! the denominator; they are never treated as zero. This changes the
//! percentage base versus naive averaging and is load-bearing.

use crate::models::GradingCriterion;
use std::collections::HashMap;

/// Weighted team score over the event's criteria schema.
///
/// `round(Σ(grade·weight) / Σ(weight for criteria present))`, rounding
/// half-up. Returns 0 when no criterion matched.
pub fn team_score(grades: &HashMap<String, i32>, criteria: &[GradingCriterion]) -> i32 {
    weighted_score(grades, criteria)
}

/// Weighted score for one member, over that member's recorded grades.
///
/// Identical formula to `team_score`, scoped to the member's map. Returns 0
/// when the member has no grades recorded.
pub fn individual_score(
    email: &str,
    individual_grades: &HashMap<String, HashMap<String, i32>>,
    criteria: &[GradingCriterion],
) -> i32 {
    match individual_grades.get(email) {
        Some(member_grades) => weighted_score(member_grades, criteria),
        None => 0,
    }
}

fn weighted_score(grades: &HashMap<String, i32>, criteria: &[GradingCriterion]) -> i32 {
    let mut numerator: i64 = 0;
    let mut weight_total: i64 = 0;

    // Iterating the criteria schema (not the map) keeps the computation
    // insensitive to map key order.
    for criterion in criteria {
        if let Some(&grade) = grades.get(&criterion.name) {
            numerator += i64::from(grade) * i64::from(criterion.weight);
            weight_total += i64::from(criterion.weight);
        }
    }

    if weight_total == 0 {
        return 0;
    }

    round_half_up(numerator, weight_total)
}

/// Round-half-up division for non-negative operands.
fn round_half_up(numerator: i64, denominator: i64) -> i32 {
    ((2 * numerator + denominator) / (2 * denominator)) as i32
}
