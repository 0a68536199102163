//! Candidate slot sequence generation.
//!
//! Pure and deterministic: identical inputs always yield the identical
//! sequence. Generation is unaware of bookings; it only establishes the
//! initial available set when an event is created.

use crate::errors::{FieldViolation, PsError};
use crate::models::{validate_slot_config, SlotConfig};
use chrono::{DateTime, NaiveTime, Timelike, Utc};

/// Generate the ordered candidate slot starts for a presentation window.
///
/// For each calendar day in `[window_start.date, window_end.date]`, slots
/// begin at `daily_start_time` and advance by duration + buffer minutes while
/// the slot still ends by `daily_end_time`. Times are strictly increasing
/// within each day.
///
/// # Errors
///
/// Returns `PsError::Validation` listing every violated configuration field
/// when the slot config is invalid or the window end precedes its start.
pub fn generate(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    config: &SlotConfig,
) -> Result<Vec<DateTime<Utc>>, PsError> {
    let mut violations = validate_slot_config(config);
    if window_end < window_start {
        violations.push(FieldViolation::new(
            "presentation_window",
            "end must not precede start",
        ));
    }
    if !violations.is_empty() {
        return Err(PsError::Validation(violations));
    }

    // Second-of-day arithmetic avoids NaiveTime's wrapping addition.
    let day_start = i64::from(config.daily_start_time.num_seconds_from_midnight());
    let day_end = i64::from(config.daily_end_time.num_seconds_from_midnight());
    let duration = i64::from(config.duration_minutes) * 60;
    let step = duration + i64::from(config.buffer_minutes) * 60;

    let mut slots = Vec::new();
    let mut day = window_start.date_naive();
    let last_day = window_end.date_naive();

    while day <= last_day {
        let mut cursor = day_start;
        while cursor + duration <= day_end {
            if let Some(time) = second_of_day_to_time(cursor) {
                slots.push(day.and_time(time).and_utc());
            }
            cursor += step;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    Ok(slots)
}

fn second_of_day_to_time(second: i64) -> Option<NaiveTime> {
    let second = u32::try_from(second).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(second, 0)
}
