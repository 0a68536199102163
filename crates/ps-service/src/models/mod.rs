//! Presentation service models.
//!
//! Row structs map 1:1 to tables; request types carry their own
//! `validate()` which collects every violated field so callers see the whole
//! list at once.

use crate::auth::CallerContext;
use crate::errors::{FieldViolation, PsError};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Criteria weights must sum to exactly this when a custom schema is used.
pub const CRITERIA_WEIGHT_TOTAL: i32 = 100;

/// Participation type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationType {
    /// A single presenter per slot.
    Individual,

    /// A team of presenters per slot, bounded by the event's size limits.
    Team,
}

impl ParticipationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationType::Individual => "individual",
            ParticipationType::Team => "team",
        }
    }
}

impl FromStr for ParticipationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ParticipationType::Individual),
            "team" => Ok(ParticipationType::Team),
            _ => Err(format!("Invalid participation type: {}", s)),
        }
    }
}

/// Slot lifecycle state.
///
/// Transitions are monotonic; the only backward move is booked→available via
/// cancellation. Completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Open for booking.
    Available,

    /// Bound to a participant set, not yet started.
    Booked,

    /// Presentation underway.
    InProgress,

    /// Graded and closed. No further mutation permitted.
    Completed,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::InProgress => "in_progress",
            SlotStatus::Completed => "completed",
        }
    }

    /// The legal-transition relation of the booking state machine.
    pub fn can_transition_to(&self, next: SlotStatus) -> bool {
        matches!(
            (self, next),
            (SlotStatus::Available, SlotStatus::Booked)
                | (SlotStatus::Booked, SlotStatus::Available)
                | (SlotStatus::Booked, SlotStatus::InProgress)
                | (SlotStatus::InProgress, SlotStatus::Completed)
        )
    }

}

impl FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SlotStatus::Available),
            "booked" => Ok(SlotStatus::Booked),
            "in_progress" => Ok(SlotStatus::InProgress),
            "completed" => Ok(SlotStatus::Completed),
            _ => Err(format!("Invalid slot status: {}", s)),
        }
    }
}

/// A named grading dimension with an integer weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingCriterion {
    pub name: String,
    pub weight: i32,
}

/// The fixed default criteria schema used when no custom schema is supplied.
pub fn default_criteria() -> Vec<GradingCriterion> {
    vec![
        GradingCriterion {
            name: "Content".to_string(),
            weight: 30,
        },
        GradingCriterion {
            name: "Delivery".to_string(),
            weight: 30,
        },
        GradingCriterion {
            name: "Visual Aids".to_string(),
            weight: 20,
        },
        GradingCriterion {
            name: "Q&A".to_string(),
            weight: 20,
        },
    ]
}

/// Per-day slot generation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub duration_minutes: i32,
    pub buffer_minutes: i32,
    pub daily_start_time: NaiveTime,
    pub daily_end_time: NaiveTime,
}

/// Audience restriction. An empty dimension is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAudience {
    pub years: Vec<i32>,
    pub schools: Vec<String>,
    pub departments: Vec<String>,
}

impl TargetAudience {
    /// Whether the caller's audience dimensions intersect this restriction.
    ///
    /// A caller with no value for a restricted dimension does not match it.
    pub fn matches(&self, caller: &CallerContext) -> bool {
        let year_ok = self.years.is_empty() || caller.year.is_some_and(|y| self.years.contains(&y));
        let school_ok = self.schools.is_empty()
            || caller
                .school
                .as_ref()
                .is_some_and(|s| self.schools.contains(s));
        let department_ok = self.departments.is_empty()
            || caller
                .department
                .as_ref()
                .is_some_and(|d| self.departments.contains(d));
        year_ok && school_ok && department_ok
    }
}

/// Event database row (maps to events table).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventRow {
    pub event_id: Uuid,
    pub title: String,
    pub venue: String,
    pub host_email: String,
    pub participation_type: String,
    pub team_size_min: i32,
    pub team_size_max: i32,
    pub registration_start: DateTime<Utc>,
    pub registration_end: DateTime<Utc>,
    pub presentation_start: DateTime<Utc>,
    pub presentation_end: DateTime<Utc>,
    pub slot_duration_minutes: i32,
    pub slot_buffer_minutes: i32,
    pub daily_start_time: NaiveTime,
    pub daily_end_time: NaiveTime,
    pub audience_years: Vec<i32>,
    pub audience_schools: Vec<String>,
    pub audience_departments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRow {
    pub fn participation_type(&self) -> Result<ParticipationType, PsError> {
        ParticipationType::from_str(&self.participation_type).map_err(PsError::Database)
    }

    pub fn target_audience(&self) -> TargetAudience {
        TargetAudience {
            years: self.audience_years.clone(),
            schools: self.audience_schools.clone(),
            departments: self.audience_departments.clone(),
        }
    }

    pub fn registration_open_at(&self, now: DateTime<Utc>) -> bool {
        self.registration_start <= now && now < self.registration_end
    }

    pub fn presentation_window_contains(&self, now: DateTime<Utc>) -> bool {
        self.presentation_start <= now && now < self.presentation_end
    }
}

/// Slot database row (maps to slots table).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SlotRow {
    pub slot_id: Uuid,
    pub event_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub status: String,
    pub topic: Option<String>,
    pub team_name: Option<String>,
    pub attachment_ref: Option<String>,
    pub booked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_score: Option<i32>,
    pub feedback: Option<String>,
}

impl SlotRow {
    pub fn status(&self) -> Result<SlotStatus, PsError> {
        SlotStatus::from_str(&self.status).map_err(PsError::Database)
    }
}

/// A person bound to a slot's booking (maps to slot_participants table).
///
/// Ordinal 0 is the team lead; for individual events there is exactly one
/// participant at ordinal 0.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Participant {
    pub email: String,
    pub display_name: String,
    pub roll_number: Option<String>,
    pub ordinal: i32,
}

// ============================================================================
// Request types
// ============================================================================

/// Participant as submitted in a booking request; ordinal is assigned from
/// the submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInput {
    pub email: String,
    pub display_name: String,
    pub roll_number: Option<String>,
}

/// Event creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub venue: String,
    pub participation_type: ParticipationType,
    pub team_size_min: i32,
    pub team_size_max: i32,
    pub registration_start: DateTime<Utc>,
    pub registration_end: DateTime<Utc>,
    pub presentation_start: DateTime<Utc>,
    pub presentation_end: DateTime<Utc>,
    pub slot_config: SlotConfig,
    #[serde(default)]
    pub target_audience: TargetAudience,
    /// Custom criteria schema; `None` selects the fixed default.
    #[serde(default)]
    pub grading_criteria: Option<Vec<GradingCriterion>>,
}

impl CreateEventRequest {
    /// Collects every violated field. An empty result means the request is
    /// valid.
    pub fn validate(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if self.title.trim().is_empty() {
            violations.push(FieldViolation::new("title", "must not be empty"));
        }
        if self.venue.trim().is_empty() {
            violations.push(FieldViolation::new("venue", "must not be empty"));
        }

        match self.participation_type {
            ParticipationType::Individual => {
                if self.team_size_min != 1 || self.team_size_max != 1 {
                    violations.push(FieldViolation::new(
                        "team_size_min",
                        "individual events take exactly one participant",
                    ));
                }
            }
            ParticipationType::Team => {
                if self.team_size_min < 1 {
                    violations.push(FieldViolation::new("team_size_min", "must be at least 1"));
                }
                if self.team_size_min > self.team_size_max {
                    violations.push(FieldViolation::new(
                        "team_size_min",
                        "must not exceed team_size_max",
                    ));
                }
            }
        }

        if self.registration_start >= self.registration_end {
            violations.push(FieldViolation::new(
                "registration_window",
                "start must precede end",
            ));
        }
        if self.presentation_start >= self.presentation_end {
            violations.push(FieldViolation::new(
                "presentation_window",
                "start must precede end",
            ));
        }

        violations.extend(validate_slot_config(&self.slot_config));

        if let Some(criteria) = &self.grading_criteria {
            violations.extend(validate_criteria(criteria));
        }

        violations
    }

    /// The criteria schema this event will be created with.
    pub fn effective_criteria(&self) -> Vec<GradingCriterion> {
        self.grading_criteria
            .clone()
            .unwrap_or_else(default_criteria)
    }
}

/// Validate a slot generation configuration.
pub fn validate_slot_config(config: &SlotConfig) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if config.duration_minutes <= 0 {
        violations.push(FieldViolation::new(
            "slot_config.duration_minutes",
            "must be positive",
        ));
    }
    if config.buffer_minutes < 0 {
        violations.push(FieldViolation::new(
            "slot_config.buffer_minutes",
            "must not be negative",
        ));
    }
    if config.daily_start_time >= config.daily_end_time {
        violations.push(FieldViolation::new(
            "slot_config.daily_start_time",
            "must precede daily_end_time",
        ));
    }

    violations
}

/// Validate a custom criteria schema: non-empty, unique non-empty names,
/// positive weights summing to exactly 100.
pub fn validate_criteria(criteria: &[GradingCriterion]) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if criteria.is_empty() {
        violations.push(FieldViolation::new(
            "grading_criteria",
            "must not be empty",
        ));
        return violations;
    }

    let mut seen = Vec::new();
    for criterion in criteria {
        if criterion.name.trim().is_empty() {
            violations.push(FieldViolation::new(
                "grading_criteria",
                "criterion names must not be empty",
            ));
        } else if seen.contains(&criterion.name.as_str()) {
            violations.push(FieldViolation::new(
                "grading_criteria",
                format!("duplicate criterion '{}'", criterion.name),
            ));
        } else {
            seen.push(criterion.name.as_str());
        }

        if criterion.weight < 1 {
            violations.push(FieldViolation::new(
                "grading_criteria",
                format!("criterion '{}' weight must be positive", criterion.name),
            ));
        }
    }

    let total: i32 = criteria.iter().map(|c| c.weight).sum();
    if total != CRITERIA_WEIGHT_TOTAL {
        violations.push(FieldViolation::new(
            "grading_criteria",
            format!("weights must sum to {}, got {}", CRITERIA_WEIGHT_TOTAL, total),
        ));
    }

    violations
}

/// Event update request. Slot configuration and the presentation window are
/// immutable: slots are pre-materialized at creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub venue: Option<String>,
    pub registration_start: Option<DateTime<Utc>>,
    pub registration_end: Option<DateTime<Utc>>,
    pub target_audience: Option<TargetAudience>,
    /// Replacement criteria schema; refused once any slot is completed.
    pub grading_criteria: Option<Vec<GradingCriterion>>,
}

impl UpdateEventRequest {
    /// Collects every violated field, given the stored event the update
    /// applies on top of.
    pub fn validate(&self, current: &EventRow) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                violations.push(FieldViolation::new("title", "must not be empty"));
            }
        }
        if let Some(venue) = &self.venue {
            if venue.trim().is_empty() {
                violations.push(FieldViolation::new("venue", "must not be empty"));
            }
        }

        let reg_start = self.registration_start.unwrap_or(current.registration_start);
        let reg_end = self.registration_end.unwrap_or(current.registration_end);
        if reg_start >= reg_end {
            violations.push(FieldViolation::new(
                "registration_window",
                "start must precede end",
            ));
        }

        if let Some(criteria) = &self.grading_criteria {
            violations.extend(validate_criteria(criteria));
        }

        violations
    }
}

/// Booking request binding a participant set to a slot.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub topic: String,
    pub team_name: Option<String>,
    pub participants: Vec<ParticipantInput>,
    /// Opaque reference into the attachment collaborator; never interpreted.
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

/// Grade submission completing a slot.
#[derive(Debug, Clone, Deserialize)]
pub struct GradeSubmission {
    /// Team grade per criterion name.
    pub grades: HashMap<String, i32>,
    /// Per-member grades: email → criterion name → grade.
    #[serde(default)]
    pub individual_grades: HashMap<String, HashMap<String, i32>>,
    #[serde(default)]
    pub feedback: Option<String>,
}

// ============================================================================
// Response types
// ============================================================================

/// Slot as attached to event listings.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub slot_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub status: String,
}

impl From<&SlotRow> for SlotView {
    fn from(row: &SlotRow) -> Self {
        SlotView {
            slot_id: row.slot_id,
            starts_at: row.starts_at,
            status: row.status.clone(),
        }
    }
}

/// Event as returned by `list_available_events`: only available slots
/// attached.
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    #[serde(flatten)]
    pub event: EventRow,
    pub available_slots: Vec<SlotView>,
}

/// Full slot detail: binding, raw grades, and per-member totals computed by
/// the grading engine on read.
#[derive(Debug, Clone, Serialize)]
pub struct SlotDetail {
    #[serde(flatten)]
    pub slot: SlotRow,
    pub participants: Vec<Participant>,
    pub grades: HashMap<String, i32>,
    pub individual_grades: HashMap<String, HashMap<String, i32>>,
    pub individual_scores: HashMap<String, i32>,
}

/// Full event detail with criteria schema and every slot.
#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: EventRow,
    pub grading_criteria: Vec<GradingCriterion>,
    pub slots: Vec<SlotDetail>,
}
