//! Presentation orchestration: event lifecycle, booking, and grading.
//!
//! Operations are stateless over the shared pool. Each mutating operation
//! pre-reads the slot to classify failures precisely, then relies on the
//! repository's status-guarded statement for correctness under concurrency:
//! a precondition that held at pre-read but not at execution time means the
//! caller lost a race and receives `Conflict`.

use crate::auth::{require_event_manager, require_host_or_admin, CallerContext};
use crate::errors::{FieldViolation, PsError};
use crate::models::{
    BookingRequest, CreateEventRequest, EventDetail, EventRow, EventSummary, GradeSubmission,
    GradingCriterion, ParticipationType, SlotDetail, SlotRow, SlotStatus, SlotView,
    UpdateEventRequest,
};
use crate::observability::metrics;
use crate::repositories::{AuditRepository, EventsRepository, SlotsRepository};
use crate::services::{grading, slot_generator};
use chrono::Utc;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Create a presentation event, materializing its criteria schema and the
/// full slot sequence.
///
/// Faculty/admin only. Every violated field is reported at once.
#[instrument(skip_all, name = "ps.service.create_event")]
pub async fn create_event(
    pool: &PgPool,
    caller: &CallerContext,
    request: CreateEventRequest,
) -> Result<EventSummary, PsError> {
    require_event_manager(caller)?;

    let violations = request.validate();
    if !violations.is_empty() {
        metrics::record_event_operation("create", "error");
        return Err(PsError::Validation(violations));
    }

    let slot_starts = slot_generator::generate(
        request.presentation_start,
        request.presentation_end,
        &request.slot_config,
    )?;
    let criteria = request.effective_criteria();

    let event =
        EventsRepository::create_event(pool, &caller.email, &request, &criteria, &slot_starts)
            .await
            .inspect_err(|_| metrics::record_event_operation("create", "error"))?;

    metrics::record_event_operation("create", "success");
    audit(
        pool,
        "event_created",
        Some(event.event_id),
        None,
        caller,
        serde_json::json!({ "slot_count": slot_starts.len() }),
    )
    .await;

    let slots = EventsRepository::list_slots(pool, event.event_id).await?;
    Ok(EventSummary {
        event,
        available_slots: slots.iter().map(SlotView::from).collect(),
    })
}

/// List events open for registration right now whose target audience admits
/// the caller. Only available slots are attached.
#[instrument(skip_all, name = "ps.service.list_available")]
pub async fn list_available_events(
    pool: &PgPool,
    caller: &CallerContext,
) -> Result<Vec<EventSummary>, PsError> {
    let now = Utc::now();
    let events = EventsRepository::list_open_for_audience(
        pool,
        now,
        caller.year,
        caller.school.as_deref(),
        caller.department.as_deref(),
    )
    .await?;

    let mut summaries = Vec::with_capacity(events.len());
    for event in events {
        let slots = EventsRepository::list_slots_by_status(
            pool,
            event.event_id,
            SlotStatus::Available.as_str(),
        )
        .await?;
        summaries.push(EventSummary {
            event,
            available_slots: slots.iter().map(SlotView::from).collect(),
        });
    }
    Ok(summaries)
}

/// Full event detail: criteria schema and every slot with its binding, raw
/// grades, and per-member totals computed by the grading engine.
#[instrument(skip_all, name = "ps.service.get_event")]
pub async fn get_event(pool: &PgPool, event_id: Uuid) -> Result<EventDetail, PsError> {
    let event = EventsRepository::get_event(pool, event_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", event_id)))?;

    let criteria = EventsRepository::get_criteria(pool, event_id).await?;
    let rows = EventsRepository::list_slots(pool, event_id).await?;

    let mut slots = Vec::with_capacity(rows.len());
    for row in rows {
        slots.push(slot_detail(pool, row, &criteria).await?);
    }

    Ok(EventDetail {
        event,
        grading_criteria: criteria,
        slots,
    })
}

/// Book an available slot for a participant set.
///
/// Validates audience eligibility, the registration window, participant
/// count bounds, and participant uniqueness (within the request and against
/// every live booking system-wide) before handing the claim to the ledger.
#[instrument(skip_all, name = "ps.service.book_slot")]
pub async fn book_slot(
    pool: &PgPool,
    caller: &CallerContext,
    event_id: Uuid,
    slot_id: Uuid,
    request: BookingRequest,
) -> Result<SlotDetail, PsError> {
    let started = Instant::now();
    let outcome = book_slot_inner(pool, caller, event_id, slot_id, request).await;

    match &outcome {
        Ok(_) => metrics::record_booking_decision("booked", started.elapsed()),
        Err(e) => {
            warn!(
                target: "ps.services.presentation",
                slot_id = %slot_id,
                error = %e,
                retryable = e.is_retryable(),
                "Booking refused"
            );
            metrics::record_booking_decision(e.error_type_label(), started.elapsed());
        }
    }
    outcome
}

async fn book_slot_inner(
    pool: &PgPool,
    caller: &CallerContext,
    event_id: Uuid,
    slot_id: Uuid,
    request: BookingRequest,
) -> Result<SlotDetail, PsError> {
    let event = EventsRepository::get_event(pool, event_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", event_id)))?;

    if !caller.is_admin() && !event.target_audience().matches(caller) {
        return Err(PsError::PermissionDenied(
            "Event is not open to your audience".to_string(),
        ));
    }

    let now = Utc::now();
    if !event.registration_open_at(now) {
        return Err(PsError::WindowClosed(
            "Registration window is not open".to_string(),
        ));
    }

    let mut violations = Vec::new();
    if request.topic.trim().is_empty() {
        violations.push(FieldViolation::new("topic", "must not be empty"));
    }
    if !violations.is_empty() {
        return Err(PsError::Validation(violations));
    }

    let (min, max) = match event.participation_type()? {
        ParticipationType::Individual => (1, 1),
        ParticipationType::Team => (event.team_size_min, event.team_size_max),
    };
    let count = request.participants.len();
    if count < min as usize || count > max as usize {
        return Err(PsError::CapacityViolation {
            min,
            max,
            actual: count,
        });
    }

    // Duplicates within the request itself.
    let mut emails: Vec<&str> = Vec::with_capacity(count);
    for participant in &request.participants {
        let email = participant.email.as_str();
        if emails.contains(&email) {
            return Err(PsError::DuplicateParticipant(email.to_string()));
        }
        emails.push(email);
    }

    let slot = SlotsRepository::get_slot(pool, slot_id)
        .await?
        .filter(|s| s.event_id == event_id)
        .ok_or_else(|| PsError::NotFound(format!("Slot {} not found", slot_id)))?;

    let status = slot.status()?;
    if !status.can_transition_to(SlotStatus::Booked) {
        return Err(PsError::InvalidTransition {
            from: status.as_str().to_string(),
            action: "book".to_string(),
        });
    }

    // Advisory cross-event check; the unique index has the final word.
    let owned: Vec<String> = emails.iter().map(|e| e.to_string()).collect();
    let live = SlotsRepository::find_live_emails(pool, &owned).await?;
    if let Some(email) = live.into_iter().next() {
        return Err(PsError::DuplicateParticipant(email));
    }

    let booked = SlotsRepository::book(
        pool,
        slot_id,
        request.topic.trim(),
        request.team_name.as_deref(),
        request.attachment_ref.as_deref(),
        &request.participants,
    )
    .await?
    .ok_or_else(|| {
        // The slot was available a moment ago; someone else claimed it.
        PsError::Conflict("Slot was claimed by a concurrent booking".to_string())
    })?;

    audit(
        pool,
        "slot_booked",
        Some(event_id),
        Some(slot_id),
        caller,
        serde_json::json!({ "participant_count": count }),
    )
    .await;

    let criteria = EventsRepository::get_criteria(pool, event_id).await?;
    slot_detail(pool, booked, &criteria).await
}

/// Cancel a booking, returning the slot to the available pool and releasing
/// its participants' emails. Only a bound participant or an admin may cancel.
#[instrument(skip_all, name = "ps.service.cancel_booking")]
pub async fn cancel_booking(
    pool: &PgPool,
    caller: &CallerContext,
    slot_id: Uuid,
) -> Result<SlotRow, PsError> {
    let slot = SlotsRepository::get_slot(pool, slot_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Slot {} not found", slot_id)))?;

    let status = slot.status()?;
    if !status.can_transition_to(SlotStatus::Available) {
        return Err(PsError::InvalidTransition {
            from: status.as_str().to_string(),
            action: "cancel".to_string(),
        });
    }

    if !caller.is_admin() {
        let participants = SlotsRepository::get_participants(pool, slot_id).await?;
        if !participants.iter().any(|p| p.email == caller.email) {
            return Err(PsError::PermissionDenied(
                "Only a bound participant or an admin may cancel this booking".to_string(),
            ));
        }
    }

    let cancelled = SlotsRepository::cancel(pool, slot_id)
        .await?
        .ok_or_else(|| PsError::Conflict("Booking changed state concurrently".to_string()))?;

    audit(
        pool,
        "booking_cancelled",
        Some(slot.event_id),
        Some(slot_id),
        caller,
        serde_json::Value::Null,
    )
    .await;

    Ok(cancelled)
}

/// Move a booked slot to in_progress. Host/admin only; the presentation
/// window must contain "now".
#[instrument(skip_all, name = "ps.service.start_slot")]
pub async fn start_slot(
    pool: &PgPool,
    caller: &CallerContext,
    slot_id: Uuid,
) -> Result<SlotRow, PsError> {
    let (slot, event) = load_slot_and_event(pool, slot_id).await?;
    require_host_or_admin(caller, &event.host_email)?;

    let status = slot.status()?;
    if !status.can_transition_to(SlotStatus::InProgress) {
        return Err(PsError::InvalidTransition {
            from: status.as_str().to_string(),
            action: "start".to_string(),
        });
    }

    if !event.presentation_window_contains(Utc::now()) {
        return Err(PsError::WindowClosed(
            "Presentation window is not open".to_string(),
        ));
    }

    let started = SlotsRepository::start(pool, slot_id)
        .await?
        .ok_or_else(|| PsError::Conflict("Slot changed state concurrently".to_string()))?;

    audit(
        pool,
        "slot_started",
        Some(event.event_id),
        Some(slot_id),
        caller,
        serde_json::Value::Null,
    )
    .await;

    Ok(started)
}

/// Grade an in-progress slot, completing it. Host/admin only.
///
/// All-or-nothing: any unknown criterion, out-of-range score, or grade for
/// an unbound member rejects the entire submission; nothing is clamped.
#[instrument(skip_all, name = "ps.service.submit_grades")]
pub async fn submit_grades(
    pool: &PgPool,
    caller: &CallerContext,
    slot_id: Uuid,
    submission: GradeSubmission,
) -> Result<SlotDetail, PsError> {
    let (slot, event) = load_slot_and_event(pool, slot_id).await?;
    require_host_or_admin(caller, &event.host_email).inspect_err(|e| {
        metrics::record_grading("error", Some(e.error_type_label()));
    })?;

    let status = slot.status()?;
    if !status.can_transition_to(SlotStatus::Completed) {
        metrics::record_grading("error", Some("invalid_transition"));
        return Err(PsError::InvalidTransition {
            from: status.as_str().to_string(),
            action: "grade".to_string(),
        });
    }

    let criteria = EventsRepository::get_criteria(pool, event.event_id).await?;
    let participants = SlotsRepository::get_participants(pool, slot_id).await?;

    let violations = validate_submission(&submission, &criteria, &participants);
    if !violations.is_empty() {
        metrics::record_grading("error", Some("validation"));
        return Err(PsError::Validation(violations));
    }

    let total_score = grading::team_score(&submission.grades, &criteria);

    let completed = SlotsRepository::complete(
        pool,
        slot_id,
        total_score,
        submission.feedback.as_deref(),
        &submission.grades,
        &submission.individual_grades,
    )
    .await?
    .ok_or_else(|| {
        metrics::record_grading("error", Some("conflict"));
        PsError::Conflict("Slot changed state concurrently".to_string())
    })?;

    metrics::record_grading("success", None);
    audit(
        pool,
        "slot_graded",
        Some(event.event_id),
        Some(slot_id),
        caller,
        serde_json::json!({ "total_score": total_score }),
    )
    .await;

    slot_detail(pool, completed, &criteria).await
}

/// Update an event's mutable fields. Host/admin only.
///
/// The criteria schema may be replaced only while no slot is completed;
/// historical grading is never silently discarded.
#[instrument(skip_all, name = "ps.service.update_event")]
pub async fn update_event(
    pool: &PgPool,
    caller: &CallerContext,
    event_id: Uuid,
    request: UpdateEventRequest,
) -> Result<EventRow, PsError> {
    let event = EventsRepository::get_event(pool, event_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", event_id)))?;
    require_host_or_admin(caller, &event.host_email)?;

    let mut violations = request.validate(&event);

    if request.grading_criteria.is_some()
        && EventsRepository::has_slot_in_status(pool, event_id, SlotStatus::Completed.as_str())
            .await?
    {
        violations.push(FieldViolation::new(
            "grading_criteria",
            "cannot be changed once a slot has been completed",
        ));
    }

    if !violations.is_empty() {
        metrics::record_event_operation("update", "error");
        return Err(PsError::Validation(violations));
    }

    let updated = EventsRepository::update_event(pool, event_id, &request)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", event_id)))?;

    if let Some(criteria) = &request.grading_criteria {
        EventsRepository::replace_criteria(pool, event_id, criteria).await?;
    }

    metrics::record_event_operation("update", "success");
    audit(
        pool,
        "event_updated",
        Some(event_id),
        None,
        caller,
        serde_json::Value::Null,
    )
    .await;

    Ok(updated)
}

/// Delete an event and everything under it. Host/admin only.
///
/// Refuses while any slot is in_progress unless `force` is set.
#[instrument(skip_all, name = "ps.service.delete_event")]
pub async fn delete_event(
    pool: &PgPool,
    caller: &CallerContext,
    event_id: Uuid,
    force: bool,
) -> Result<(), PsError> {
    let event = EventsRepository::get_event(pool, event_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", event_id)))?;
    require_host_or_admin(caller, &event.host_email)?;

    if !force
        && EventsRepository::has_slot_in_status(pool, event_id, SlotStatus::InProgress.as_str())
            .await?
    {
        metrics::record_event_operation("delete", "error");
        warn!(
            target: "ps.services.presentation",
            event_id = %event_id,
            "Delete refused while a presentation is in progress"
        );
        return Err(PsError::Conflict(
            "A presentation is in progress; retry later or force".to_string(),
        ));
    }

    if !EventsRepository::delete_event(pool, event_id).await? {
        return Err(PsError::NotFound(format!("Event {} not found", event_id)));
    }

    metrics::record_event_operation("delete", "success");
    audit(
        pool,
        "event_deleted",
        Some(event_id),
        None,
        caller,
        serde_json::json!({ "force": force }),
    )
    .await;

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

async fn load_slot_and_event(
    pool: &PgPool,
    slot_id: Uuid,
) -> Result<(SlotRow, EventRow), PsError> {
    let slot = SlotsRepository::get_slot(pool, slot_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Slot {} not found", slot_id)))?;
    let event = EventsRepository::get_event(pool, slot.event_id)
        .await?
        .ok_or_else(|| PsError::NotFound(format!("Event {} not found", slot.event_id)))?;
    Ok((slot, event))
}

/// Collect every violation in a grade submission.
fn validate_submission(
    submission: &GradeSubmission,
    criteria: &[GradingCriterion],
    participants: &[crate::models::Participant],
) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    for (criterion, &score) in &submission.grades {
        if !criteria.iter().any(|c| &c.name == criterion) {
            violations.push(FieldViolation::new(
                "grades",
                format!("unknown criterion '{}'", criterion),
            ));
        }
        if !(0..=100).contains(&score) {
            violations.push(FieldViolation::new(
                "grades",
                format!("score for '{}' must be within 0..=100, got {}", criterion, score),
            ));
        }
    }

    for (email, member_grades) in &submission.individual_grades {
        if !participants.iter().any(|p| &p.email == email) {
            violations.push(FieldViolation::new(
                "individual_grades",
                format!("'{}' is not bound to this slot", email),
            ));
        }
        for (criterion, &score) in member_grades {
            if !criteria.iter().any(|c| &c.name == criterion) {
                violations.push(FieldViolation::new(
                    "individual_grades",
                    format!("unknown criterion '{}' for '{}'", criterion, email),
                ));
            }
            if !(0..=100).contains(&score) {
                violations.push(FieldViolation::new(
                    "individual_grades",
                    format!(
                        "score for '{}' of '{}' must be within 0..=100, got {}",
                        criterion, email, score
                    ),
                ));
            }
        }
    }

    violations
}

async fn slot_detail(
    pool: &PgPool,
    slot: SlotRow,
    criteria: &[GradingCriterion],
) -> Result<SlotDetail, PsError> {
    let participants = SlotsRepository::get_participants(pool, slot.slot_id).await?;
    let grades = SlotsRepository::get_grades(pool, slot.slot_id).await?;
    let individual_grades = SlotsRepository::get_individual_grades(pool, slot.slot_id).await?;

    let individual_scores = participants
        .iter()
        .map(|p| {
            (
                p.email.clone(),
                grading::individual_score(&p.email, &individual_grades, criteria),
            )
        })
        .collect();

    Ok(SlotDetail {
        slot,
        participants,
        grades,
        individual_grades,
        individual_scores,
    })
}

/// Append an audit record; failures are logged and never block the
/// operation they describe.
async fn audit(
    pool: &PgPool,
    action: &str,
    event_id: Option<Uuid>,
    slot_id: Option<Uuid>,
    caller: &CallerContext,
    details: serde_json::Value,
) {
    if let Err(e) =
        AuditRepository::record(pool, action, event_id, slot_id, &caller.email, details).await
    {
        warn!(
            target: "ps.services.presentation",
            action = action,
            error = %e,
            "Failed to record audit event"
        );
    }
}
