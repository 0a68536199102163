//! Slot ledger repository: the booking state machine's storage layer.
//!
//! Every lifecycle mutation is a single UPDATE guarded by the expected
//! current status. Zero rows updated means the precondition did not hold at
//! execution time; the service layer classifies that against its pre-read.
//! The global unique index on participant emails is the authoritative
//! cross-event "one live booking per participant" constraint; the service's
//! pre-check is advisory only.

use crate::errors::PsError;
use crate::models::{Participant, ParticipantInput, SlotRow};
use crate::observability::metrics;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const SLOT_COLUMNS: &str = r#"
    slot_id, event_id, starts_at, status, topic, team_name, attachment_ref,
    booked_at, started_at, completed_at, total_score, feedback
"#;

/// Name of the unique index enforcing one live booking per email.
const EMAIL_UNIQUE_INDEX: &str = "slot_participants_email_unique";

/// Slots repository for database operations.
pub struct SlotsRepository;

impl SlotsRepository {
    /// Get slot by id.
    #[instrument(skip_all, name = "ps.repo.get_slot")]
    pub async fn get_slot(pool: &PgPool, slot_id: Uuid) -> Result<Option<SlotRow>, PsError> {
        let start = Instant::now();

        let slot = sqlx::query_as::<_, SlotRow>(&format!(
            r#"
            SELECT {SLOT_COLUMNS}
            FROM slots
            WHERE slot_id = $1
            "#
        ))
        .bind(slot_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_slot", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch slot: {}", e))
        })?;

        metrics::record_db_query("get_slot", "success", start.elapsed());
        Ok(slot)
    }

    /// Get the participants bound to a slot, team lead first.
    #[instrument(skip_all, name = "ps.repo.get_participants")]
    pub async fn get_participants(
        pool: &PgPool,
        slot_id: Uuid,
    ) -> Result<Vec<Participant>, PsError> {
        let start = Instant::now();

        let participants = sqlx::query_as::<_, Participant>(
            r#"
            SELECT email, display_name, roll_number, ordinal
            FROM slot_participants
            WHERE slot_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(slot_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_participants", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch participants: {}", e))
        })?;

        metrics::record_db_query("get_participants", "success", start.elapsed());
        Ok(participants)
    }

    /// Advisory pre-check: which of these emails already hold a live booking
    /// anywhere in the system. The unique index remains authoritative.
    #[instrument(skip_all, name = "ps.repo.find_live_emails")]
    pub async fn find_live_emails(
        pool: &PgPool,
        emails: &[String],
    ) -> Result<Vec<String>, PsError> {
        let start = Instant::now();

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT email
            FROM slot_participants
            WHERE email = ANY($1)
            ORDER BY email
            "#,
        )
        .bind(emails)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_live_emails", "error", start.elapsed());
            PsError::Database(format!("Failed to check live bookings: {}", e))
        })?;

        metrics::record_db_query("find_live_emails", "success", start.elapsed());
        Ok(rows.into_iter().map(|(email,)| email).collect())
    }

    /// available → booked. Binds topic, team name, attachment and the
    /// participant set in one transaction.
    ///
    /// Returns `Ok(None)` when the status guard matched nothing (the slot is
    /// no longer available). A unique-violation on the participant email
    /// index rolls the booking back and surfaces as `DuplicateParticipant`.
    #[instrument(skip_all, name = "ps.repo.book")]
    pub async fn book(
        pool: &PgPool,
        slot_id: Uuid,
        topic: &str,
        team_name: Option<&str>,
        attachment_ref: Option<&str>,
        participants: &[ParticipantInput],
    ) -> Result<Option<SlotRow>, PsError> {
        let start = Instant::now();

        let result: Result<Option<SlotRow>, PsError> = async {
            let mut tx = pool
                .begin()
                .await
                .map_err(|e| PsError::Database(format!("Failed to begin booking: {}", e)))?;

            let slot = sqlx::query_as::<_, SlotRow>(&format!(
                r#"
                UPDATE slots
                SET status = 'booked',
                    topic = $2,
                    team_name = $3,
                    attachment_ref = $4,
                    booked_at = NOW()
                WHERE slot_id = $1 AND status = 'available'
                RETURNING {SLOT_COLUMNS}
                "#
            ))
            .bind(slot_id)
            .bind(topic)
            .bind(team_name)
            .bind(attachment_ref)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| PsError::Database(format!("Failed to book slot: {}", e)))?;

            let Some(slot) = slot else {
                return Ok(None);
            };

            for (ordinal, participant) in participants.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO slot_participants (slot_id, email, display_name, roll_number, ordinal)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(slot_id)
                .bind(&participant.email)
                .bind(&participant.display_name)
                .bind(&participant.roll_number)
                .bind(ordinal as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if e.to_string().contains(EMAIL_UNIQUE_INDEX) {
                        PsError::DuplicateParticipant(participant.email.clone())
                    } else {
                        PsError::Database(format!("Failed to bind participant: {}", e))
                    }
                })?;
            }

            tx.commit()
                .await
                .map_err(|e| PsError::Database(format!("Failed to commit booking: {}", e)))?;
            Ok(Some(slot))
        }
        .await;

        match &result {
            Ok(Some(_)) => metrics::record_db_query("book_slot", "success", start.elapsed()),
            _ => metrics::record_db_query("book_slot", "error", start.elapsed()),
        }
        result
    }

    /// booked → available. Clears every binding column and releases the
    /// participants' emails.
    ///
    /// Returns `Ok(None)` when the status guard matched nothing.
    #[instrument(skip_all, name = "ps.repo.cancel")]
    pub async fn cancel(pool: &PgPool, slot_id: Uuid) -> Result<Option<SlotRow>, PsError> {
        let start = Instant::now();

        let result: Result<Option<SlotRow>, sqlx::Error> = async {
            let mut tx = pool.begin().await?;

            let slot = sqlx::query_as::<_, SlotRow>(&format!(
                r#"
                UPDATE slots
                SET status = 'available',
                    topic = NULL,
                    team_name = NULL,
                    attachment_ref = NULL,
                    booked_at = NULL
                WHERE slot_id = $1 AND status = 'booked'
                RETURNING {SLOT_COLUMNS}
                "#
            ))
            .bind(slot_id)
            .fetch_optional(&mut *tx)
            .await?;

            if slot.is_some() {
                sqlx::query("DELETE FROM slot_participants WHERE slot_id = $1")
                    .bind(slot_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(slot)
        }
        .await;

        match result {
            Ok(slot) => {
                metrics::record_db_query("cancel_booking", "success", start.elapsed());
                Ok(slot)
            }
            Err(e) => {
                metrics::record_db_query("cancel_booking", "error", start.elapsed());
                Err(PsError::Database(format!("Failed to cancel booking: {}", e)))
            }
        }
    }

    /// booked → in_progress.
    ///
    /// Returns `Ok(None)` when the status guard matched nothing.
    #[instrument(skip_all, name = "ps.repo.start")]
    pub async fn start(pool: &PgPool, slot_id: Uuid) -> Result<Option<SlotRow>, PsError> {
        let start = Instant::now();

        let slot = sqlx::query_as::<_, SlotRow>(&format!(
            r#"
            UPDATE slots
            SET status = 'in_progress', started_at = NOW()
            WHERE slot_id = $1 AND status = 'booked'
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(slot_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("start_slot", "error", start.elapsed());
            PsError::Database(format!("Failed to start slot: {}", e))
        })?;

        metrics::record_db_query("start_slot", "success", start.elapsed());
        Ok(slot)
    }

    /// in_progress → completed. Persists the team total, feedback, and every
    /// grade row in one transaction. Terminal.
    ///
    /// Returns `Ok(None)` when the status guard matched nothing.
    #[instrument(skip_all, name = "ps.repo.complete")]
    pub async fn complete(
        pool: &PgPool,
        slot_id: Uuid,
        total_score: i32,
        feedback: Option<&str>,
        grades: &HashMap<String, i32>,
        individual_grades: &HashMap<String, HashMap<String, i32>>,
    ) -> Result<Option<SlotRow>, PsError> {
        let start = Instant::now();

        let result: Result<Option<SlotRow>, sqlx::Error> = async {
            let mut tx = pool.begin().await?;

            let slot = sqlx::query_as::<_, SlotRow>(&format!(
                r#"
                UPDATE slots
                SET status = 'completed',
                    completed_at = NOW(),
                    total_score = $2,
                    feedback = $3
                WHERE slot_id = $1 AND status = 'in_progress'
                RETURNING {SLOT_COLUMNS}
                "#
            ))
            .bind(slot_id)
            .bind(total_score)
            .bind(feedback)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(slot) = slot else {
                return Ok(None);
            };

            for (criterion, score) in grades {
                sqlx::query(
                    r#"
                    INSERT INTO slot_grades (slot_id, criterion, score)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(slot_id)
                .bind(criterion)
                .bind(score)
                .execute(&mut *tx)
                .await?;
            }

            for (email, member_grades) in individual_grades {
                for (criterion, score) in member_grades {
                    sqlx::query(
                        r#"
                        INSERT INTO slot_individual_grades (slot_id, email, criterion, score)
                        VALUES ($1, $2, $3, $4)
                        "#,
                    )
                    .bind(slot_id)
                    .bind(email)
                    .bind(criterion)
                    .bind(score)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            tx.commit().await?;
            Ok(Some(slot))
        }
        .await;

        match result {
            Ok(slot) => {
                metrics::record_db_query("complete_slot", "success", start.elapsed());
                Ok(slot)
            }
            Err(e) => {
                metrics::record_db_query("complete_slot", "error", start.elapsed());
                Err(PsError::Database(format!("Failed to complete slot: {}", e)))
            }
        }
    }

    /// Team grades recorded for a slot.
    #[instrument(skip_all, name = "ps.repo.get_grades")]
    pub async fn get_grades(
        pool: &PgPool,
        slot_id: Uuid,
    ) -> Result<HashMap<String, i32>, PsError> {
        let start = Instant::now();

        let rows: Vec<(String, i32)> = sqlx::query_as(
            r#"
            SELECT criterion, score
            FROM slot_grades
            WHERE slot_id = $1
            "#,
        )
        .bind(slot_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_grades", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch grades: {}", e))
        })?;

        metrics::record_db_query("get_grades", "success", start.elapsed());
        Ok(rows.into_iter().collect())
    }

    /// Per-member grades recorded for a slot: email → criterion → score.
    #[instrument(skip_all, name = "ps.repo.get_individual_grades")]
    pub async fn get_individual_grades(
        pool: &PgPool,
        slot_id: Uuid,
    ) -> Result<HashMap<String, HashMap<String, i32>>, PsError> {
        let start = Instant::now();

        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            r#"
            SELECT email, criterion, score
            FROM slot_individual_grades
            WHERE slot_id = $1
            "#,
        )
        .bind(slot_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_individual_grades", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch individual grades: {}", e))
        })?;

        metrics::record_db_query("get_individual_grades", "success", start.elapsed());

        let mut by_email: HashMap<String, HashMap<String, i32>> = HashMap::new();
        for (email, criterion, score) in rows {
            by_email.entry(email).or_default().insert(criterion, score);
        }
        Ok(by_email)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{
        default_criteria, CreateEventRequest, ParticipationType, SlotConfig, TargetAudience,
    };
    use crate::repositories::EventsRepository;
    use chrono::{DateTime, Duration, NaiveTime, Utc};

    async fn seed_event(pool: &PgPool) -> (Uuid, Vec<SlotRow>) {
        let now = Utc::now();
        let request = CreateEventRequest {
            title: "Ledger Test Event".to_string(),
            venue: "Room 12".to_string(),
            participation_type: ParticipationType::Team,
            team_size_min: 1,
            team_size_max: 4,
            registration_start: now - Duration::hours(1),
            registration_end: now + Duration::days(2),
            presentation_start: now - Duration::hours(1),
            presentation_end: now + Duration::days(1),
            slot_config: SlotConfig {
                duration_minutes: 15,
                buffer_minutes: 5,
                daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
                daily_end_time: NaiveTime::from_hms_opt(10, 0, 0).expect("valid time"),
            },
            target_audience: TargetAudience::default(),
            grading_criteria: None,
        };
        let starts: Vec<DateTime<Utc>> = crate::services::slot_generator::generate(
            request.presentation_start,
            request.presentation_end,
            &request.slot_config,
        )
        .expect("valid config");
        let event = EventsRepository::create_event(
            pool,
            "prof@university.edu",
            &request,
            &default_criteria(),
            &starts,
        )
        .await
        .expect("event should persist");
        let slots = EventsRepository::list_slots(pool, event.event_id)
            .await
            .expect("slots should list");
        (event.event_id, slots)
    }

    fn participant(email: &str) -> ParticipantInput {
        ParticipantInput {
            email: email.to_string(),
            display_name: "Test Participant".to_string(),
            roll_number: None,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_book_binds_and_guards(pool: PgPool) {
        let (_event_id, slots) = seed_event(&pool).await;
        let slot_id = slots.first().expect("at least one slot").slot_id;

        let booked = SlotsRepository::book(
            &pool,
            slot_id,
            "Distributed Caching",
            Some("Team Rocket"),
            None,
            &[participant("a@university.edu"), participant("b@university.edu")],
        )
        .await
        .expect("booking should not error")
        .expect("guard should match an available slot");

        assert_eq!(booked.status, "booked");
        assert!(booked.booked_at.is_some());
        assert_eq!(booked.topic.as_deref(), Some("Distributed Caching"));

        // Guard no longer matches.
        let again = SlotsRepository::book(
            &pool,
            slot_id,
            "Another Topic",
            None,
            None,
            &[participant("c@university.edu")],
        )
        .await
        .expect("booking should not error");
        assert!(again.is_none());

        let participants = SlotsRepository::get_participants(&pool, slot_id)
            .await
            .expect("participants should list");
        assert_eq!(participants.len(), 2);
        assert_eq!(
            participants.first().map(|p| p.ordinal),
            Some(0),
            "submission order becomes ordinal, lead first"
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_email_rolls_back_booking(pool: PgPool) {
        let (_event_id, slots) = seed_event(&pool).await;
        let mut iter = slots.iter();
        let first = iter.next().expect("slot").slot_id;
        let second = iter.next().expect("slot").slot_id;

        SlotsRepository::book(&pool, first, "Topic A", None, None, &[participant("dup@university.edu")])
            .await
            .expect("booking should not error")
            .expect("first booking succeeds");

        let result = SlotsRepository::book(
            &pool,
            second,
            "Topic B",
            None,
            None,
            &[participant("fresh@university.edu"), participant("dup@university.edu")],
        )
        .await;

        assert!(
            matches!(result, Err(PsError::DuplicateParticipant(email)) if email == "dup@university.edu")
        );

        // The failed booking rolled back completely: slot is available again
        // and the fresh email holds nothing.
        let slot = SlotsRepository::get_slot(&pool, second)
            .await
            .expect("slot should fetch")
            .expect("slot exists");
        assert_eq!(slot.status, "available");
        let live = SlotsRepository::find_live_emails(&pool, &["fresh@university.edu".to_string()])
            .await
            .expect("check should not error");
        assert!(live.is_empty());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_cancel_releases_emails(pool: PgPool) {
        let (_event_id, slots) = seed_event(&pool).await;
        let slot_id = slots.first().expect("slot").slot_id;

        SlotsRepository::book(&pool, slot_id, "Topic", None, None, &[participant("x@university.edu")])
            .await
            .expect("booking should not error")
            .expect("booking succeeds");

        let cancelled = SlotsRepository::cancel(&pool, slot_id)
            .await
            .expect("cancel should not error")
            .expect("guard should match a booked slot");
        assert_eq!(cancelled.status, "available");
        assert!(cancelled.topic.is_none());
        assert!(cancelled.booked_at.is_none());

        let live = SlotsRepository::find_live_emails(&pool, &["x@university.edu".to_string()])
            .await
            .expect("check should not error");
        assert!(live.is_empty());

        // Cancelling an available slot matches nothing.
        let again = SlotsRepository::cancel(&pool, slot_id)
            .await
            .expect("cancel should not error");
        assert!(again.is_none());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_full_lifecycle_to_completed(pool: PgPool) {
        let (_event_id, slots) = seed_event(&pool).await;
        let slot_id = slots.first().expect("slot").slot_id;

        // Start before booking matches nothing.
        assert!(SlotsRepository::start(&pool, slot_id)
            .await
            .expect("start should not error")
            .is_none());

        SlotsRepository::book(&pool, slot_id, "Topic", None, None, &[participant("y@university.edu")])
            .await
            .expect("booking should not error")
            .expect("booking succeeds");

        let started = SlotsRepository::start(&pool, slot_id)
            .await
            .expect("start should not error")
            .expect("guard should match a booked slot");
        assert_eq!(started.status, "in_progress");
        assert!(started.started_at.is_some());

        let grades = HashMap::from([("Content".to_string(), 80), ("Delivery".to_string(), 90)]);
        let individual = HashMap::from([(
            "y@university.edu".to_string(),
            HashMap::from([("Content".to_string(), 85)]),
        )]);

        let completed = SlotsRepository::complete(&pool, slot_id, 85, Some("Solid work"), &grades, &individual)
            .await
            .expect("complete should not error")
            .expect("guard should match an in_progress slot");
        assert_eq!(completed.status, "completed");
        assert_eq!(completed.total_score, Some(85));
        assert!(completed.completed_at.is_some());

        assert_eq!(
            SlotsRepository::get_grades(&pool, slot_id)
                .await
                .expect("grades should fetch"),
            grades
        );
        assert_eq!(
            SlotsRepository::get_individual_grades(&pool, slot_id)
                .await
                .expect("individual grades should fetch"),
            individual
        );

        // Completed is terminal: no guard matches it.
        assert!(SlotsRepository::start(&pool, slot_id)
            .await
            .expect("start should not error")
            .is_none());
        assert!(SlotsRepository::cancel(&pool, slot_id)
            .await
            .expect("cancel should not error")
            .is_none());
        assert!(SlotsRepository::complete(&pool, slot_id, 1, None, &HashMap::new(), &HashMap::new())
            .await
            .expect("complete should not error")
            .is_none());
    }
}
