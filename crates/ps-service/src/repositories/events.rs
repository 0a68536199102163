//! Events repository for database operations.
//!
//! Event creation persists the event, its criteria schema, and every
//! generated slot in a single transaction; a partially-materialized event is
//! never observable.

use crate::errors::PsError;
use crate::models::{CreateEventRequest, EventRow, GradingCriterion, SlotRow, UpdateEventRequest};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const EVENT_COLUMNS: &str = r#"
    event_id, title, venue, host_email, participation_type,
    team_size_min, team_size_max,
    registration_start, registration_end,
    presentation_start, presentation_end,
    slot_duration_minutes, slot_buffer_minutes,
    daily_start_time, daily_end_time,
    audience_years, audience_schools, audience_departments,
    created_at, updated_at
"#;

const SLOT_COLUMNS: &str = r#"
    slot_id, event_id, starts_at, status, topic, team_name, attachment_ref,
    booked_at, started_at, completed_at, total_score, feedback
"#;

/// Events repository for database operations.
pub struct EventsRepository;

impl EventsRepository {
    /// Create an event together with its criteria schema and the full
    /// pre-materialized slot sequence, atomically.
    #[instrument(skip_all, name = "ps.repo.create_event")]
    pub async fn create_event(
        pool: &PgPool,
        host_email: &str,
        request: &CreateEventRequest,
        criteria: &[GradingCriterion],
        slot_starts: &[DateTime<Utc>],
    ) -> Result<EventRow, PsError> {
        let start = Instant::now();

        let result: Result<EventRow, sqlx::Error> = async {
            let mut tx = pool.begin().await?;

            let event = sqlx::query_as::<_, EventRow>(&format!(
                r#"
                INSERT INTO events (
                    title, venue, host_email, participation_type,
                    team_size_min, team_size_max,
                    registration_start, registration_end,
                    presentation_start, presentation_end,
                    slot_duration_minutes, slot_buffer_minutes,
                    daily_start_time, daily_end_time,
                    audience_years, audience_schools, audience_departments
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                RETURNING {EVENT_COLUMNS}
                "#
            ))
            .bind(request.title.trim())
            .bind(request.venue.trim())
            .bind(host_email)
            .bind(request.participation_type.as_str())
            .bind(request.team_size_min)
            .bind(request.team_size_max)
            .bind(request.registration_start)
            .bind(request.registration_end)
            .bind(request.presentation_start)
            .bind(request.presentation_end)
            .bind(request.slot_config.duration_minutes)
            .bind(request.slot_config.buffer_minutes)
            .bind(request.slot_config.daily_start_time)
            .bind(request.slot_config.daily_end_time)
            .bind(&request.target_audience.years)
            .bind(&request.target_audience.schools)
            .bind(&request.target_audience.departments)
            .fetch_one(&mut *tx)
            .await?;

            for (ordinal, criterion) in criteria.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO grading_criteria (event_id, ordinal, name, weight)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(event.event_id)
                .bind(ordinal as i32)
                .bind(&criterion.name)
                .bind(criterion.weight)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO slots (event_id, starts_at)
                SELECT $1, starts_at FROM UNNEST($2::timestamptz[]) AS t(starts_at)
                "#,
            )
            .bind(event.event_id)
            .bind(slot_starts)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(event)
        }
        .await;

        match result {
            Ok(event) => {
                metrics::record_db_query("create_event", "success", start.elapsed());
                Ok(event)
            }
            Err(e) => {
                metrics::record_db_query("create_event", "error", start.elapsed());
                Err(PsError::Database(format!("Failed to create event: {}", e)))
            }
        }
    }

    /// Get event by id.
    #[instrument(skip_all, name = "ps.repo.get_event")]
    pub async fn get_event(pool: &PgPool, event_id: Uuid) -> Result<Option<EventRow>, PsError> {
        let start = Instant::now();

        let event = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE event_id = $1
            "#
        ))
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_event", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch event: {}", e))
        })?;

        metrics::record_db_query("get_event", "success", start.elapsed());
        Ok(event)
    }

    /// List events whose registration window contains `now` and whose target
    /// audience admits the caller's dimensions.
    ///
    /// An empty audience array is unrestricted; a NULL caller value never
    /// matches a restricted dimension.
    #[instrument(skip_all, name = "ps.repo.list_open_events")]
    pub async fn list_open_for_audience(
        pool: &PgPool,
        now: DateTime<Utc>,
        year: Option<i32>,
        school: Option<&str>,
        department: Option<&str>,
    ) -> Result<Vec<EventRow>, PsError> {
        let start = Instant::now();

        let events = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE registration_start <= $1 AND $1 < registration_end
              AND (cardinality(audience_years) = 0 OR $2::int = ANY(audience_years))
              AND (cardinality(audience_schools) = 0 OR $3::text = ANY(audience_schools))
              AND (cardinality(audience_departments) = 0 OR $4::text = ANY(audience_departments))
            ORDER BY presentation_start, event_id
            "#
        ))
        .bind(now)
        .bind(year)
        .bind(school)
        .bind(department)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("list_open_events", "error", start.elapsed());
            PsError::Database(format!("Failed to list open events: {}", e))
        })?;

        metrics::record_db_query("list_open_events", "success", start.elapsed());
        Ok(events)
    }

    /// Get the ordered criteria schema for an event.
    #[instrument(skip_all, name = "ps.repo.get_criteria")]
    pub async fn get_criteria(
        pool: &PgPool,
        event_id: Uuid,
    ) -> Result<Vec<GradingCriterion>, PsError> {
        let start = Instant::now();

        let rows: Vec<(String, i32)> = sqlx::query_as(
            r#"
            SELECT name, weight
            FROM grading_criteria
            WHERE event_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_criteria", "error", start.elapsed());
            PsError::Database(format!("Failed to fetch criteria: {}", e))
        })?;

        metrics::record_db_query("get_criteria", "success", start.elapsed());
        Ok(rows
            .into_iter()
            .map(|(name, weight)| GradingCriterion { name, weight })
            .collect())
    }

    /// List all slots for an event in start-time order.
    #[instrument(skip_all, name = "ps.repo.list_slots")]
    pub async fn list_slots(pool: &PgPool, event_id: Uuid) -> Result<Vec<SlotRow>, PsError> {
        Self::list_slots_filtered(pool, event_id, None).await
    }

    /// List an event's slots in a given status, in start-time order.
    #[instrument(skip_all, name = "ps.repo.list_slots_by_status")]
    pub async fn list_slots_by_status(
        pool: &PgPool,
        event_id: Uuid,
        status: &str,
    ) -> Result<Vec<SlotRow>, PsError> {
        Self::list_slots_filtered(pool, event_id, Some(status)).await
    }

    async fn list_slots_filtered(
        pool: &PgPool,
        event_id: Uuid,
        status: Option<&str>,
    ) -> Result<Vec<SlotRow>, PsError> {
        let start = Instant::now();

        let slots = sqlx::query_as::<_, SlotRow>(&format!(
            r#"
            SELECT {SLOT_COLUMNS}
            FROM slots
            WHERE event_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY starts_at
            "#
        ))
        .bind(event_id)
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("list_slots", "error", start.elapsed());
            PsError::Database(format!("Failed to list slots: {}", e))
        })?;

        metrics::record_db_query("list_slots", "success", start.elapsed());
        Ok(slots)
    }

    /// Whether the event has at least one slot in the given status.
    #[instrument(skip_all, name = "ps.repo.has_slot_in_status")]
    pub async fn has_slot_in_status(
        pool: &PgPool,
        event_id: Uuid,
        status: &str,
    ) -> Result<bool, PsError> {
        let start = Instant::now();

        let exists: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM slots
                WHERE event_id = $1 AND status = $2
            )
            "#,
        )
        .bind(event_id)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("has_slot_in_status", "error", start.elapsed());
            PsError::Database(format!("Failed to check slot status: {}", e))
        })?;

        metrics::record_db_query("has_slot_in_status", "success", start.elapsed());
        Ok(exists.0)
    }

    /// Apply an update request on top of the stored event.
    ///
    /// Only the mutable columns participate; criteria replacement is a
    /// separate call so the completed-slot freeze can be checked first.
    #[instrument(skip_all, name = "ps.repo.update_event")]
    pub async fn update_event(
        pool: &PgPool,
        event_id: Uuid,
        request: &UpdateEventRequest,
    ) -> Result<Option<EventRow>, PsError> {
        let start = Instant::now();

        let event = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            UPDATE events SET
                title = COALESCE($2, title),
                venue = COALESCE($3, venue),
                registration_start = COALESCE($4, registration_start),
                registration_end = COALESCE($5, registration_end),
                audience_years = COALESCE($6, audience_years),
                audience_schools = COALESCE($7, audience_schools),
                audience_departments = COALESCE($8, audience_departments),
                updated_at = NOW()
            WHERE event_id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(request.title.as_deref().map(str::trim))
        .bind(request.venue.as_deref().map(str::trim))
        .bind(request.registration_start)
        .bind(request.registration_end)
        .bind(request.target_audience.as_ref().map(|a| a.years.clone()))
        .bind(request.target_audience.as_ref().map(|a| a.schools.clone()))
        .bind(
            request
                .target_audience
                .as_ref()
                .map(|a| a.departments.clone()),
        )
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("update_event", "error", start.elapsed());
            PsError::Database(format!("Failed to update event: {}", e))
        })?;

        metrics::record_db_query("update_event", "success", start.elapsed());
        Ok(event)
    }

    /// Replace the criteria schema of an event.
    #[instrument(skip_all, name = "ps.repo.replace_criteria")]
    pub async fn replace_criteria(
        pool: &PgPool,
        event_id: Uuid,
        criteria: &[GradingCriterion],
    ) -> Result<(), PsError> {
        let start = Instant::now();

        let result: Result<(), sqlx::Error> = async {
            let mut tx = pool.begin().await?;

            sqlx::query("DELETE FROM grading_criteria WHERE event_id = $1")
                .bind(event_id)
                .execute(&mut *tx)
                .await?;

            for (ordinal, criterion) in criteria.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO grading_criteria (event_id, ordinal, name, weight)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(event_id)
                .bind(ordinal as i32)
                .bind(&criterion.name)
                .bind(criterion.weight)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                metrics::record_db_query("replace_criteria", "success", start.elapsed());
                Ok(())
            }
            Err(e) => {
                metrics::record_db_query("replace_criteria", "error", start.elapsed());
                Err(PsError::Database(format!(
                    "Failed to replace criteria: {}",
                    e
                )))
            }
        }
    }

    /// Delete an event; slots, participants and grades cascade.
    ///
    /// Returns whether a row was deleted.
    #[instrument(skip_all, name = "ps.repo.delete_event")]
    pub async fn delete_event(pool: &PgPool, event_id: Uuid) -> Result<bool, PsError> {
        let start = Instant::now();

        let result = sqlx::query("DELETE FROM events WHERE event_id = $1")
            .bind(event_id)
            .execute(pool)
            .await
            .map_err(|e| {
                metrics::record_db_query("delete_event", "error", start.elapsed());
                PsError::Database(format!("Failed to delete event: {}", e))
            })?;

        metrics::record_db_query("delete_event", "success", start.elapsed());
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{default_criteria, ParticipationType, SlotConfig, TargetAudience};
    use chrono::{Duration, NaiveTime};

    fn sample_request(now: DateTime<Utc>) -> CreateEventRequest {
        CreateEventRequest {
            title: "Capstone Demos".to_string(),
            venue: "Lab 3".to_string(),
            participation_type: ParticipationType::Team,
            team_size_min: 2,
            team_size_max: 4,
            registration_start: now - Duration::hours(1),
            registration_end: now + Duration::days(2),
            presentation_start: now + Duration::days(7),
            presentation_end: now + Duration::days(7) + Duration::hours(23),
            slot_config: SlotConfig {
                duration_minutes: 15,
                buffer_minutes: 5,
                daily_start_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
                daily_end_time: NaiveTime::from_hms_opt(10, 0, 0).expect("valid time"),
            },
            target_audience: TargetAudience {
                years: vec![4],
                schools: vec![],
                departments: vec![],
            },
            grading_criteria: None,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_event_materializes_criteria_and_slots(pool: PgPool) -> Result<(), PsError> {
        let now = Utc::now();
        let request = sample_request(now);
        let criteria = default_criteria();
        let starts = crate::services::slot_generator::generate(
            request.presentation_start,
            request.presentation_end,
            &request.slot_config,
        )?;

        let event = EventsRepository::create_event(
            &pool,
            "prof@university.edu",
            &request,
            &criteria,
            &starts,
        )
        .await?;

        assert_eq!(event.title, "Capstone Demos");
        assert_eq!(event.participation_type, "team");

        let stored_criteria = EventsRepository::get_criteria(&pool, event.event_id).await?;
        assert_eq!(stored_criteria, criteria);

        let slots = EventsRepository::list_slots(&pool, event.event_id).await?;
        assert_eq!(slots.len(), starts.len());
        assert!(slots.iter().all(|s| s.status == "available"));

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_list_open_for_audience_filters(pool: PgPool) -> Result<(), PsError> {
        let now = Utc::now();
        let request = sample_request(now);
        let starts = crate::services::slot_generator::generate(
            request.presentation_start,
            request.presentation_end,
            &request.slot_config,
        )?;
        EventsRepository::create_event(
            &pool,
            "prof@university.edu",
            &request,
            &default_criteria(),
            &starts,
        )
        .await?;

        // Matching year
        let open =
            EventsRepository::list_open_for_audience(&pool, now, Some(4), None, None).await?;
        assert_eq!(open.len(), 1);

        // Wrong year
        let closed =
            EventsRepository::list_open_for_audience(&pool, now, Some(1), None, None).await?;
        assert!(closed.is_empty());

        // No year supplied against a year-restricted event
        let no_year =
            EventsRepository::list_open_for_audience(&pool, now, None, None, None).await?;
        assert!(no_year.is_empty());

        // Outside the registration window
        let late = EventsRepository::list_open_for_audience(
            &pool,
            now + Duration::days(30),
            Some(4),
            None,
            None,
        )
        .await?;
        assert!(late.is_empty());

        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_delete_event_cascades(pool: PgPool) -> Result<(), PsError> {
        let now = Utc::now();
        let request = sample_request(now);
        let starts = crate::services::slot_generator::generate(
            request.presentation_start,
            request.presentation_end,
            &request.slot_config,
        )?;
        let event = EventsRepository::create_event(
            &pool,
            "prof@university.edu",
            &request,
            &default_criteria(),
            &starts,
        )
        .await?;

        assert!(EventsRepository::delete_event(&pool, event.event_id).await?);
        assert!(EventsRepository::get_event(&pool, event.event_id)
            .await?
            .is_none());
        assert!(EventsRepository::list_slots(&pool, event.event_id)
            .await?
            .is_empty());

        // Deleting again affects nothing.
        assert!(!EventsRepository::delete_event(&pool, event.event_id).await?);

        Ok(())
    }
}
