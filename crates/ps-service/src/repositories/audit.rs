//! Audit trail repository.
//!
//! Fire-and-forget: callers log failures at warn level and never let an
//! audit write block the operation it records.

use crate::errors::PsError;
use crate::observability::metrics;
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Audit repository for database operations.
pub struct AuditRepository;

impl AuditRepository {
    /// Append one audit record for a state-changing operation.
    #[instrument(skip_all, name = "ps.repo.audit")]
    pub async fn record(
        pool: &PgPool,
        action: &str,
        event_id: Option<Uuid>,
        slot_id: Option<Uuid>,
        actor_email: &str,
        details: serde_json::Value,
    ) -> Result<(), PsError> {
        let start = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO audit_events (action, event_id, slot_id, actor_email, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(action)
        .bind(event_id)
        .bind(slot_id)
        .bind(actor_email)
        .bind(details)
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("audit_record", "error", start.elapsed());
            PsError::Database(format!("Failed to record audit event: {}", e))
        })?;

        metrics::record_db_query("audit_record", "success", start.elapsed());
        Ok(())
    }
}
