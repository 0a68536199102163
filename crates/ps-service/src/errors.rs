//! Presentation Service error types.
//!
//! Every failure is scoped to a single operation; no error here is fatal to
//! the process. `Conflict` and `WindowClosed` are retryable by the caller
//! with fresh state, the rest are terminal for that request.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single violated field in a request.
///
/// Validation collects every violation before failing, so callers see the
/// whole list at once rather than one field per round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Presentation Service error type.
#[derive(Debug, Error)]
pub enum PsError {
    /// One or more request fields failed validation. Carries every violation.
    #[error("Validation failed: {}", format_violations(.0))]
    Validation(Vec<FieldViolation>),

    /// The slot is not in the state the operation requires.
    #[error("Invalid transition: cannot {action} a slot in state '{from}'")]
    InvalidTransition { from: String, action: String },

    /// Lost a concurrent claim on the slot.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Participant count outside the event's team size bounds.
    #[error("Capacity violation: expected between {min} and {max} participants, got {actual}")]
    CapacityViolation { min: i32, max: i32, actual: usize },

    /// A participant email appears twice in the request, or already holds a
    /// live booking somewhere in the system.
    #[error("Duplicate participant: {0}")]
    DuplicateParticipant(String),

    /// The operation ran outside its governing time window.
    #[error("Window closed: {0}")]
    WindowClosed(String),

    /// Event or slot not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller's role or identity does not permit the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PsError {
    /// Whether the caller may retry the operation with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PsError::Conflict(_) | PsError::WindowClosed(_))
    }

    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content, so label
    /// cardinality stays bounded.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            PsError::Validation(_) => "validation",
            PsError::InvalidTransition { .. } => "invalid_transition",
            PsError::Conflict(_) => "conflict",
            PsError::CapacityViolation { .. } => "capacity_violation",
            PsError::DuplicateParticipant(_) => "duplicate_participant",
            PsError::WindowClosed(_) => "window_closed",
            PsError::NotFound(_) => "not_found",
            PsError::PermissionDenied(_) => "permission_denied",
            PsError::Database(_) => "database",
            PsError::Config(_) => "config",
        }
    }
}
