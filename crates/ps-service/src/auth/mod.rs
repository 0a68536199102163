//! Caller identity for the presentation service.
//!
//! Authentication itself happens in an external collaborator; every
//! operation receives a validated `CallerContext` describing who is calling
//! and which audience dimensions they belong to. This module owns the role
//! model and the role-gate helpers the service layer applies.

use crate::errors::PsError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Roles allowed to create, start, grade and delete presentation events.
const EVENT_MANAGER_ROLES: &[Role] = &[Role::Faculty, Role::Admin];

/// Caller role as supplied by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Faculty,
    Admin,
    Clubs,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
            Role::Admin => "admin",
            Role::Clubs => "clubs",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "admin" => Ok(Role::Admin),
            "clubs" => Ok(Role::Clubs),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Validated caller identity, one per call.
///
/// The audience fields (`year`, `school`, `department`) drive event
/// visibility; `None` means the collaborator had no value for that
/// dimension, which never matches a restricted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub email: String,
    pub role: Role,
    pub year: Option<i32>,
    pub school: Option<String>,
    pub department: Option<String>,
}

impl CallerContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Gate for create_event: faculty and admin only.
pub fn require_event_manager(caller: &CallerContext) -> Result<(), PsError> {
    if EVENT_MANAGER_ROLES.contains(&caller.role) {
        Ok(())
    } else {
        Err(PsError::PermissionDenied(format!(
            "Role '{}' may not manage presentation events",
            caller.role.as_str()
        )))
    }
}

/// Gate for start/grade/update/delete: the event host, or an admin.
pub fn require_host_or_admin(caller: &CallerContext, host_email: &str) -> Result<(), PsError> {
    if caller.is_admin() || caller.email == host_email {
        Ok(())
    } else {
        Err(PsError::PermissionDenied(
            "Only the event host or an admin may perform this operation".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> CallerContext {
        CallerContext {
            email: "caller@university.edu".to_string(),
            role,
            year: None,
            school: None,
            department: None,
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::from_str("student").ok(), Some(Role::Student));
        assert_eq!(Role::from_str("faculty").ok(), Some(Role::Faculty));
        assert_eq!(Role::from_str("admin").ok(), Some(Role::Admin));
        assert_eq!(Role::from_str("clubs").ok(), Some(Role::Clubs));
        assert!(Role::from_str("superuser").is_err());
    }

    #[test]
    fn test_event_manager_gate() {
        assert!(require_event_manager(&caller(Role::Faculty)).is_ok());
        assert!(require_event_manager(&caller(Role::Admin)).is_ok());
        assert!(matches!(
            require_event_manager(&caller(Role::Student)),
            Err(PsError::PermissionDenied(_))
        ));
        assert!(matches!(
            require_event_manager(&caller(Role::Clubs)),
            Err(PsError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_host_or_admin_gate() {
        let host = caller(Role::Faculty);
        assert!(require_host_or_admin(&host, "caller@university.edu").is_ok());
        assert!(require_host_or_admin(&caller(Role::Admin), "other@university.edu").is_ok());
        assert!(matches!(
            require_host_or_admin(&host, "other@university.edu"),
            Err(PsError::PermissionDenied(_))
        ));
    }
}
