//! Presentation Service (PS) Library
//!
//! This library provides the presentation booking and grading core: slot
//! generation from a time-window configuration, the booking state machine
//! over a shared Postgres ledger, and weighted score aggregation.
//!
//! The HTTP layer that maps verbs onto these operations, and the
//! authentication collaborator that supplies caller identity, live outside
//! this crate.
//!
//! # Modules
//!
//! - `auth` - Caller identity and role gates
//! - `config` - Service configuration
//! - `errors` - Error types
//! - `models` - Data models
//! - `observability` - Metrics definitions
//! - `repositories` - Database access layer
//! - `services` - Business logic layer

pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod services;
