//! Service layer for the presentation service.
//!
//! # Components
//!
//! - `slot_generator` - Candidate slot sequence generation
//! - `grading` - Weighted score aggregation
//! - `presentation` - Booking and grading orchestration

pub mod grading;
pub mod presentation;
pub mod slot_generator;
