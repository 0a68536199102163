//! Observability module for the presentation service.
//!
//! Provides metrics definitions and instrumentation helpers.

pub mod metrics;
