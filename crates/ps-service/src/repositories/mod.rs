//! Repository layer for the presentation service.
//!
//! Provides database access following the Service -> Repository
//! architecture. Every lifecycle mutation is a status-guarded conditional
//! statement so the ledger's invariants hold under concurrent callers; the
//! row is the lock.

pub mod audit;
pub mod events;
pub mod slots;

pub use audit::AuditRepository;
pub use events::EventsRepository;
pub use slots::SlotsRepository;
