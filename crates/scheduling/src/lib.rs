//! Recurrence Scheduler.
//!
//! Pure date math deciding when a templated (recurring or scheduled) cart
//! must spawn a fresh instance. Firing history is an append-only log of
//! `OccurrenceFired` facts rather than a single overwritten timestamp, so
//! double-fire prevention can be audited.

pub mod recurrence;

pub use recurrence::{Frequency, OccurrenceFired, RecurrenceDescriptor};
