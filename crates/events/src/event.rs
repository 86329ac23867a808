use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are immutable, versioned facts. Aggregates emit them from `handle`
/// and evolve from them in `apply`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "purchasing.po.received").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
