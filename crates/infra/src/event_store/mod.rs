//! Append-only event store boundary.
//!
//! Stores and loads tenant-scoped event streams without making any storage
//! assumptions. Carts and orders are each one stream, keyed by lineage id.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
