//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load stream from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Append events (optimistic concurrency on the loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! This module contains no IO itself; it composes `EventStore` and `EventBus`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use procura_core::{Aggregate, DomainError, ExpectedVersion, TenantId};
use procura_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale aggregate version (another writer got there first).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Cross-tenant or cross-stream data in a loaded stream.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The aggregate rejected the command; nothing was appended.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Historical payload did not deserialize into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl DispatchError {
    /// The domain error, if the aggregate rejected the command.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of a dispatched command: the evolved aggregate and what was written.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are appended before they are published; a failed append publishes
/// nothing. Publication failures after a successful append are returned to
/// the caller, giving at-least-once delivery.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream. A missing stream yields the
    /// fresh instance from `make_aggregate`.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        stream_id: &str,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, stream_id)?;
        validate_loaded_stream(tenant_id, stream_id, &history)?;

        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Run `command` against the current state of the stream.
    ///
    /// `expected` is the version the caller last observed; a mismatch fails
    /// with `Concurrency` before the command is handled. Commands that decide
    /// no events append nothing.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        stream_id: &str,
        stream_type: &str,
        command: &A::Command,
        expected: ExpectedVersion,
        make_aggregate: impl FnOnce() -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, stream_id)?;
        validate_loaded_stream(tenant_id, stream_id, &history)?;
        let current = stream_version(&history);
        if !expected.matches(current) {
            return Err(DispatchError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate();
        apply_history(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let events = aggregate.handle(command)?;

        // 4) Persist + 5) publish
        let committed = self.commit(
            tenant_id,
            stream_id,
            stream_type,
            &events,
            ExpectedVersion::Exact(current),
        )?;

        for ev in &events {
            aggregate.apply(ev);
        }

        Ok(Dispatched {
            aggregate,
            events,
            committed,
        })
    }

    /// Append already-decided events to a stream and publish them.
    pub fn commit<E>(
        &self,
        tenant_id: TenantId,
        stream_id: &str,
        stream_type: &str,
        events: &[E],
        expected: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        E: Event + Serialize,
    {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(tenant_id, stream_id, stream_type, ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    stream_id: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Guard against a backend returning foreign or out-of-order data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.stream_id != stream_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong stream_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
