//! Tenant-partitioned in-memory event store keyed by lineage id.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use procura_core::{ExpectedVersion, TenantId};
use procura_identity::{IdKind, LineageId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
struct Stream {
    stream_type: String,
    events: Vec<StoredEvent>,
}

impl Stream {
    fn version(&self) -> u64 {
        self.events.last().map_or(0, |e| e.sequence_number)
    }
}

/// One tenant's streams, plus which lineage kind each stream type holds.
#[derive(Debug, Default)]
struct Partition {
    streams: HashMap<String, Stream>,
    kinds: HashMap<String, IdKind>,
}

impl Partition {
    /// A stream type holds one lineage kind only (`carts.cart` never holds an
    /// `ORD-` stream).
    fn check_kind(&self, stream_type: &str, lineage: &LineageId) -> Result<(), EventStoreError> {
        match self.kinds.get(stream_type) {
            Some(kind) if *kind != lineage.kind => Err(EventStoreError::StreamTypeMismatch(format!(
                "'{stream_type}' holds {}- streams, attempted append to {lineage}",
                kind.prefix()
            ))),
            _ => Ok(()),
        }
    }
}

/// In-memory append-only event store for tests and single-process use.
///
/// Streams are partitioned by tenant, so one tenant can never read or extend
/// another's stream even under an identical lineage id. Stream ids must parse
/// as lineage ids.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    tenants: RwLock<HashMap<TenantId, Partition>>,
}

/// Where a validated batch goes.
struct Target {
    tenant_id: TenantId,
    stream_id: String,
    stream_type: String,
    lineage: LineageId,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TenantId, Partition>>, EventStoreError> {
        self.tenants
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantId, Partition>>, EventStoreError> {
        self.tenants
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))
    }
}

/// Every event in a batch must target the first event's tenant, stream and
/// stream type, and the stream id must be a lineage id.
fn target_of(events: &[UncommittedEvent]) -> Result<Option<Target>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(None);
    };

    if let Some(idx) = events.iter().position(|e| e.tenant_id != first.tenant_id) {
        return Err(EventStoreError::TenantIsolation(format!(
            "batch mixes tenants (index {idx})"
        )));
    }
    if let Some(idx) = events.iter().position(|e| e.stream_id != first.stream_id) {
        return Err(EventStoreError::InvalidAppend(format!(
            "batch spans streams {} and {} (index {idx})",
            first.stream_id, events[idx].stream_id
        )));
    }
    if let Some(idx) = events.iter().position(|e| e.stream_type != first.stream_type) {
        return Err(EventStoreError::StreamTypeMismatch(format!(
            "batch mixes stream types (index {idx})"
        )));
    }

    let lineage = first
        .stream_id
        .parse::<LineageId>()
        .map_err(|e| EventStoreError::MalformedStreamId(e.to_string()))?;

    Ok(Some(Target {
        tenant_id: first.tenant_id,
        stream_id: first.stream_id.clone(),
        stream_type: first.stream_type.clone(),
        lineage,
    }))
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(target) = target_of(&events)? else {
            return Ok(vec![]);
        };

        let mut tenants = self.write()?;
        let partition = tenants.entry(target.tenant_id).or_default();
        partition.check_kind(&target.stream_type, &target.lineage)?;

        let current = match partition.streams.get(&target.stream_id) {
            Some(stream) if stream.stream_type != target.stream_type => {
                return Err(EventStoreError::StreamTypeMismatch(format!(
                    "{} is a '{}' stream, attempted append as '{}'",
                    target.stream_id, stream.stream_type, target.stream_type
                )));
            }
            Some(stream) => stream.version(),
            None => 0,
        };
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "{}: expected {expected_version:?}, found {current}",
                target.stream_id
            )));
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                stream_id: e.stream_id,
                stream_type: e.stream_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();

        partition
            .kinds
            .entry(target.stream_type.clone())
            .or_insert(target.lineage.kind);
        partition
            .streams
            .entry(target.stream_id)
            .or_insert_with(|| Stream {
                stream_type: target.stream_type,
                events: Vec::new(),
            })
            .events
            .extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_id: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        Ok(self
            .read()?
            .get(&tenant_id)
            .and_then(|partition| partition.streams.get(stream_id))
            .map(|stream| stream.events.clone())
            .unwrap_or_default())
    }
}
