use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procura_core::TenantId;

use crate::event::Event;

/// Where an event sits: tenant, stream and position within the stream.
///
/// Streams are keyed by the lineage id of the entity that produced the event
/// (`CRT-…`, `ORD-…`, `PO-…`), so `stream_id` is plain text rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamPosition {
    pub tenant_id: TenantId,
    pub stream_id: String,
    pub stream_type: String,
    /// 1-based, gapless within the stream.
    pub sequence_number: u64,
}

impl StreamPosition {
    pub fn new(
        tenant_id: TenantId,
        stream_id: impl Into<String>,
        stream_type: impl Into<String>,
        sequence_number: u64,
    ) -> Self {
        Self {
            tenant_id,
            stream_id: stream_id.into(),
            stream_type: stream_type.into(),
            sequence_number,
        }
    }
}

/// An event as published to collaborators: payload plus the metadata a
/// consumer needs to route and de-duplicate it.
///
/// Delivery is at-least-once; `event_id` is stable across redeliveries of a
/// stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    #[serde(flatten)]
    position: StreamPosition,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event under a fresh id.
    pub fn new(position: StreamPosition, payload: E) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            position,
            event_type: payload.event_type().to_string(),
            occurred_at: payload.occurred_at(),
            payload,
        }
    }
}

impl<E> EventEnvelope<E> {
    /// Rebuild an envelope for an already-persisted event, keeping its id.
    pub fn from_stored(
        event_id: Uuid,
        position: StreamPosition,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            position,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn position(&self) -> &StreamPosition {
        &self.position
    }

    pub fn tenant_id(&self) -> TenantId {
        self.position.tenant_id
    }

    pub fn stream_id(&self) -> &str {
        &self.position.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.position.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.position.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
