use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use procura_core::{AggregateRoot, DomainError};
use procura_events::{Event, EventBus, EventEnvelope, StreamPosition};
use procura_identity::{OrderId, PurchaseOrderId};
use procura_purchasing::Order;

use crate::billable::{BillableItem, CartDirectory, billable_items, resolve_property};

/// Stream type stamped on billing envelopes.
pub const BILLING_STREAM_TYPE: &str = "purchasing.purchase_order";

/// Facts handed to the invoicing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEvent {
    BillableItemsIssued {
        order_id: OrderId,
        po_id: PurchaseOrderId,
        items: Vec<BillableItem>,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for BillingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BillingEvent::BillableItemsIssued { .. } => "billing.billable_items.issued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BillingEvent::BillableItemsIssued { occurred_at, .. } => *occurred_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("billing publication failed: {0}")]
    Publish(String),
}

/// Emits billable items for purchase orders that are Paid but not yet billed.
///
/// Billing is derived from order state rather than from the event that moved
/// the PO to Paid, so a publication that failed can be retried by calling
/// [`BillingTrigger::bill_paid`] again. The caller acknowledges success on the
/// order (`AcknowledgeBilling`); an acknowledged PO bills nothing.
#[derive(Debug)]
pub struct BillingTrigger<D, B> {
    directory: D,
    bus: B,
}

impl<D, B> BillingTrigger<D, B> {
    pub fn new(directory: D, bus: B) -> Self {
        Self { directory, bus }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<D, B> BillingTrigger<D, B>
where
    D: CartDirectory,
    B: EventBus<EventEnvelope<BillingEvent>>,
{
    /// Publish billable items for `po_id` if it awaits billing.
    ///
    /// Returns the published items; empty when the PO is unpaid or already
    /// billed. Nothing is recorded here, so on error the PO still awaits
    /// billing.
    pub fn bill_paid(
        &self,
        order: &Order,
        po_id: &PurchaseOrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<BillableItem>, BillingError> {
        let tenant_id = order.tenant_id().ok_or_else(DomainError::not_found)?;
        let po = order
            .purchase_order(po_id)
            .ok_or_else(DomainError::not_found)?;
        if !po.awaits_billing() {
            return Ok(Vec::new());
        }

        let property_id = resolve_property(&self.directory, order);
        if property_id.is_none() {
            tracing::warn!(
                order_id = %order.id(),
                po_id = %po.id,
                "no property resolved for paid purchase order; billing without one"
            );
        }

        let items = billable_items(order, po, property_id);
        let envelope = EventEnvelope::new(
            StreamPosition::new(tenant_id, po.id.as_str(), BILLING_STREAM_TYPE, order.version()),
            BillingEvent::BillableItemsIssued {
                order_id: order.id().clone(),
                po_id: po.id.clone(),
                items: items.clone(),
                occurred_at,
            },
        );
        self.bus
            .publish(envelope)
            .map_err(|e| BillingError::Publish(format!("{e:?}")))?;

        tracing::info!(
            order_id = %order.id(),
            po_id = %po.id,
            items = items.len(),
            "billable items issued"
        );
        Ok(items)
    }
}
