//! Vendor Assignment & Pricing.
//!
//! Turns the caller's per-item vendor choices into vendor-grouped draft
//! purchase orders, and flags items that a cheaper vendor could supply.
//! Planning is pure: a failed plan leaves both the order and the session
//! as they were.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_carts::CartItem;
use procura_catalog::{VendorCatalog, VendorId};
use procura_core::{AggregateRoot, DomainError, DomainResult, ItemId, Money, TenantId};
use procura_identity::{OrderId, derive_purchase_order_id};

use crate::order::{IssuePurchaseOrders, Order};
use crate::purchase_order::{DraftPurchaseOrder, PurchaseOrderItem};

/// Per-order assignment state owned by the caller.
///
/// Holds item → vendor choices and item → price overrides until they are
/// issued. Remembers the order version it was built against so a caller can
/// notice that the order moved underneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSession {
    order_id: Option<OrderId>,
    observed_version: u64,
    assignments: BTreeMap<ItemId, VendorId>,
    price_overrides: BTreeMap<ItemId, Money>,
}

impl AssignmentSession {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: Some(order.id().clone()),
            observed_version: order.version(),
            ..Self::default()
        }
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.order_id.as_ref()
    }

    pub fn assign(&mut self, item_id: ItemId, vendor_id: VendorId) -> &mut Self {
        self.assignments.insert(item_id, vendor_id);
        self
    }

    pub fn unassign(&mut self, item_id: ItemId) -> &mut Self {
        self.assignments.remove(&item_id);
        self
    }

    pub fn override_price(&mut self, item_id: ItemId, unit_price: Money) -> &mut Self {
        self.price_overrides.insert(item_id, unit_price);
        self
    }

    pub fn clear_override(&mut self, item_id: ItemId) -> &mut Self {
        self.price_overrides.remove(&item_id);
        self
    }

    pub fn vendor_for(&self, item_id: ItemId) -> Option<&VendorId> {
        self.assignments.get(&item_id)
    }

    pub fn assignments(&self) -> &BTreeMap<ItemId, VendorId> {
        &self.assignments
    }

    pub fn price_overrides(&self) -> &BTreeMap<ItemId, Money> {
        &self.price_overrides
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Effective unit price: the override if one is set, else the snapshot price.
    pub fn effective_price(&self, item: &CartItem) -> Money {
        self.price_overrides
            .get(&item.item_id)
            .copied()
            .unwrap_or(item.unit_price)
    }

    /// Pre-fill unassigned pending items from their cart vendor hints.
    pub fn seed_from_hints(&mut self, order: &Order) -> &mut Self {
        for item in order.pending_items() {
            if let Some(hint) = &item.vendor_hint {
                self.assignments
                    .entry(item.item_id)
                    .or_insert_with(|| hint.clone());
            }
        }
        self
    }

    /// True when the order changed since this session last observed it.
    pub fn is_stale(&self, order: &Order) -> bool {
        self.observed_version != order.version()
    }

    pub fn observe(&mut self, order: &Order) {
        self.observed_version = order.version();
    }

    /// Forget assignments and overrides for items that the plan issued.
    pub fn clear_issued(&mut self, plan: &AssignmentPlan) {
        for line in plan.purchase_orders.iter().flat_map(|po| &po.items) {
            self.assignments.remove(&line.item_id);
            self.price_overrides.remove(&line.item_id);
        }
    }
}

/// An item assigned above the cheapest known price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheaperVendorAdvisory {
    pub item_id: ItemId,
    pub current_vendor: Option<VendorId>,
    pub cheaper_vendor: VendorId,
    pub current_price: Money,
    pub cheaper_price: Money,
    pub delta: Money,
}

/// Result of planning: drafts to issue plus non-blocking price advisories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    pub order_id: OrderId,
    pub purchase_orders: Vec<DraftPurchaseOrder>,
    pub advisories: Vec<CheaperVendorAdvisory>,
}

impl AssignmentPlan {
    pub fn total(&self) -> Money {
        self.purchase_orders
            .iter()
            .map(DraftPurchaseOrder::subtotal)
            .sum()
    }

    pub fn into_command(self, tenant_id: TenantId, occurred_at: DateTime<Utc>) -> IssuePurchaseOrders {
        IssuePurchaseOrders {
            tenant_id,
            order_id: self.order_id,
            purchase_orders: self.purchase_orders,
            occurred_at,
        }
    }
}

/// Group the session's assigned pending items into draft purchase orders.
///
/// Groups follow the order in which each vendor first appears in the order's
/// item list. A single group on an order with no purchase orders yet gets the
/// bare `PO-` id; otherwise every draft carries `-V<n>` continuing after the
/// existing purchase orders.
pub fn plan_purchase_orders<C>(
    order: &Order,
    session: &AssignmentSession,
    catalog: &C,
) -> DomainResult<AssignmentPlan>
where
    C: VendorCatalog + ?Sized,
{
    if !order.is_created() {
        return Err(DomainError::not_found());
    }
    if session.order_id.as_ref().is_some_and(|id| id != order.id()) {
        return Err(DomainError::validation(
            "assignment session belongs to a different order",
        ));
    }
    if session.is_empty() {
        return Err(DomainError::EmptyAssignment);
    }

    for (item_id, vendor_id) in &session.assignments {
        if !catalog.contains(vendor_id) {
            return Err(DomainError::unknown_vendor(vendor_id));
        }
        if !order.pending_items().any(|i| i.item_id == *item_id) {
            return Err(DomainError::validation(format!(
                "item {item_id} is not pending on order {}",
                order.id()
            )));
        }
    }

    let mut groups: Vec<(VendorId, Vec<PurchaseOrderItem>)> = Vec::new();
    for item in order.pending_items() {
        let Some(vendor_id) = session.vendor_for(item.item_id) else {
            continue;
        };
        let line = PurchaseOrderItem {
            item_id: item.item_id,
            product_id: item.product_id,
            sku: item.sku.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: session.effective_price(item),
            snapshot_unit_price: item.unit_price,
            note: item.note.clone(),
        };
        match groups.iter_mut().find(|(v, _)| v == vendor_id) {
            Some((_, lines)) => lines.push(line),
            None => groups.push((vendor_id.clone(), vec![line])),
        }
    }

    let existing = order.purchase_orders().len();
    let bare = groups.len() == 1 && existing == 0;
    let mut purchase_orders = Vec::with_capacity(groups.len());
    for (idx, (vendor_id, items)) in groups.into_iter().enumerate() {
        let vendor_suffix = if bare {
            None
        } else {
            let n = u32::try_from(existing + idx + 1)
                .map_err(|_| DomainError::invariant("vendor suffix out of range"))?;
            Some(n)
        };
        purchase_orders.push(DraftPurchaseOrder {
            id: derive_purchase_order_id(order.id().as_str(), vendor_suffix)?,
            vendor_id,
            vendor_suffix,
            items,
        });
    }

    let advisories = order
        .pending_items()
        .filter(|item| session.vendor_for(item.item_id).is_some())
        .filter_map(|item| advise(item, session, catalog))
        .collect();

    Ok(AssignmentPlan {
        order_id: order.id().clone(),
        purchase_orders,
        advisories,
    })
}

/// Advisories for every pending item with a known cheaper vendor, assigned
/// or not.
pub fn cheaper_vendor_advisories<C>(
    order: &Order,
    session: &AssignmentSession,
    catalog: &C,
) -> Vec<CheaperVendorAdvisory>
where
    C: VendorCatalog + ?Sized,
{
    order
        .pending_items()
        .filter_map(|item| advise(item, session, catalog))
        .collect()
}

fn advise<C>(
    item: &CartItem,
    session: &AssignmentSession,
    catalog: &C,
) -> Option<CheaperVendorAdvisory>
where
    C: VendorCatalog + ?Sized,
{
    let cheapest = catalog.cheapest_option(item.product_id)?;
    let current_price = session.effective_price(item);
    let delta = current_price.checked_sub(cheapest.price)?;
    if delta == Money::ZERO {
        return None;
    }
    Some(CheaperVendorAdvisory {
        item_id: item.item_id,
        current_vendor: session.vendor_for(item.item_id).cloned(),
        cheaper_vendor: cheapest.vendor_id,
        current_price,
        cheaper_price: cheapest.price,
        delta,
    })
}
