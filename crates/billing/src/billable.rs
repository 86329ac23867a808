use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use procura_carts::Cart;
use procura_core::{AggregateRoot, Money, PropertyId};
use procura_identity::{CartId, OrderId, PurchaseOrderId};
use procura_purchasing::{Order, PurchaseOrder};

/// One purchase order line handed to invoicing once the PO is paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableItem {
    pub po_id: PurchaseOrderId,
    pub order_id: OrderId,
    /// Property the purchase is billed against; `None` when the cart had none.
    pub property_id: Option<PropertyId>,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
}

/// Resolves the property of an order's originating cart.
pub trait CartDirectory: Send + Sync {
    fn property_for_cart(&self, cart_id: &CartId) -> Option<PropertyId>;
}

impl<D> CartDirectory for Arc<D>
where
    D: CartDirectory + ?Sized,
{
    fn property_for_cart(&self, cart_id: &CartId) -> Option<PropertyId> {
        (**self).property_for_cart(cart_id)
    }
}

/// In-memory cart → property index for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCartDirectory {
    properties: RwLock<HashMap<CartId, PropertyId>>,
}

impl InMemoryCartDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) a cart. Carts without a property are removed.
    pub fn record(&self, cart: &Cart) {
        let Ok(mut properties) = self.properties.write() else {
            return;
        };
        match cart.property_id() {
            Some(property_id) => {
                properties.insert(cart.id().clone(), property_id);
            }
            None => {
                properties.remove(cart.id());
            }
        }
    }
}

impl CartDirectory for InMemoryCartDirectory {
    fn property_for_cart(&self, cart_id: &CartId) -> Option<PropertyId> {
        self.properties.read().ok()?.get(cart_id).copied()
    }
}

/// Property for `order`: the originating cart's current property, falling
/// back to the one snapshotted when the order was placed.
pub fn resolve_property<D>(directory: &D, order: &Order) -> Option<PropertyId>
where
    D: CartDirectory + ?Sized,
{
    order
        .cart_id()
        .and_then(|cart_id| directory.property_for_cart(cart_id))
        .or_else(|| order.property_id())
}

/// One billable item per line of `po`.
pub fn billable_items(
    order: &Order,
    po: &PurchaseOrder,
    property_id: Option<PropertyId>,
) -> Vec<BillableItem> {
    po.items
        .iter()
        .map(|line| BillableItem {
            po_id: po.id.clone(),
            order_id: order.id().clone(),
            property_id,
            description: format!("{} ({})", line.name, line.sku),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.total_price(),
        })
        .collect()
}
