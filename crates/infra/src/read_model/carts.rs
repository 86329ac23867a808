use serde::{Deserialize, Serialize};

use procura_carts::{Cart, CartStatus, CartType};
use procura_core::{AggregateRoot, Money};
use procura_identity::CartId;

/// Listing row for a cart, kept current by the procurement service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub cart_id: CartId,
    pub name: String,
    pub cart_type: CartType,
    pub status: CartStatus,
    pub item_count: usize,
    pub total: Money,
    pub version: u64,
}

impl CartSummary {
    pub fn from_cart(cart: &Cart) -> Self {
        Self {
            cart_id: cart.id().clone(),
            name: cart.name().to_string(),
            cart_type: cart.cart_type(),
            status: cart.status(),
            item_count: cart.items().len(),
            total: cart.total(),
            version: cart.version(),
        }
    }

    pub fn is_template(&self) -> bool {
        self.cart_type.is_template()
    }
}
