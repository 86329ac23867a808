use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use procura_core::{Money, ProductId, ValueObject};

/// Vendor identifier as issued by the vendor directory (e.g. `"V1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(String);

impl VendorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for VendorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
}

/// A known (vendor, price) pairing for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorOption {
    pub vendor_id: VendorId,
    pub product_id: ProductId,
    pub price: Money,
    pub vendor_sku: Option<String>,
    pub is_preferred: bool,
}

impl ValueObject for VendorOption {}

/// Read-only vendor lookup.
pub trait VendorCatalog: Send + Sync {
    fn vendor(&self, id: &VendorId) -> Option<Vendor>;

    /// All known options for `product`, in no particular order.
    fn options_for(&self, product: ProductId) -> Vec<VendorOption>;

    fn contains(&self, id: &VendorId) -> bool {
        self.vendor(id).is_some()
    }

    /// Lowest-priced option for `product`.
    ///
    /// Ties prefer the vendor's preferred option, then the smallest vendor id,
    /// so the result does not depend on catalog ordering.
    fn cheapest_option(&self, product: ProductId) -> Option<VendorOption> {
        self.options_for(product).into_iter().min_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| b.is_preferred.cmp(&a.is_preferred))
                .then_with(|| a.vendor_id.cmp(&b.vendor_id))
        })
    }
}

impl<C> VendorCatalog for Arc<C>
where
    C: VendorCatalog + ?Sized,
{
    fn vendor(&self, id: &VendorId) -> Option<Vendor> {
        (**self).vendor(id)
    }

    fn options_for(&self, product: ProductId) -> Vec<VendorOption> {
        (**self).options_for(product)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVendorCatalog {
    vendors: BTreeMap<VendorId, Vendor>,
    options: HashMap<ProductId, Vec<VendorOption>>,
}

impl InMemoryVendorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = VendorId::new(id);
        self.vendors.insert(
            id.clone(),
            Vendor {
                id,
                name: name.into(),
            },
        );
        self
    }

    /// Register a price option, replacing any earlier option from the same vendor.
    pub fn with_option(mut self, option: VendorOption) -> Self {
        let entry = self.options.entry(option.product_id).or_default();
        entry.retain(|o| o.vendor_id != option.vendor_id);
        entry.push(option);
        self
    }
}

impl VendorCatalog for InMemoryVendorCatalog {
    fn vendor(&self, id: &VendorId) -> Option<Vendor> {
        self.vendors.get(id).cloned()
    }

    fn options_for(&self, product: ProductId) -> Vec<VendorOption> {
        self.options.get(&product).cloned().unwrap_or_default()
    }
}
