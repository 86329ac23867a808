//! PurchaseOrder state machine: `Issued → Purchased → In Transit → Received`.
//!
//! A purchase order is an entity owned by its `Order`; the order aggregate
//! calls the guard checks here before emitting any event.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use procura_catalog::VendorId;
use procura_core::{DomainError, DomainResult, Entity, ItemId, Money, ProductId, estimate_tax};
use procura_identity::PurchaseOrderId;

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PurchaseOrderStatus {
    Issued,
    Purchased,
    #[serde(rename = "In Transit")]
    InTransit,
    Received,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Issued => "Issued",
            PurchaseOrderStatus::Purchased => "Purchased",
            PurchaseOrderStatus::InTransit => "In Transit",
            PurchaseOrderStatus::Received => "Received",
        }
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Issued" => Ok(PurchaseOrderStatus::Issued),
            "Purchased" => Ok(PurchaseOrderStatus::Purchased),
            "In Transit" => Ok(PurchaseOrderStatus::InTransit),
            "Received" => Ok(PurchaseOrderStatus::Received),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// Payment state reported by the external payment collaborator.
///
/// Independent of the fulfilment status; only the move to `Paid` triggers billing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Pending,
    Paid,
    Failed,
}

/// Opaque reference to a document held by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub storage_key: String,
    pub file_name: String,
}

/// Purchase order line: an order item at its effective (possibly overridden) price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Price on the order snapshot, kept to show overrides.
    pub snapshot_unit_price: Money,
    pub note: Option<String>,
}

impl PurchaseOrderItem {
    pub fn total_price(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    pub fn is_price_overridden(&self) -> bool {
        self.unit_price != self.snapshot_unit_price
    }
}

/// Partial update of a purchase order's tracking metadata.
///
/// `None` leaves a field untouched. Which fields may be set depends on the
/// current status; see [`PurchaseOrder::check_details_edit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderDetails {
    pub confirmation_number: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_document: Option<DocumentRef>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub eta: Option<NaiveDate>,
}

impl PurchaseOrderDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn touches_purchase_fields(&self) -> bool {
        self.confirmation_number.is_some()
            || self.invoice_number.is_some()
            || self.invoice_document.is_some()
    }

    fn touches_shipping_fields(&self) -> bool {
        self.carrier.is_some() || self.tracking_number.is_some() || self.eta.is_some()
    }
}

/// A purchase order planned by assignment but not yet appended to its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPurchaseOrder {
    pub id: PurchaseOrderId,
    pub vendor_id: VendorId,
    pub vendor_suffix: Option<u32>,
    pub items: Vec<PurchaseOrderItem>,
}

impl DraftPurchaseOrder {
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(PurchaseOrderItem::total_price).sum()
    }

    pub fn into_issued(self) -> PurchaseOrder {
        PurchaseOrder::issued(self.id, self.vendor_id, self.vendor_suffix, self.items)
    }
}

/// Vendor-scoped subset of an order's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub vendor_id: VendorId,
    pub vendor_suffix: Option<u32>,
    pub items: Vec<PurchaseOrderItem>,
    pub status: PurchaseOrderStatus,
    pub payment_status: PaymentStatus,
    pub confirmation_number: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_document: Option<DocumentRef>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    /// Set when the tracking number was generated rather than supplied.
    pub tracking_synthesized: bool,
    pub eta: Option<NaiveDate>,
    /// Set once the billable items for this PO were published.
    #[serde(default)]
    pub billed: bool,
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl PurchaseOrder {
    /// A freshly issued purchase order with no tracking metadata.
    pub fn issued(
        id: PurchaseOrderId,
        vendor_id: VendorId,
        vendor_suffix: Option<u32>,
        items: Vec<PurchaseOrderItem>,
    ) -> Self {
        Self {
            id,
            vendor_id,
            vendor_suffix,
            items,
            status: PurchaseOrderStatus::Issued,
            payment_status: PaymentStatus::Unpaid,
            confirmation_number: None,
            invoice_number: None,
            invoice_document: None,
            carrier: None,
            tracking_number: None,
            tracking_synthesized: false,
            eta: None,
            billed: false,
        }
    }

    /// Paid, but its billable items have not been acknowledged yet.
    pub fn awaits_billing(&self) -> bool {
        self.payment_status == PaymentStatus::Paid && !self.billed
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(PurchaseOrderItem::total_price).sum()
    }

    pub fn estimated_tax(&self, rate_bps: u32) -> Money {
        estimate_tax(self.subtotal(), rate_bps)
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.items.iter().any(|i| i.item_id == item_id)
    }

    /// Tracking number issued when none is supplied on shipment.
    pub fn synthesized_tracking_number(&self) -> String {
        format!("TRK-{}", self.id)
    }

    /// Confirmation/invoice fields are editable only while Issued;
    /// carrier/tracking/ETA only before Received.
    pub fn check_details_edit(&self, details: &PurchaseOrderDetails) -> DomainResult<()> {
        if details.is_empty() {
            return Err(DomainError::validation("no purchase order fields to update"));
        }
        if details.touches_purchase_fields() && self.status != PurchaseOrderStatus::Issued {
            return Err(DomainError::guard(format!(
                "confirmation and invoice details are only editable while Issued (status: {})",
                self.status
            )));
        }
        if details.touches_shipping_fields() && self.status == PurchaseOrderStatus::Received {
            return Err(DomainError::guard(
                "carrier, tracking and ETA are not editable once Received",
            ));
        }
        if details
            .confirmation_number
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(DomainError::validation("confirmation number must not be blank"));
        }
        Ok(())
    }

    pub(crate) fn apply_details(&mut self, details: &PurchaseOrderDetails) {
        if let Some(v) = &details.confirmation_number {
            self.confirmation_number = Some(v.clone());
        }
        if let Some(v) = &details.invoice_number {
            self.invoice_number = Some(v.clone());
        }
        if let Some(v) = &details.invoice_document {
            self.invoice_document = Some(v.clone());
        }
        if let Some(v) = &details.carrier {
            self.carrier = Some(v.clone());
        }
        if let Some(v) = &details.tracking_number {
            self.tracking_number = Some(v.clone());
            self.tracking_synthesized = false;
        }
        if let Some(v) = details.eta {
            self.eta = Some(v);
        }
    }

    /// Guard for `Issued → Purchased`.
    pub fn check_purchase(&self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Issued {
            return Err(DomainError::guard(format!(
                "purchase order must be Issued to be marked Purchased (status: {})",
                self.status
            )));
        }
        if self
            .confirmation_number
            .as_deref()
            .is_none_or(|c| c.trim().is_empty())
        {
            return Err(DomainError::guard("missing vendor confirmation number"));
        }
        if self.invoice_document.is_none() {
            return Err(DomainError::guard("missing invoice document"));
        }
        Ok(())
    }

    /// Guard for `Purchased → In Transit`; `eta` is the value supplied with
    /// the transition, falling back to one already on record.
    pub fn check_ship(&self, eta: Option<NaiveDate>) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Purchased {
            return Err(DomainError::guard(format!(
                "purchase order must be Purchased to be marked In Transit (status: {})",
                self.status
            )));
        }
        if eta.or(self.eta).is_none() {
            return Err(DomainError::guard("missing estimated arrival date"));
        }
        Ok(())
    }

    /// Guard for `In Transit → Received`.
    pub fn check_receive(&self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::InTransit {
            return Err(DomainError::guard(format!(
                "purchase order must be In Transit to be marked Received (status: {})",
                self.status
            )));
        }
        Ok(())
    }
}
