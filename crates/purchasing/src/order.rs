use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use procura_carts::{Cart, CartItem, CartStatus};
use procura_core::{
    Aggregate, AggregateRoot, AuthorId, DomainError, ItemId, Money, PropertyId, TenantId,
    estimate_tax,
};
use procura_events::Event;
use procura_identity::{CartId, OrderId, PurchaseOrderId, derive_order_id, derive_purchase_order_id};

use crate::purchase_order::{
    DraftPurchaseOrder, PaymentStatus, PurchaseOrder, PurchaseOrderDetails, PurchaseOrderStatus,
};

/// Order status lifecycle.
///
/// Draft, "Ready for Review" and Scheduled are accepted from collaborators;
/// no engine transition produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Draft,
    #[serde(rename = "Ready for Review")]
    ReadyForReview,
    Submitted,
    #[serde(rename = "Pending My Approval")]
    PendingMyApproval,
    #[serde(rename = "Pending Others")]
    PendingOthers,
    Approved,
    #[serde(rename = "Needs Revision")]
    NeedsRevision,
    Rejected,
    Processing,
    Shipped,
    Completed,
    Scheduled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::ReadyForReview => "Ready for Review",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::PendingMyApproval => "Pending My Approval",
            OrderStatus::PendingOthers => "Pending Others",
            OrderStatus::Approved => "Approved",
            OrderStatus::NeedsRevision => "Needs Revision",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Completed => "Completed",
            OrderStatus::Scheduled => "Scheduled",
        }
    }

    pub fn is_pending_approval(self) -> bool {
        matches!(self, OrderStatus::PendingMyApproval | OrderStatus::PendingOthers)
    }

    /// Statuses from which purchase orders may be issued.
    pub fn accepts_purchase_orders(self) -> bool {
        matches!(
            self,
            OrderStatus::Submitted
                | OrderStatus::Approved
                | OrderStatus::Processing
                | OrderStatus::Shipped
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            OrderStatus::Draft,
            OrderStatus::ReadyForReview,
            OrderStatus::Submitted,
            OrderStatus::PendingMyApproval,
            OrderStatus::PendingOthers,
            OrderStatus::Approved,
            OrderStatus::NeedsRevision,
            OrderStatus::Rejected,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Scheduled,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

/// Outcome of an approval review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approve,
    RequestRevision,
    Reject,
}

impl ApprovalDecision {
    fn resulting_status(self) -> OrderStatus {
        match self {
            ApprovalDecision::Approve => OrderStatus::Approved,
            ApprovalDecision::RequestRevision => OrderStatus::NeedsRevision,
            ApprovalDecision::Reject => OrderStatus::Rejected,
        }
    }
}

/// Aggregate root: Order.
///
/// Owns its purchase orders; every PO mutation goes through the order so the
/// completion check runs against a consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    cart_id: Option<CartId>,
    author_id: Option<AuthorId>,
    property_id: Option<PropertyId>,
    items: Vec<CartItem>,
    status: OrderStatus,
    purchase_orders: Vec<PurchaseOrder>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            cart_id: None,
            author_id: None,
            property_id: None,
            items: Vec::new(),
            status: OrderStatus::Submitted,
            purchase_orders: Vec::new(),
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Originating cart. A lineage reference only; the cart may since have
    /// been reverted or edited.
    pub fn cart_id(&self) -> Option<&CartId> {
        self.cart_id.as_ref()
    }

    pub fn author_id(&self) -> Option<&AuthorId> {
        self.author_id.as_ref()
    }

    pub fn property_id(&self) -> Option<PropertyId> {
        self.property_id
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn purchase_orders(&self) -> &[PurchaseOrder] {
        &self.purchase_orders
    }

    pub fn purchase_order(&self, id: &PurchaseOrderId) -> Option<&PurchaseOrder> {
        procura_core::entity::find_by_id(&self.purchase_orders, id)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_on_purchase_order(&self, item_id: ItemId) -> bool {
        self.purchase_orders.iter().any(|po| po.contains_item(item_id))
    }

    /// Snapshot items not yet placed on any purchase order, in order.
    pub fn pending_items(&self) -> impl Iterator<Item = &CartItem> {
        self.items
            .iter()
            .filter(|item| !self.is_on_purchase_order(item.item_id))
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::total_price).sum()
    }

    pub fn estimated_tax(&self, rate_bps: u32) -> Money {
        estimate_tax(self.subtotal(), rate_bps)
    }

    /// Pick the fresher of two copies of the same order.
    ///
    /// The higher version wins; on a tie the local copy is kept.
    pub fn reconcile(local: Order, incoming: Order) -> Order {
        if local.id != incoming.id {
            return local;
        }
        if incoming.version > local.version {
            incoming
        } else {
            local
        }
    }

    fn should_ship(&self) -> bool {
        self.status == OrderStatus::Processing
            && !self.purchase_orders.is_empty()
            && self.purchase_orders.iter().all(|po| {
                matches!(
                    po.status,
                    PurchaseOrderStatus::InTransit | PurchaseOrderStatus::Received
                )
            })
            && self
                .purchase_orders
                .iter()
                .any(|po| po.status == PurchaseOrderStatus::InTransit)
    }

    fn should_complete(&self) -> bool {
        matches!(self.status, OrderStatus::Processing | OrderStatus::Shipped)
            && !self.purchase_orders.is_empty()
            && self
                .purchase_orders
                .iter()
                .all(|po| po.status == PurchaseOrderStatus::Received)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder (snapshot a submitted cart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub cart_id: CartId,
    pub author_id: AuthorId,
    pub property_id: Option<PropertyId>,
    pub items: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

impl PlaceOrder {
    /// Build the command from a submitted cart, deriving the order id from
    /// the cart's lineage.
    pub fn from_cart(cart: &Cart, occurred_at: DateTime<Utc>) -> Result<Self, DomainError> {
        if cart.status() != CartStatus::Submitted {
            return Err(DomainError::guard(format!(
                "cart must be Submitted to place an order (status: {})",
                cart.status()
            )));
        }
        let (Some(tenant_id), Some(author_id)) = (cart.tenant_id(), cart.author_id()) else {
            return Err(DomainError::not_found());
        };
        Ok(Self {
            tenant_id,
            order_id: derive_order_id(cart.id().as_str())?,
            cart_id: cart.id().clone(),
            author_id: author_id.clone(),
            property_id: cart.property_id(),
            items: cart.items().to_vec(),
            occurred_at,
        })
    }
}

/// Command: RefreshSnapshot (a reverted cart was edited and submitted again).
///
/// Replaces the order's items while no purchase order has been cut from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSnapshot {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub cart_id: CartId,
    pub property_id: Option<PropertyId>,
    pub items: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

impl RefreshSnapshot {
    pub fn from_cart(cart: &Cart, occurred_at: DateTime<Utc>) -> Result<Self, DomainError> {
        let place = PlaceOrder::from_cart(cart, occurred_at)?;
        Ok(Self {
            tenant_id: place.tenant_id,
            order_id: place.order_id,
            cart_id: place.cart_id,
            property_id: place.property_id,
            items: place.items,
            occurred_at,
        })
    }
}

/// Command: RequestApproval (Submitted | Needs Revision → Pending ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproval {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    /// The requester is also the approver ("Pending My Approval").
    pub by_self: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecideApproval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecideApproval {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub decision: ApprovalDecision,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssuePurchaseOrders (append planned POs atomically).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePurchaseOrders {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub purchase_orders: Vec<DraftPurchaseOrder>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePurchaseOrderDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePurchaseOrderDetails {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub details: PurchaseOrderDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPurchased (Issued → Purchased).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPurchased {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkInTransit (Purchased → In Transit).
///
/// Values given here override what is on record; a missing tracking number
/// is synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInTransit {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub eta: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReceived (In Transit → Received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReceived {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment (outcome reported by the payment collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub outcome: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcknowledgeBilling (billable items for a Paid PO were published).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeBilling {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EvaluateCompletion (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateCompletion {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    RefreshSnapshot(RefreshSnapshot),
    RequestApproval(RequestApproval),
    DecideApproval(DecideApproval),
    IssuePurchaseOrders(IssuePurchaseOrders),
    UpdatePurchaseOrderDetails(UpdatePurchaseOrderDetails),
    MarkPurchased(MarkPurchased),
    MarkInTransit(MarkInTransit),
    MarkReceived(MarkReceived),
    RecordPayment(RecordPayment),
    AcknowledgeBilling(AcknowledgeBilling),
    EvaluateCompletion(EvaluateCompletion),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub cart_id: CartId,
    pub author_id: AuthorId,
    pub property_id: Option<PropertyId>,
    pub items: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SnapshotRefreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRefreshed {
    pub order_id: OrderId,
    pub property_id: Option<PropertyId>,
    pub items: Vec<CartItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrdersIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrdersIssued {
    pub order_id: OrderId,
    pub purchase_orders: Vec<PurchaseOrder>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderDetailsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderDetailsUpdated {
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub details: PurchaseOrderDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderShipped {
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub carrier: Option<String>,
    pub tracking_number: String,
    pub tracking_synthesized: bool,
    pub eta: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub order_id: OrderId,
    pub po_id: PurchaseOrderId,
    pub previous: PaymentStatus,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentRecorded {
    /// True when this payment moved the PO into Paid.
    pub fn became_paid(&self) -> bool {
        self.status == PaymentStatus::Paid && self.previous != PaymentStatus::Paid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    SnapshotRefreshed(SnapshotRefreshed),
    ApprovalRequested {
        order_id: OrderId,
        status: OrderStatus,
        occurred_at: DateTime<Utc>,
    },
    ApprovalDecided {
        order_id: OrderId,
        status: OrderStatus,
        occurred_at: DateTime<Utc>,
    },
    PurchaseOrdersIssued(PurchaseOrdersIssued),
    ProcessingStarted {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    PurchaseOrderDetailsUpdated(PurchaseOrderDetailsUpdated),
    PurchaseOrderPurchased {
        order_id: OrderId,
        po_id: PurchaseOrderId,
        occurred_at: DateTime<Utc>,
    },
    PurchaseOrderShipped(PurchaseOrderShipped),
    PurchaseOrderReceived {
        order_id: OrderId,
        po_id: PurchaseOrderId,
        occurred_at: DateTime<Utc>,
    },
    PaymentRecorded(PaymentRecorded),
    PurchaseOrderBilled {
        order_id: OrderId,
        po_id: PurchaseOrderId,
        occurred_at: DateTime<Utc>,
    },
    OrderShipped {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
    OrderCompleted {
        order_id: OrderId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "purchasing.order.placed",
            OrderEvent::SnapshotRefreshed(_) => "purchasing.order.snapshot_refreshed",
            OrderEvent::ApprovalRequested { .. } => "purchasing.order.approval_requested",
            OrderEvent::ApprovalDecided { .. } => "purchasing.order.approval_decided",
            OrderEvent::PurchaseOrdersIssued(_) => "purchasing.order.purchase_orders_issued",
            OrderEvent::ProcessingStarted { .. } => "purchasing.order.processing_started",
            OrderEvent::PurchaseOrderDetailsUpdated(_) => "purchasing.purchase_order.details_updated",
            OrderEvent::PurchaseOrderPurchased { .. } => "purchasing.purchase_order.purchased",
            OrderEvent::PurchaseOrderShipped(_) => "purchasing.purchase_order.in_transit",
            OrderEvent::PurchaseOrderReceived { .. } => "purchasing.purchase_order.received",
            OrderEvent::PaymentRecorded(_) => "purchasing.purchase_order.payment_recorded",
            OrderEvent::PurchaseOrderBilled { .. } => "purchasing.purchase_order.billed",
            OrderEvent::OrderShipped { .. } => "purchasing.order.shipped",
            OrderEvent::OrderCompleted { .. } => "purchasing.order.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::SnapshotRefreshed(e) => e.occurred_at,
            OrderEvent::PurchaseOrdersIssued(e) => e.occurred_at,
            OrderEvent::PurchaseOrderDetailsUpdated(e) => e.occurred_at,
            OrderEvent::PurchaseOrderShipped(e) => e.occurred_at,
            OrderEvent::PaymentRecorded(e) => e.occurred_at,
            OrderEvent::ApprovalRequested { occurred_at, .. }
            | OrderEvent::ApprovalDecided { occurred_at, .. }
            | OrderEvent::ProcessingStarted { occurred_at, .. }
            | OrderEvent::PurchaseOrderPurchased { occurred_at, .. }
            | OrderEvent::PurchaseOrderReceived { occurred_at, .. }
            | OrderEvent::PurchaseOrderBilled { occurred_at, .. }
            | OrderEvent::OrderShipped { occurred_at, .. }
            | OrderEvent::OrderCompleted { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id.clone();
                self.tenant_id = Some(e.tenant_id);
                self.cart_id = Some(e.cart_id.clone());
                self.author_id = Some(e.author_id.clone());
                self.property_id = e.property_id;
                self.items = e.items.clone();
                self.status = OrderStatus::Submitted;
                self.purchase_orders.clear();
                self.created = true;
            }
            OrderEvent::SnapshotRefreshed(e) => {
                self.property_id = e.property_id;
                self.items = e.items.clone();
                self.status = OrderStatus::Submitted;
            }
            OrderEvent::ApprovalRequested { status, .. }
            | OrderEvent::ApprovalDecided { status, .. } => {
                self.status = *status;
            }
            OrderEvent::PurchaseOrdersIssued(e) => {
                self.purchase_orders.extend(e.purchase_orders.iter().cloned());
            }
            OrderEvent::ProcessingStarted { .. } => {
                self.status = OrderStatus::Processing;
            }
            OrderEvent::PurchaseOrderDetailsUpdated(e) => {
                if let Some(po) = self.po_mut(&e.po_id) {
                    po.apply_details(&e.details);
                }
            }
            OrderEvent::PurchaseOrderPurchased { po_id, .. } => {
                if let Some(po) = self.po_mut(po_id) {
                    po.status = PurchaseOrderStatus::Purchased;
                }
            }
            OrderEvent::PurchaseOrderShipped(e) => {
                if let Some(po) = self.po_mut(&e.po_id) {
                    po.status = PurchaseOrderStatus::InTransit;
                    if e.carrier.is_some() {
                        po.carrier = e.carrier.clone();
                    }
                    po.tracking_number = Some(e.tracking_number.clone());
                    po.tracking_synthesized = e.tracking_synthesized;
                    po.eta = Some(e.eta);
                }
            }
            OrderEvent::PurchaseOrderReceived { po_id, .. } => {
                if let Some(po) = self.po_mut(po_id) {
                    po.status = PurchaseOrderStatus::Received;
                }
            }
            OrderEvent::PaymentRecorded(e) => {
                if let Some(po) = self.po_mut(&e.po_id) {
                    po.payment_status = e.status;
                }
            }
            OrderEvent::PurchaseOrderBilled { po_id, .. } => {
                if let Some(po) = self.po_mut(po_id) {
                    po.billed = true;
                }
            }
            OrderEvent::OrderShipped { .. } => {
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::OrderCompleted { .. } => {
                self.status = OrderStatus::Completed;
            }
        }

        self.updated_at = Some(event.occurred_at());
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::RefreshSnapshot(cmd) => self.handle_refresh(cmd),
            OrderCommand::RequestApproval(cmd) => self.handle_request_approval(cmd),
            OrderCommand::DecideApproval(cmd) => self.handle_decide_approval(cmd),
            OrderCommand::IssuePurchaseOrders(cmd) => self.handle_issue(cmd),
            OrderCommand::UpdatePurchaseOrderDetails(cmd) => self.handle_update_details(cmd),
            OrderCommand::MarkPurchased(cmd) => self.handle_mark_purchased(cmd),
            OrderCommand::MarkInTransit(cmd) => self.handle_mark_in_transit(cmd),
            OrderCommand::MarkReceived(cmd) => self.handle_mark_received(cmd),
            OrderCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            OrderCommand::AcknowledgeBilling(cmd) => self.handle_acknowledge_billing(cmd),
            OrderCommand::EvaluateCompletion(cmd) => self.handle_evaluate_completion(cmd),
        }
    }
}

impl Order {
    fn ensure_existing(&self, tenant_id: TenantId, order_id: &OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if &self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn find_po(&self, po_id: &PurchaseOrderId) -> Result<&PurchaseOrder, DomainError> {
        self.purchase_order(po_id).ok_or_else(DomainError::not_found)
    }

    fn po_mut(&mut self, po_id: &PurchaseOrderId) -> Option<&mut PurchaseOrder> {
        self.purchase_orders.iter_mut().find(|po| &po.id == po_id)
    }

    /// Append the order-level transitions implied by a PO change.
    ///
    /// Evaluated against the state the events would produce, so each
    /// transition is emitted at most once.
    fn with_followups(
        &self,
        mut events: Vec<OrderEvent>,
        occurred_at: DateTime<Utc>,
    ) -> Vec<OrderEvent> {
        let mut next = self.clone();
        for event in &events {
            next.apply(event);
        }
        if next.should_ship() {
            let shipped = OrderEvent::OrderShipped {
                order_id: self.id.clone(),
                occurred_at,
            };
            next.apply(&shipped);
            events.push(shipped);
        }
        if next.should_complete() {
            events.push(OrderEvent::OrderCompleted {
                order_id: self.id.clone(),
                occurred_at,
            });
        }
        events
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        check_snapshot(&cmd.order_id, &cmd.cart_id, &cmd.items)?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id.clone(),
            cart_id: cmd.cart_id.clone(),
            author_id: cmd.author_id.clone(),
            property_id: cmd.property_id,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refresh(&self, cmd: &RefreshSnapshot) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        check_snapshot(&cmd.order_id, &cmd.cart_id, &cmd.items)?;

        if !self.purchase_orders.is_empty() {
            return Err(DomainError::guard(format!(
                "order {} already has purchase orders; its items can no longer change",
                self.id
            )));
        }
        if cmd.items == self.items && cmd.property_id == self.property_id {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::SnapshotRefreshed(SnapshotRefreshed {
            order_id: cmd.order_id.clone(),
            property_id: cmd.property_id,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_approval(
        &self,
        cmd: &RequestApproval,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;

        if !matches!(self.status, OrderStatus::Submitted | OrderStatus::NeedsRevision) {
            return Err(DomainError::guard(format!(
                "approval can only be requested for Submitted or Needs Revision orders (status: {})",
                self.status
            )));
        }

        let status = if cmd.by_self {
            OrderStatus::PendingMyApproval
        } else {
            OrderStatus::PendingOthers
        };
        Ok(vec![OrderEvent::ApprovalRequested {
            order_id: cmd.order_id.clone(),
            status,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_decide_approval(&self, cmd: &DecideApproval) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;

        if !self.status.is_pending_approval() {
            return Err(DomainError::guard(format!(
                "order is not pending approval (status: {})",
                self.status
            )));
        }

        Ok(vec![OrderEvent::ApprovalDecided {
            order_id: cmd.order_id.clone(),
            status: cmd.decision.resulting_status(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_issue(&self, cmd: &IssuePurchaseOrders) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;

        if !self.status.accepts_purchase_orders() {
            return Err(DomainError::guard(format!(
                "purchase orders cannot be issued while the order is {}",
                self.status
            )));
        }
        if cmd.purchase_orders.is_empty() || cmd.purchase_orders.iter().any(|d| d.items.is_empty())
        {
            return Err(DomainError::EmptyAssignment);
        }

        let mut ids = HashSet::new();
        let mut claimed = HashSet::new();
        for draft in &cmd.purchase_orders {
            if self.purchase_order(&draft.id).is_some() || !ids.insert(draft.id.clone()) {
                return Err(DomainError::conflict(format!(
                    "purchase order {} already exists",
                    draft.id
                )));
            }
            let expected = derive_purchase_order_id(self.id.as_str(), draft.vendor_suffix)?;
            if expected != draft.id {
                return Err(DomainError::validation(format!(
                    "purchase order id {} does not derive from order {}",
                    draft.id, self.id
                )));
            }
            for line in &draft.items {
                let Some(item) = self.items.iter().find(|i| i.item_id == line.item_id) else {
                    return Err(DomainError::validation(format!(
                        "item {} is not on order {}",
                        line.item_id, self.id
                    )));
                };
                if self.is_on_purchase_order(line.item_id) || !claimed.insert(line.item_id) {
                    return Err(DomainError::validation(format!(
                        "item {} is already on a purchase order",
                        line.item_id
                    )));
                }
                if line.quantity != item.quantity || line.product_id != item.product_id {
                    return Err(DomainError::validation(format!(
                        "purchase order line for item {} does not match the order snapshot",
                        line.item_id
                    )));
                }
            }
        }

        let mut events = vec![OrderEvent::PurchaseOrdersIssued(PurchaseOrdersIssued {
            order_id: cmd.order_id.clone(),
            purchase_orders: cmd
                .purchase_orders
                .iter()
                .cloned()
                .map(DraftPurchaseOrder::into_issued)
                .collect(),
            occurred_at: cmd.occurred_at,
        })];
        if self.status != OrderStatus::Processing {
            events.push(OrderEvent::ProcessingStarted {
                order_id: cmd.order_id.clone(),
                occurred_at: cmd.occurred_at,
            });
        }
        Ok(events)
    }

    fn handle_update_details(
        &self,
        cmd: &UpdatePurchaseOrderDetails,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        self.find_po(&cmd.po_id)?.check_details_edit(&cmd.details)?;

        Ok(vec![OrderEvent::PurchaseOrderDetailsUpdated(
            PurchaseOrderDetailsUpdated {
                order_id: cmd.order_id.clone(),
                po_id: cmd.po_id.clone(),
                details: cmd.details.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_purchased(&self, cmd: &MarkPurchased) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        self.find_po(&cmd.po_id)?.check_purchase()?;

        Ok(vec![OrderEvent::PurchaseOrderPurchased {
            order_id: cmd.order_id.clone(),
            po_id: cmd.po_id.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_mark_in_transit(&self, cmd: &MarkInTransit) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        let po = self.find_po(&cmd.po_id)?;
        po.check_ship(cmd.eta)?;

        let Some(eta) = cmd.eta.or(po.eta) else {
            return Err(DomainError::guard("missing estimated arrival date"));
        };
        let supplied = cmd
            .tracking_number
            .clone()
            .or_else(|| po.tracking_number.clone())
            .filter(|t| !t.trim().is_empty());
        let (tracking_number, tracking_synthesized) = match supplied {
            Some(t) => (t, false),
            None => (po.synthesized_tracking_number(), true),
        };

        let events = vec![OrderEvent::PurchaseOrderShipped(PurchaseOrderShipped {
            order_id: cmd.order_id.clone(),
            po_id: cmd.po_id.clone(),
            carrier: cmd.carrier.clone(),
            tracking_number,
            tracking_synthesized,
            eta,
            occurred_at: cmd.occurred_at,
        })];
        Ok(self.with_followups(events, cmd.occurred_at))
    }

    fn handle_mark_received(&self, cmd: &MarkReceived) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        self.find_po(&cmd.po_id)?.check_receive()?;

        let events = vec![OrderEvent::PurchaseOrderReceived {
            order_id: cmd.order_id.clone(),
            po_id: cmd.po_id.clone(),
            occurred_at: cmd.occurred_at,
        }];
        Ok(self.with_followups(events, cmd.occurred_at))
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        let po = self.find_po(&cmd.po_id)?;

        if po.payment_status == cmd.outcome {
            return Ok(vec![]);
        }
        if po.payment_status == PaymentStatus::Paid {
            return Err(DomainError::guard(format!(
                "purchase order {} is already paid",
                po.id
            )));
        }

        Ok(vec![OrderEvent::PaymentRecorded(PaymentRecorded {
            order_id: cmd.order_id.clone(),
            po_id: cmd.po_id.clone(),
            previous: po.payment_status,
            status: cmd.outcome,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_acknowledge_billing(
        &self,
        cmd: &AcknowledgeBilling,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;
        let po = self.find_po(&cmd.po_id)?;

        if po.billed {
            return Ok(vec![]);
        }
        if po.payment_status != PaymentStatus::Paid {
            return Err(DomainError::guard(format!(
                "purchase order {} is not paid; nothing to bill",
                po.id
            )));
        }

        Ok(vec![OrderEvent::PurchaseOrderBilled {
            order_id: cmd.order_id.clone(),
            po_id: cmd.po_id.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_evaluate_completion(
        &self,
        cmd: &EvaluateCompletion,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.order_id)?;

        Ok(self.with_followups(Vec::new(), cmd.occurred_at))
    }
}

/// A placed or refreshed snapshot must be non-empty, free of duplicates and
/// derive from its cart.
fn check_snapshot(order_id: &OrderId, cart_id: &CartId, items: &[CartItem]) -> Result<(), DomainError> {
    if items.is_empty() {
        return Err(DomainError::validation("order must have at least one item"));
    }
    let derived = derive_order_id(cart_id.as_str())?;
    if &derived != order_id {
        return Err(DomainError::validation(format!(
            "order id {order_id} does not derive from cart {cart_id}"
        )));
    }
    let mut seen = HashSet::new();
    if !items.iter().all(|item| seen.insert(item.item_id)) {
        return Err(DomainError::validation("duplicate item in order snapshot"));
    }
    Ok(())
}
