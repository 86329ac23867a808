//! `ProcurementService`: wires identifiers, carts, orders, assignment,
//! billing and recurrence over an event store.
//!
//! Every mutation goes through [`CommandDispatcher`], so each cart and order
//! stream is guarded by optimistic concurrency. Issuing purchase orders
//! appends against the exact order version the plan was computed from; a
//! concurrent issue on the same order fails with `Concurrency` instead of
//! double-assigning items.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use procura_billing::{
    BillableItem, BillingError, BillingEvent, BillingTrigger, InMemoryCartDirectory,
};
use procura_carts::{Cart, CartCommand, CartType, CreateCart, FiredInstance, Submit, fire_if_due};
use procura_catalog::VendorCatalog;
use procura_core::{
    AggregateRoot, AuthorId, DomainError, ExpectedVersion, Money, PropertyId, TenantId,
};
use procura_events::{EventEnvelope, InMemoryEventBus};
use procura_identity::{
    CartId, IdentifierService, OrderId, PurchaseOrderId, SequenceStore, SequenceStoreError,
    Uniqueness, derive_order_id,
};
use procura_purchasing::{
    AcknowledgeBilling, ApprovalDecision, AssignmentPlan, AssignmentSession, DecideApproval,
    EvaluateCompletion, MarkInTransit, MarkPurchased, MarkReceived, Order, OrderCommand,
    OrderStatus, PaymentStatus, PlaceOrder, PurchaseOrder, PurchaseOrderDetails, RecordPayment,
    RefreshSnapshot, RequestApproval, UpdatePurchaseOrderDetails, plan_purchase_orders,
};
use procura_scheduling::RecurrenceDescriptor;

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::config::EngineConfig;
use crate::event_store::EventStore;
use crate::read_model::{CartSummary, InMemoryTenantStore, TenantStore};

pub const CART_STREAM_TYPE: &str = "carts.cart";
pub const ORDER_STREAM_TYPE: &str = "purchasing.order";

pub type DomainEventBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type BillingEventBus = Arc<InMemoryEventBus<EventEnvelope<BillingEvent>>>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Sequence(#[from] SequenceStoreError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    /// A recurring cart was written but its template did not record the
    /// occurrence. The cart exists as a Draft.
    #[error("recurring cart {cart_id} created but template {template_id} did not record it: {source}")]
    OrphanedCart {
        template_id: CartId,
        cart_id: CartId,
        #[source]
        source: DispatchError,
    },
}

impl ServiceError {
    /// The domain error behind this failure, if any.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Dispatch(e) => e.as_domain(),
            ServiceError::Billing(BillingError::Domain(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::Dispatch(DispatchError::Concurrency(_))
                | ServiceError::OrphanedCart {
                    source: DispatchError::Concurrency(_),
                    ..
                }
        )
    }
}

/// Input for a new cart; the id is minted by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCart {
    pub name: String,
    pub cart_type: CartType,
    pub recurrence: Option<RecurrenceDescriptor>,
    pub property_id: Option<PropertyId>,
}

/// A created cart and how strongly its id is known to be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCart {
    pub cart: Cart,
    pub uniqueness: Uniqueness,
}

/// Shipment details supplied when a PO goes In Transit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub eta: Option<NaiveDate>,
}

/// Order totals including the fixed-rate tax estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub estimated_tax: Money,
    pub total: Money,
    pub purchase_orders: usize,
    pub pending_items: usize,
}

/// Purchase orders appended by one issue call.
#[derive(Debug, Clone)]
pub struct IssuedPurchaseOrders {
    pub order: Order,
    pub plan: AssignmentPlan,
}

pub struct ProcurementService<S, Q, C> {
    config: EngineConfig,
    ids: IdentifierService<Q>,
    catalog: C,
    dispatcher: CommandDispatcher<S, DomainEventBus>,
    carts: InMemoryTenantStore<CartId, CartSummary>,
    billing: BillingTrigger<Arc<InMemoryCartDirectory>, BillingEventBus>,
}

impl<S, Q, C> ProcurementService<S, Q, C>
where
    S: EventStore,
    Q: SequenceStore,
    C: VendorCatalog,
{
    pub fn new(config: EngineConfig, store: S, sequences: Q, catalog: C) -> Self {
        Self {
            config,
            ids: IdentifierService::new(sequences).with_degraded_fallback(config.allow_degraded_ids),
            catalog,
            dispatcher: CommandDispatcher::new(store, Arc::new(InMemoryEventBus::new())),
            carts: InMemoryTenantStore::new(),
            billing: BillingTrigger::new(
                Arc::new(InMemoryCartDirectory::new()),
                Arc::new(InMemoryEventBus::new()),
            ),
        }
    }

    /// Read [`EngineConfig`] from the environment and install logging in the
    /// configured format before building the service.
    pub fn from_env(store: S, sequences: Q, catalog: C) -> Self {
        let config = EngineConfig::from_env();
        procura_observability::init(config.log_format);
        tracing::info!(
            tax_rate_bps = config.tax_rate_bps,
            allow_degraded_ids = config.allow_degraded_ids,
            "procurement engine configured"
        );
        Self::new(config, store, sequences, catalog)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Every committed cart/order event, as JSON envelopes.
    pub fn domain_events(&self) -> &DomainEventBus {
        self.dispatcher.bus()
    }

    /// Billable items for the invoicing collaborator.
    pub fn billing_events(&self) -> &BillingEventBus {
        self.billing.bus()
    }

    // ---- carts ----------------------------------------------------------

    pub fn create_cart(
        &self,
        tenant_id: TenantId,
        author_id: &AuthorId,
        new_cart: NewCart,
        now: DateTime<Utc>,
    ) -> Result<IssuedCart, ServiceError> {
        let issued = self.ids.next_cart_id(author_id)?;
        let cart_id = issued.id;

        let command = CartCommand::CreateCart(CreateCart {
            tenant_id,
            cart_id: cart_id.clone(),
            author_id: author_id.clone(),
            name: new_cart.name,
            cart_type: new_cart.cart_type,
            recurrence: new_cart.recurrence,
            property_id: new_cart.property_id,
            occurred_at: now,
        });
        let cart = self.dispatch_cart(tenant_id, &cart_id, &command, ExpectedVersion::Exact(0))?;

        tracing::info!(%tenant_id, cart_id = %cart_id, uniqueness = ?issued.uniqueness, "cart created");
        Ok(IssuedCart {
            cart,
            uniqueness: issued.uniqueness,
        })
    }

    /// Run any cart command (item edits, review, revert) against the latest state.
    pub fn execute_cart(
        &self,
        tenant_id: TenantId,
        cart_id: &CartId,
        command: &CartCommand,
    ) -> Result<Cart, ServiceError> {
        self.dispatch_cart(tenant_id, cart_id, command, ExpectedVersion::Any)
    }

    pub fn load_cart(&self, tenant_id: TenantId, cart_id: &CartId) -> Result<Cart, ServiceError> {
        let cart = self
            .dispatcher
            .load(tenant_id, cart_id.as_str(), || Cart::empty(cart_id.clone()))?;
        if !cart.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(cart)
    }

    pub fn list_carts(&self, tenant_id: TenantId) -> Vec<CartSummary> {
        self.carts.list(tenant_id)
    }

    pub fn cart_summary(&self, tenant_id: TenantId, cart_id: &CartId) -> Option<CartSummary> {
        self.carts.get(tenant_id, cart_id)
    }

    /// Submit a cart and place its order.
    ///
    /// A cart that was reverted, edited and submitted again refreshes the
    /// items of its existing order. Once that order has purchase orders its
    /// items are fixed: resubmission is refused and the cart is left as is.
    pub fn submit_cart(
        &self,
        tenant_id: TenantId,
        cart_id: &CartId,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let order_id = derive_order_id(cart_id.as_str())?;
        let existing = self.dispatcher.load(tenant_id, order_id.as_str(), || {
            Order::empty(order_id.clone())
        })?;
        if !existing.purchase_orders().is_empty() {
            return Err(DomainError::guard(format!(
                "order {order_id} already has purchase orders; cart {cart_id} cannot be resubmitted"
            ))
            .into());
        }

        let command = CartCommand::Submit(Submit {
            tenant_id,
            cart_id: cart_id.clone(),
            occurred_at: now,
        });
        let cart = self.dispatch_cart(tenant_id, cart_id, &command, ExpectedVersion::Any)?;

        if existing.is_created() {
            let refresh = OrderCommand::RefreshSnapshot(RefreshSnapshot::from_cart(&cart, now)?);
            let dispatched = self.dispatch_order(
                tenant_id,
                &order_id,
                &refresh,
                ExpectedVersion::Exact(existing.version()),
            )?;
            tracing::info!(
                %tenant_id,
                cart_id = %cart_id,
                order_id = %order_id,
                changed = !dispatched.events.is_empty(),
                items = dispatched.aggregate.items().len(),
                "cart resubmitted; order snapshot refreshed"
            );
            return Ok(dispatched.aggregate);
        }

        let place = OrderCommand::PlaceOrder(PlaceOrder::from_cart(&cart, now)?);
        let order = self
            .dispatch_order(tenant_id, &order_id, &place, ExpectedVersion::Exact(0))?
            .aggregate;

        tracing::info!(
            %tenant_id,
            cart_id = %cart_id,
            order_id = %order_id,
            items = order.items().len(),
            total = %order.subtotal(),
            "cart submitted; order placed"
        );
        Ok(order)
    }

    // ---- orders ---------------------------------------------------------

    pub fn load_order(&self, tenant_id: TenantId, order_id: &OrderId) -> Result<Order, ServiceError> {
        let order = self
            .dispatcher
            .load(tenant_id, order_id.as_str(), || Order::empty(order_id.clone()))?;
        if !order.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(order)
    }

    pub fn order_summary(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
    ) -> Result<OrderSummary, ServiceError> {
        let order = self.load_order(tenant_id, order_id)?;
        let subtotal = order.subtotal();
        let estimated_tax = order.estimated_tax(self.config.tax_rate_bps);
        Ok(OrderSummary {
            order_id: order.id().clone(),
            status: order.status(),
            subtotal,
            estimated_tax,
            total: subtotal + estimated_tax,
            purchase_orders: order.purchase_orders().len(),
            pending_items: order.pending_items().count(),
        })
    }

    pub fn request_approval(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        by_self: bool,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::RequestApproval(RequestApproval {
            tenant_id,
            order_id: order_id.clone(),
            by_self,
            occurred_at: now,
        });
        Ok(self
            .dispatch_order(tenant_id, order_id, &command, ExpectedVersion::Any)?
            .aggregate)
    }

    pub fn decide_approval(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::DecideApproval(DecideApproval {
            tenant_id,
            order_id: order_id.clone(),
            decision,
            occurred_at: now,
        });
        Ok(self
            .dispatch_order(tenant_id, order_id, &command, ExpectedVersion::Any)?
            .aggregate)
    }

    /// Preview the purchase orders `session` would produce. Nothing is written.
    pub fn plan_purchase_orders(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        session: &AssignmentSession,
    ) -> Result<AssignmentPlan, ServiceError> {
        let order = self.load_order(tenant_id, order_id)?;
        Ok(plan_purchase_orders(&order, session, &self.catalog)?)
    }

    /// Plan and append purchase orders for the session's assigned items.
    ///
    /// On success the issued items are cleared from `session`.
    pub fn issue_purchase_orders(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        session: &mut AssignmentSession,
        now: DateTime<Utc>,
    ) -> Result<IssuedPurchaseOrders, ServiceError> {
        let order = self.load_order(tenant_id, order_id)?;
        if session.is_stale(&order) {
            tracing::debug!(order_id = %order_id, "assignment session predates latest order changes");
        }
        let plan = plan_purchase_orders(&order, session, &self.catalog)?;
        for advisory in &plan.advisories {
            tracing::info!(
                order_id = %order_id,
                item_id = %advisory.item_id,
                cheaper_vendor = %advisory.cheaper_vendor,
                delta = %advisory.delta,
                "cheaper vendor available"
            );
        }

        let command = OrderCommand::IssuePurchaseOrders(plan.clone().into_command(tenant_id, now));
        let dispatched = self.dispatch_order(
            tenant_id,
            order_id,
            &command,
            ExpectedVersion::Exact(order.version()),
        )?;

        session.clear_issued(&plan);
        session.observe(&dispatched.aggregate);

        tracing::info!(
            %tenant_id,
            order_id = %order_id,
            purchase_orders = ?plan.purchase_orders.iter().map(|po| po.id.as_str()).collect::<Vec<_>>(),
            "purchase orders issued"
        );
        Ok(IssuedPurchaseOrders {
            order: dispatched.aggregate,
            plan,
        })
    }

    pub fn update_purchase_order(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        details: PurchaseOrderDetails,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::UpdatePurchaseOrderDetails(UpdatePurchaseOrderDetails {
            tenant_id,
            order_id: order_id.clone(),
            po_id: po_id.clone(),
            details,
            occurred_at: now,
        });
        Ok(self
            .dispatch_order(tenant_id, order_id, &command, ExpectedVersion::Any)?
            .aggregate)
    }

    pub fn mark_purchased(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::MarkPurchased(MarkPurchased {
            tenant_id,
            order_id: order_id.clone(),
            po_id: po_id.clone(),
            occurred_at: now,
        });
        self.transition_po(tenant_id, order_id, po_id, &command)
    }

    pub fn mark_in_transit(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        shipment: Shipment,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::MarkInTransit(MarkInTransit {
            tenant_id,
            order_id: order_id.clone(),
            po_id: po_id.clone(),
            carrier: shipment.carrier,
            tracking_number: shipment.tracking_number,
            eta: shipment.eta,
            occurred_at: now,
        });
        self.transition_po(tenant_id, order_id, po_id, &command)
    }

    pub fn mark_received(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::MarkReceived(MarkReceived {
            tenant_id,
            order_id: order_id.clone(),
            po_id: po_id.clone(),
            occurred_at: now,
        });
        self.transition_po(tenant_id, order_id, po_id, &command)
    }

    /// Re-run the completion check. A no-op once the order is Completed.
    pub fn evaluate_completion(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let command = OrderCommand::EvaluateCompletion(EvaluateCompletion {
            tenant_id,
            order_id: order_id.clone(),
            occurred_at: now,
        });
        Ok(self
            .dispatch_order(tenant_id, order_id, &command, ExpectedVersion::Any)?
            .aggregate)
    }

    /// Record the payment collaborator's outcome; returns the billable items
    /// published for a Paid PO.
    ///
    /// Billing follows the PO's state rather than the payment event: a Paid
    /// PO whose items were never acknowledged as published is billed again on
    /// the next call, so a failed publication is retried by repeating the
    /// Paid notification. A PO is billed once it is acknowledged.
    pub fn record_payment(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        outcome: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableItem>, ServiceError> {
        let command = OrderCommand::RecordPayment(RecordPayment {
            tenant_id,
            order_id: order_id.clone(),
            po_id: po_id.clone(),
            outcome,
            occurred_at: now,
        });
        let dispatched = self.dispatch_order(tenant_id, order_id, &command, ExpectedVersion::Any)?;
        if dispatched.events.is_empty() {
            tracing::debug!(order_id = %order_id, po_id = %po_id, ?outcome, "payment status unchanged");
        }
        self.bill_if_paid(tenant_id, &dispatched.aggregate, po_id, now)
    }

    fn bill_if_paid(
        &self,
        tenant_id: TenantId,
        order: &Order,
        po_id: &PurchaseOrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableItem>, ServiceError> {
        if !order.purchase_order(po_id).is_some_and(PurchaseOrder::awaits_billing) {
            return Ok(Vec::new());
        }
        let items = self.billing.bill_paid(order, po_id, now)?;

        // Published but unacknowledged items are published again on retry.
        let acknowledge = OrderCommand::AcknowledgeBilling(AcknowledgeBilling {
            tenant_id,
            order_id: order.id().clone(),
            po_id: po_id.clone(),
            occurred_at: now,
        });
        self.dispatch_order(tenant_id, order.id(), &acknowledge, ExpectedVersion::Any)?;
        Ok(items)
    }

    // ---- recurrence -----------------------------------------------------

    /// Fire every due Recurring/Scheduled template of the tenant.
    ///
    /// A template that fails is logged and skipped; the others still fire.
    pub fn run_due_recurrences(&self, tenant_id: TenantId, now: DateTime<Utc>) -> Vec<FiredInstance> {
        let mut fired = Vec::new();
        for summary in self.carts.list(tenant_id).into_iter().filter(CartSummary::is_template) {
            match self.fire_recurrence(tenant_id, &summary.cart_id, now) {
                Ok(Some(instance)) => fired.push(instance),
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    %tenant_id,
                    template = %summary.cart_id,
                    error = %err,
                    "recurring cart did not fire"
                ),
            }
        }
        fired
    }

    /// Fire one Recurring/Scheduled template if an occurrence is due.
    ///
    /// The spawned cart is written before the template records the
    /// occurrence, so a failed cart write leaves the occurrence due for the
    /// next run. If recording fails after the cart was written, the cart is
    /// kept and indexed and [`ServiceError::OrphanedCart`] names it.
    pub fn fire_recurrence(
        &self,
        tenant_id: TenantId,
        template_id: &CartId,
        now: DateTime<Utc>,
    ) -> Result<Option<FiredInstance>, ServiceError> {
        let mut template = self.load_cart(tenant_id, template_id)?;
        let version = template.version();
        let author_id = template
            .author_id()
            .cloned()
            .ok_or_else(|| DomainError::invariant("template cart has no author"))?;

        let Some(instance) = fire_if_due(&mut template, now, || {
            self.ids
                .next_cart_id(&author_id)
                .map(|issued| issued.id)
                .map_err(ServiceError::from)
        })?
        else {
            return Ok(None);
        };

        self.dispatcher.commit(
            tenant_id,
            instance.cart.id().as_str(),
            CART_STREAM_TYPE,
            &instance.cart_events,
            ExpectedVersion::Exact(0),
        )?;
        self.index_cart(tenant_id, &instance.cart);

        if let Err(source) = self.dispatcher.commit(
            tenant_id,
            template_id.as_str(),
            CART_STREAM_TYPE,
            &instance.template_events,
            ExpectedVersion::Exact(version),
        ) {
            tracing::warn!(
                %tenant_id,
                template = %template_id,
                cart_id = %instance.cart.id(),
                occurrence = %instance.occurrence,
                error = %source,
                "recurring cart written but occurrence not recorded"
            );
            return Err(ServiceError::OrphanedCart {
                template_id: template_id.clone(),
                cart_id: instance.cart.id().clone(),
                source,
            });
        }

        self.index_cart(tenant_id, &template);
        Ok(Some(instance))
    }

    // ---- plumbing -------------------------------------------------------

    fn dispatch_cart(
        &self,
        tenant_id: TenantId,
        cart_id: &CartId,
        command: &CartCommand,
        expected: ExpectedVersion,
    ) -> Result<Cart, ServiceError> {
        let cart = self
            .dispatcher
            .dispatch(
                tenant_id,
                cart_id.as_str(),
                CART_STREAM_TYPE,
                command,
                expected,
                || Cart::empty(cart_id.clone()),
            )?
            .aggregate;
        self.index_cart(tenant_id, &cart);
        Ok(cart)
    }

    fn dispatch_order(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        command: &OrderCommand,
        expected: ExpectedVersion,
    ) -> Result<Dispatched<Order>, ServiceError> {
        Ok(self.dispatcher.dispatch(
            tenant_id,
            order_id.as_str(),
            ORDER_STREAM_TYPE,
            command,
            expected,
            || Order::empty(order_id.clone()),
        )?)
    }

    fn transition_po(
        &self,
        tenant_id: TenantId,
        order_id: &OrderId,
        po_id: &PurchaseOrderId,
        command: &OrderCommand,
    ) -> Result<Order, ServiceError> {
        let order = self
            .dispatch_order(tenant_id, order_id, command, ExpectedVersion::Any)?
            .aggregate;
        if let Some(po) = order.purchase_order(po_id) {
            tracing::info!(
                order_id = %order_id,
                po_id = %po_id,
                status = %po.status,
                order_status = %order.status(),
                "purchase order transitioned"
            );
        }
        Ok(order)
    }

    fn index_cart(&self, tenant_id: TenantId, cart: &Cart) {
        self.carts
            .upsert(tenant_id, cart.id().clone(), CartSummary::from_cart(cart));
        self.billing.directory().record(cart);
    }
}
