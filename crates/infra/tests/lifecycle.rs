//! End-to-end procurement flows through `ProcurementService`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};

use procura_carts::{AddItem, CartCommand, CartItem, CartStatus, CartType, RevertToDraft};
use procura_catalog::{InMemoryVendorCatalog, VendorId, VendorOption};
use procura_billing::BillingError;
use procura_core::{
    AggregateRoot, AuthorId, ExpectedVersion, ItemId, Money, ProductId, PropertyId, TenantId,
};
use procura_events::EventBus;
use procura_identity::{
    CartId, InMemorySequenceStore, SequenceStore, SequenceStoreError, Uniqueness,
};
use procura_infra::event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
};
use procura_infra::{EngineConfig, NewCart, ProcurementService, ServiceError, Shipment};
use procura_observability::LogFormat;
use procura_purchasing::{
    ApprovalDecision, AssignmentSession, DocumentRef, OrderStatus, PaymentStatus,
    PurchaseOrderDetails, PurchaseOrderStatus,
};
use procura_scheduling::{Frequency, RecurrenceDescriptor};

type Service<Q = InMemorySequenceStore, S = InMemoryEventStore> =
    ProcurementService<S, Q, Arc<InMemoryVendorCatalog>>;

struct Fixture {
    towels: ProductId,
    filters: ProductId,
    catalog: Arc<InMemoryVendorCatalog>,
}

impl Fixture {
    fn new() -> Self {
        let towels = ProductId::new();
        let filters = ProductId::new();
        let catalog = InMemoryVendorCatalog::new()
            .with_vendor("ACME", "Acme Supply")
            .with_vendor("BOLT", "Bolt Hardware")
            .with_option(option("ACME", towels, 1_000))
            .with_option(option("BOLT", towels, 700))
            .with_option(option("BOLT", filters, 500));
        Self {
            towels,
            filters,
            catalog: Arc::new(catalog),
        }
    }

    fn service(&self) -> Service {
        self.service_with(InMemorySequenceStore::new(), true)
    }

    fn service_with<Q: SequenceStore>(&self, sequences: Q, allow_degraded_ids: bool) -> Service<Q> {
        self.build(InMemoryEventStore::new(), sequences, allow_degraded_ids)
    }

    fn service_on<S: EventStore>(&self, store: S) -> Service<InMemorySequenceStore, S> {
        self.build(store, InMemorySequenceStore::new(), true)
    }

    fn build<S: EventStore, Q: SequenceStore>(
        &self,
        store: S,
        sequences: Q,
        allow_degraded_ids: bool,
    ) -> Service<Q, S> {
        let config = EngineConfig {
            tax_rate_bps: 1_000,
            log_format: LogFormat::Pretty,
            allow_degraded_ids,
        };
        ProcurementService::new(config, store, sequences, self.catalog.clone())
    }
}

fn option(vendor: &str, product_id: ProductId, minor: u64) -> VendorOption {
    VendorOption {
        vendor_id: VendorId::new(vendor),
        product_id,
        price: Money::from_minor(minor),
        vendor_sku: None,
        is_preferred: false,
    }
}

fn author() -> AuthorId {
    AuthorId::new("user-12345678").unwrap()
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
        .and_utc()
}

fn line(product_id: ProductId, sku: &str, quantity: u32, minor: u64) -> CartItem {
    CartItem {
        item_id: ItemId::new(),
        product_id,
        sku: sku.to_string(),
        name: format!("Item {sku}"),
        quantity,
        unit_price: Money::from_minor(minor),
        note: None,
        vendor_hint: None,
    }
}

fn add<Q: SequenceStore, S: EventStore>(
    service: &Service<Q, S>,
    tenant_id: TenantId,
    cart_id: &CartId,
    item: CartItem,
) {
    service
        .execute_cart(
            tenant_id,
            cart_id,
            &CartCommand::AddItem(AddItem {
                tenant_id,
                cart_id: cart_id.clone(),
                item,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
}

fn standard_cart(service: &Service, tenant_id: TenantId, property_id: Option<PropertyId>) -> CartId {
    service
        .create_cart(
            tenant_id,
            &author(),
            NewCart {
                name: "Unit 4B turnover".to_string(),
                cart_type: CartType::Standard,
                recurrence: None,
                property_id,
            },
            Utc::now(),
        )
        .unwrap()
        .cart
        .id()
        .clone()
}

#[test]
fn cart_to_completed_order_with_billing() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let property_id = PropertyId::new();
    let now = Utc::now();

    let cart_id = standard_cart(&service, tenant_id, Some(property_id));
    assert_eq!(cart_id.as_str(), "CRT-user1234-0001");
    let towels = line(fx.towels, "TWL-1", 2, 1_000);
    let filters = line(fx.filters, "FLT-2", 1, 500);
    add(&service, tenant_id, &cart_id, towels.clone());
    add(&service, tenant_id, &cart_id, filters.clone());

    let order = service.submit_cart(tenant_id, &cart_id, now).unwrap();
    assert_eq!(order.id().as_str(), "ORD-user1234-0001");
    assert_eq!(order.status(), OrderStatus::Submitted);

    let summary = service.order_summary(tenant_id, order.id()).unwrap();
    assert_eq!(summary.subtotal, Money::from_minor(2_500));
    assert_eq!(summary.estimated_tax, Money::from_minor(250));
    assert_eq!(summary.total, Money::from_minor(2_750));

    service.request_approval(tenant_id, order.id(), false, now).unwrap();
    let order = service
        .decide_approval(tenant_id, order.id(), ApprovalDecision::Approve, now)
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Approved);

    let mut session = AssignmentSession::for_order(&order);
    session
        .assign(towels.item_id, VendorId::new("ACME"))
        .assign(filters.item_id, VendorId::new("BOLT"));
    let issued = service
        .issue_purchase_orders(tenant_id, order.id(), &mut session, now)
        .unwrap();
    let order = issued.order;
    assert_eq!(order.status(), OrderStatus::Processing);
    let po_ids: Vec<_> = order.purchase_orders().iter().map(|po| po.id.clone()).collect();
    assert_eq!(
        po_ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["PO-user1234-0001-V1", "PO-user1234-0001-V2"]
    );
    // Bolt sells towels for less than Acme.
    assert_eq!(issued.plan.advisories.len(), 1);
    assert_eq!(issued.plan.advisories[0].delta, Money::from_minor(300));
    assert!(session.is_empty());

    for (idx, po_id) in po_ids.iter().enumerate() {
        service
            .update_purchase_order(
                tenant_id,
                order.id(),
                po_id,
                PurchaseOrderDetails {
                    confirmation_number: Some(format!("CONF-{idx}")),
                    invoice_document: Some(DocumentRef {
                        storage_key: format!("invoices/{idx}.pdf"),
                        file_name: format!("{idx}.pdf"),
                    }),
                    ..PurchaseOrderDetails::default()
                },
                now,
            )
            .unwrap();
        service.mark_purchased(tenant_id, order.id(), po_id, now).unwrap();
    }

    let eta = NaiveDate::from_ymd_opt(2026, 11, 2);
    let order_after_first = service
        .mark_in_transit(
            tenant_id,
            order.id(),
            &po_ids[0],
            Shipment {
                carrier: Some("UPS".to_string()),
                tracking_number: Some("1Z999".to_string()),
                eta,
            },
            now,
        )
        .unwrap();
    assert_eq!(order_after_first.status(), OrderStatus::Processing);

    let shipped = service
        .mark_in_transit(
            tenant_id,
            order.id(),
            &po_ids[1],
            Shipment {
                eta,
                ..Shipment::default()
            },
            now,
        )
        .unwrap();
    assert_eq!(shipped.status(), OrderStatus::Shipped);
    let second = shipped.purchase_order(&po_ids[1]).unwrap();
    assert_eq!(second.tracking_number.as_deref(), Some("TRK-PO-user1234-0001-V2"));

    service.mark_received(tenant_id, order.id(), &po_ids[0], now).unwrap();
    let completed = service.mark_received(tenant_id, order.id(), &po_ids[1], now).unwrap();
    assert_eq!(completed.status(), OrderStatus::Completed);
    assert!(
        completed
            .purchase_orders()
            .iter()
            .all(|po| po.status == PurchaseOrderStatus::Received)
    );

    let billing = service.billing_events().subscribe();
    let billed = service
        .record_payment(tenant_id, order.id(), &po_ids[0], PaymentStatus::Paid, now)
        .unwrap();
    assert_eq!(billed.len(), 1);
    assert_eq!(billed[0].description, "Item TWL-1 (TWL-1)");
    assert_eq!(billed[0].total_price, Money::from_minor(2_000));
    assert_eq!(billed[0].property_id, Some(property_id));

    // A repeated Paid notification bills nothing.
    let again = service
        .record_payment(tenant_id, order.id(), &po_ids[0], PaymentStatus::Paid, now)
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(billing.drain().len(), 1);

    let unchanged = service.evaluate_completion(tenant_id, order.id(), now).unwrap();
    assert_eq!(unchanged.version(), service.load_order(tenant_id, order.id()).unwrap().version());
}

#[test]
fn purchase_requires_confirmation_and_invoice() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let cart_id = standard_cart(&service, tenant_id, None);
    let towels = line(fx.towels, "TWL-1", 1, 1_000);
    add(&service, tenant_id, &cart_id, towels.clone());
    let order = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();

    let mut session = AssignmentSession::for_order(&order);
    session.assign(towels.item_id, VendorId::new("ACME"));
    let order = service
        .issue_purchase_orders(tenant_id, order.id(), &mut session, Utc::now())
        .unwrap()
        .order;
    let po_id = order.purchase_orders()[0].id.clone();
    assert_eq!(po_id.as_str(), "PO-user1234-0001");

    let err = service
        .mark_purchased(tenant_id, order.id(), &po_id, Utc::now())
        .unwrap_err();
    let domain = err.as_domain().unwrap();
    assert!(domain.is_guard_violation());
    assert!(domain.to_string().contains("missing vendor confirmation number"));

    let reloaded = service.load_order(tenant_id, order.id()).unwrap();
    assert_eq!(reloaded.version(), order.version());
}

fn revert(service: &Service, tenant_id: TenantId, cart_id: &CartId) {
    let cart = service
        .execute_cart(
            tenant_id,
            cart_id,
            &CartCommand::RevertToDraft(RevertToDraft {
                tenant_id,
                cart_id: cart_id.clone(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    assert_eq!(cart.status(), CartStatus::Draft);
}

#[test]
fn resubmitting_an_edited_cart_refreshes_the_order() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let cart_id = standard_cart(&service, tenant_id, None);
    add(&service, tenant_id, &cart_id, line(fx.towels, "TWL-1", 1, 1_000));
    let first = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();
    assert_eq!(first.items().len(), 1);

    revert(&service, tenant_id, &cart_id);
    add(&service, tenant_id, &cart_id, line(fx.filters, "FLT-2", 1, 500));

    let second = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();
    assert_eq!(second.id(), first.id());
    assert!(second.version() > first.version());
    assert_eq!(second.status(), OrderStatus::Submitted);
    assert_eq!(second.items().len(), 2);

    let summary = service.order_summary(tenant_id, second.id()).unwrap();
    assert_eq!(summary.subtotal, Money::from_minor(1_500));

    // Unchanged resubmission leaves the order as it is.
    revert(&service, tenant_id, &cart_id);
    let third = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();
    assert_eq!(third.version(), second.version());
}

#[test]
fn resubmission_is_refused_once_purchase_orders_exist() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let cart_id = standard_cart(&service, tenant_id, None);
    let towels = line(fx.towels, "TWL-1", 1, 1_000);
    add(&service, tenant_id, &cart_id, towels.clone());
    let order = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();

    let mut session = AssignmentSession::for_order(&order);
    session.assign(towels.item_id, VendorId::new("ACME"));
    let order = service
        .issue_purchase_orders(tenant_id, order.id(), &mut session, Utc::now())
        .unwrap()
        .order;

    revert(&service, tenant_id, &cart_id);
    add(&service, tenant_id, &cart_id, line(fx.filters, "FLT-2", 1, 500));

    let err = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap_err();
    assert!(err.as_domain().unwrap().is_guard_violation());
    assert_eq!(
        service.load_cart(tenant_id, &cart_id).unwrap().status(),
        CartStatus::Draft
    );
    let reloaded = service.load_order(tenant_id, order.id()).unwrap();
    assert_eq!(reloaded.version(), order.version());
    assert_eq!(reloaded.items().len(), 1);
}

#[test]
fn concurrent_issue_assigns_each_item_once() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let cart_id = standard_cart(&service, tenant_id, None);
    let towels = line(fx.towels, "TWL-1", 1, 1_000);
    add(&service, tenant_id, &cart_id, towels.clone());
    let order = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();

    let outcomes: Vec<Result<_, ServiceError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["ACME", "BOLT"]
            .into_iter()
            .map(|vendor| {
                let (service, order, towels) = (&service, &order, &towels);
                scope.spawn(move || {
                    let mut session = AssignmentSession::for_order(order);
                    session.assign(towels.item_id, VendorId::new(vendor));
                    service.issue_purchase_orders(tenant_id, order.id(), &mut session, Utc::now())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for err in outcomes.iter().filter_map(|r| r.as_ref().err()) {
        assert!(err.is_concurrency_conflict() || err.as_domain().is_some());
    }
    let order = service.load_order(tenant_id, order.id()).unwrap();
    assert_eq!(order.purchase_orders().len(), 1);
    assert_eq!(order.pending_items().count(), 0);
}

#[test]
fn due_recurring_templates_fire_once_per_occurrence() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

    let template = service
        .create_cart(
            tenant_id,
            &author(),
            NewCart {
                name: "Pool chemicals".to_string(),
                cart_type: CartType::Recurring,
                recurrence: Some(
                    RecurrenceDescriptor::new(Frequency::Monthly, start)
                        .on_day_of_month(15)
                        .unwrap(),
                ),
                property_id: Some(PropertyId::new()),
            },
            at(2026, 1, 1),
        )
        .unwrap()
        .cart;
    add(&service, tenant_id, template.id(), line(fx.filters, "CHL-25", 3, 4_599));

    assert!(service.run_due_recurrences(tenant_id, at(2026, 1, 14)).is_empty());

    let fired = service.run_due_recurrences(tenant_id, at(2026, 1, 15));
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].cart.id().as_str(), "CRT-user1234-0002");
    assert!(service.run_due_recurrences(tenant_id, at(2026, 1, 15)).is_empty());

    let spawned = service.load_cart(tenant_id, fired[0].cart.id()).unwrap();
    assert_eq!(spawned.status(), CartStatus::Draft);
    assert_eq!(spawned.items().len(), 1);

    let reloaded = service.load_cart(tenant_id, template.id()).unwrap();
    assert_eq!(
        reloaded.recurrence().unwrap().last_run_at(),
        NaiveDate::from_ymd_opt(2026, 1, 15)
    );
    assert_eq!(service.list_carts(tenant_id).len(), 2);
    let summary = service.cart_summary(tenant_id, template.id()).unwrap();
    assert!(summary.is_template());
    assert_eq!(summary.version, reloaded.version());
}

struct DownStore;

impl SequenceStore for DownStore {
    fn allocate(&self, _author: &AuthorId) -> Result<u64, SequenceStoreError> {
        Err(SequenceStoreError::Unavailable("connection refused".to_string()))
    }

    fn last_issued(&self, _author: &AuthorId) -> Result<Option<u64>, SequenceStoreError> {
        Err(SequenceStoreError::Unavailable("connection refused".to_string()))
    }
}

fn new_cart() -> NewCart {
    NewCart {
        name: "Lobby supplies".to_string(),
        cart_type: CartType::Standard,
        recurrence: None,
        property_id: None,
    }
}

#[test]
fn sequence_outage_degrades_cart_ids_when_allowed() {
    let fx = Fixture::new();
    let service = fx.service_with(DownStore, true);
    let issued = service
        .create_cart(TenantId::new(), &author(), new_cart(), Utc::now())
        .unwrap();
    assert_eq!(issued.uniqueness, Uniqueness::Degraded);
    assert!(issued.cart.id().as_str().starts_with("CRT-user1234-"));
}

#[test]
fn sequence_outage_fails_when_degraded_ids_are_disabled() {
    let fx = Fixture::new();
    let service = fx.service_with(DownStore, false);
    let err = service
        .create_cart(TenantId::new(), &author(), new_cart(), Utc::now())
        .unwrap_err();
    assert!(matches!(err, ServiceError::Sequence(_)));
}

#[test]
fn service_reads_configuration_from_the_environment() {
    let fx = Fixture::new();
    let service: Service = ProcurementService::from_env(
        InMemoryEventStore::new(),
        InMemorySequenceStore::new(),
        fx.catalog.clone(),
    );
    assert_eq!(*service.config(), EngineConfig::from_env());
}

#[test]
fn billing_outage_is_retried_on_the_next_paid_notification() {
    let fx = Fixture::new();
    let service = fx.service();
    let tenant_id = TenantId::new();
    let cart_id = standard_cart(&service, tenant_id, Some(PropertyId::new()));
    let towels = line(fx.towels, "TWL-1", 2, 1_000);
    add(&service, tenant_id, &cart_id, towels.clone());
    let order = service.submit_cart(tenant_id, &cart_id, Utc::now()).unwrap();

    let mut session = AssignmentSession::for_order(&order);
    session.assign(towels.item_id, VendorId::new("ACME"));
    let order = service
        .issue_purchase_orders(tenant_id, order.id(), &mut session, Utc::now())
        .unwrap()
        .order;
    let po_id = order.purchase_orders()[0].id.clone();

    let billing = service.billing_events().subscribe();
    service.billing_events().close();
    let err = service
        .record_payment(tenant_id, order.id(), &po_id, PaymentStatus::Paid, Utc::now())
        .unwrap_err();
    assert!(matches!(err, ServiceError::Billing(BillingError::Publish(_))));

    let reloaded = service.load_order(tenant_id, order.id()).unwrap();
    let po = reloaded.purchase_order(&po_id).unwrap();
    assert_eq!(po.payment_status, PaymentStatus::Paid);
    assert!(po.awaits_billing());

    service.billing_events().reopen();
    let billed = service
        .record_payment(tenant_id, order.id(), &po_id, PaymentStatus::Paid, Utc::now())
        .unwrap();
    assert_eq!(billed.len(), 1);
    assert_eq!(billed[0].total_price, Money::from_minor(2_000));

    let again = service
        .record_payment(tenant_id, order.id(), &po_id, PaymentStatus::Paid, Utc::now())
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(billing.drain().len(), 1);

    let reloaded = service.load_order(tenant_id, order.id()).unwrap();
    assert!(reloaded.purchase_order(&po_id).unwrap().billed);
}

/// Event store that rejects the next append to one stream.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryEventStore,
    fail_next: Mutex<Option<String>>,
}

impl FlakyStore {
    fn fail_next_append_to(&self, stream_id: &str) {
        *self.fail_next.lock().unwrap() = Some(stream_id.to_string());
    }
}

impl EventStore for FlakyStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if events
                .first()
                .is_some_and(|e| fail_next.as_deref() == Some(e.stream_id.as_str()))
            {
                *fail_next = None;
                return Err(EventStoreError::InvalidAppend("storage offline".to_string()));
            }
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_id: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(tenant_id, stream_id)
    }
}

fn monthly_template<Q: SequenceStore, S: EventStore>(
    service: &Service<Q, S>,
    fx: &Fixture,
    tenant_id: TenantId,
) -> CartId {
    let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let template = service
        .create_cart(
            tenant_id,
            &author(),
            NewCart {
                name: "Pool chemicals".to_string(),
                cart_type: CartType::Recurring,
                recurrence: Some(
                    RecurrenceDescriptor::new(Frequency::Monthly, start)
                        .on_day_of_month(15)
                        .unwrap(),
                ),
                property_id: None,
            },
            at(2026, 1, 1),
        )
        .unwrap()
        .cart;
    add(service, tenant_id, template.id(), line(fx.filters, "CHL-25", 3, 4_599));
    template.id().clone()
}

#[test]
fn failed_spawned_cart_write_leaves_the_occurrence_due() {
    let fx = Fixture::new();
    let store = Arc::new(FlakyStore::default());
    let service = fx.service_on(store.clone());
    let tenant_id = TenantId::new();
    let template_id = monthly_template(&service, &fx, tenant_id);

    store.fail_next_append_to("CRT-user1234-0002");
    let err = service
        .fire_recurrence(tenant_id, &template_id, at(2026, 1, 15))
        .unwrap_err();
    assert!(matches!(err, ServiceError::Dispatch(_)));

    let template = service.load_cart(tenant_id, &template_id).unwrap();
    assert_eq!(template.recurrence().unwrap().last_run_at(), None);
    assert_eq!(service.list_carts(tenant_id).len(), 1);

    let fired = service
        .fire_recurrence(tenant_id, &template_id, at(2026, 1, 15))
        .unwrap()
        .unwrap();
    assert_eq!(fired.cart.id().as_str(), "CRT-user1234-0003");
    assert_eq!(fired.occurrence, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    let template = service.load_cart(tenant_id, &template_id).unwrap();
    assert_eq!(
        template.recurrence().unwrap().last_run_at(),
        NaiveDate::from_ymd_opt(2026, 1, 15)
    );
}

#[test]
fn unrecorded_occurrence_reports_the_orphaned_cart() {
    let fx = Fixture::new();
    let store = Arc::new(FlakyStore::default());
    let service = fx.service_on(store.clone());
    let tenant_id = TenantId::new();
    let template_id = monthly_template(&service, &fx, tenant_id);

    store.fail_next_append_to(template_id.as_str());
    let err = service
        .fire_recurrence(tenant_id, &template_id, at(2026, 1, 15))
        .unwrap_err();
    let cart_id = match &err {
        ServiceError::OrphanedCart {
            template_id: reported,
            cart_id,
            ..
        } => {
            assert_eq!(reported, &template_id);
            cart_id.clone()
        }
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(cart_id.as_str(), "CRT-user1234-0002");

    let orphan = service.load_cart(tenant_id, &cart_id).unwrap();
    assert_eq!(orphan.status(), CartStatus::Draft);
    assert!(service.cart_summary(tenant_id, &cart_id).is_some());
    let template = service.load_cart(tenant_id, &template_id).unwrap();
    assert_eq!(template.recurrence().unwrap().last_run_at(), None);
}

#[derive(Default)]
struct SwitchableStore {
    inner: InMemorySequenceStore,
    down: AtomicBool,
}

impl SwitchableStore {
    fn check(&self) -> Result<(), SequenceStoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SequenceStoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl SequenceStore for SwitchableStore {
    fn allocate(&self, author: &AuthorId) -> Result<u64, SequenceStoreError> {
        self.check()?;
        self.inner.allocate(author)
    }

    fn last_issued(&self, author: &AuthorId) -> Result<Option<u64>, SequenceStoreError> {
        self.check()?;
        self.inner.last_issued(author)
    }
}

#[test]
fn sequence_outage_while_firing_surfaces_the_store_error() {
    let fx = Fixture::new();
    let sequences = Arc::new(SwitchableStore::default());
    let service = fx.service_with(sequences.clone(), false);
    let tenant_id = TenantId::new();
    let template_id = monthly_template(&service, &fx, tenant_id);

    sequences.down.store(true, Ordering::SeqCst);
    let err = service
        .fire_recurrence(tenant_id, &template_id, at(2026, 1, 15))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Sequence(SequenceStoreError::Unavailable(_))
    ));
    assert_eq!(service.list_carts(tenant_id).len(), 1);

    sequences.down.store(false, Ordering::SeqCst);
    assert_eq!(service.run_due_recurrences(tenant_id, at(2026, 1, 15)).len(), 1);
}
