//! Integration tests for the event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus, for carts and orders.
//!
//! Verifies:
//! - Commands append events and publish them in stream order
//! - Streams rehydrate to the same state they were written from
//! - Tenant isolation is preserved
//! - Optimistic concurrency conflicts are detected

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use procura_carts::{AddItem, Cart, CartCommand, CartItem, CartStatus, CartType, CreateCart, Submit};
    use procura_core::{AggregateRoot, AuthorId, ExpectedVersion, ItemId, Money, ProductId, TenantId};
    use procura_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use procura_identity::{CartId, derive_order_id};
    use procura_purchasing::{Order, OrderCommand, OrderStatus, PlaceOrder};

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::service::{CART_STREAM_TYPE, ORDER_STREAM_TYPE};

    type Dispatcher =
        CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn setup() -> Dispatcher {
        CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()))
    }

    fn cart_id() -> CartId {
        "CRT-user1234-0001".parse().unwrap()
    }

    fn author() -> AuthorId {
        AuthorId::new("user-12345678").unwrap()
    }

    fn item(quantity: u32, unit_price: u64) -> CartItem {
        CartItem {
            item_id: ItemId::new(),
            product_id: ProductId::new(),
            sku: "SKU-1".to_string(),
            name: "Air filter".to_string(),
            quantity,
            unit_price: Money::from_minor(unit_price),
            note: None,
            vendor_hint: None,
        }
    }

    fn create(dispatcher: &Dispatcher, tenant_id: TenantId) -> Cart {
        let cmd = CartCommand::CreateCart(CreateCart {
            tenant_id,
            cart_id: cart_id(),
            author_id: author(),
            name: "Unit 12 turnover".to_string(),
            cart_type: CartType::Standard,
            recurrence: None,
            property_id: None,
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch(
                tenant_id,
                cart_id().as_str(),
                CART_STREAM_TYPE,
                &cmd,
                ExpectedVersion::Exact(0),
                || Cart::empty(cart_id()),
            )
            .unwrap()
            .aggregate
    }

    fn add(dispatcher: &Dispatcher, tenant_id: TenantId, item: CartItem) -> Cart {
        let cmd = CartCommand::AddItem(AddItem {
            tenant_id,
            cart_id: cart_id(),
            item,
            occurred_at: Utc::now(),
        });
        dispatcher
            .dispatch(
                tenant_id,
                cart_id().as_str(),
                CART_STREAM_TYPE,
                &cmd,
                ExpectedVersion::Any,
                || Cart::empty(cart_id()),
            )
            .unwrap()
            .aggregate
    }

    #[test]
    fn commands_are_appended_and_published_in_order() {
        let dispatcher = setup();
        let sub = dispatcher.bus().subscribe();
        let tenant_id = TenantId::new();

        create(&dispatcher, tenant_id);
        let cart = add(&dispatcher, tenant_id, item(2, 1_000));
        assert_eq!(cart.version(), 2);

        let published = sub.drain();
        assert_eq!(
            published.iter().map(|e| e.sequence_number()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(published.iter().all(|e| e.stream_id() == cart_id().as_str()));
        assert!(published.iter().all(|e| e.stream_type() == CART_STREAM_TYPE));

        let stored = dispatcher.store().load_stream(tenant_id, cart_id().as_str()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].event_type, "carts.cart.item_added");
    }

    #[test]
    fn load_rehydrates_the_written_state() {
        let dispatcher = setup();
        let tenant_id = TenantId::new();
        create(&dispatcher, tenant_id);
        let written = add(&dispatcher, tenant_id, item(3, 250));

        let loaded: Cart = dispatcher
            .load(tenant_id, cart_id().as_str(), || Cart::empty(cart_id()))
            .unwrap();
        assert_eq!(loaded, written);
        assert_eq!(loaded.total(), Money::from_minor(750));
    }

    #[test]
    fn rejected_command_appends_and_publishes_nothing() {
        let dispatcher = setup();
        let sub = dispatcher.bus().subscribe();
        let tenant_id = TenantId::new();
        create(&dispatcher, tenant_id);
        sub.drain();

        // Empty carts cannot be submitted.
        let err = dispatcher
            .dispatch(
                tenant_id,
                cart_id().as_str(),
                CART_STREAM_TYPE,
                &CartCommand::Submit(Submit {
                    tenant_id,
                    cart_id: cart_id(),
                    occurred_at: Utc::now(),
                }),
                ExpectedVersion::Any,
                || Cart::empty(cart_id()),
            )
            .unwrap_err();
        assert!(err.as_domain().is_some_and(|e| e.is_guard_violation()));
        assert!(sub.drain().is_empty());
        assert_eq!(
            dispatcher.store().load_stream(tenant_id, cart_id().as_str()).unwrap().len(),
            1
        );
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let dispatcher = setup();
        let tenant_id = TenantId::new();
        create(&dispatcher, tenant_id);

        let cmd = CartCommand::AddItem(AddItem {
            tenant_id,
            cart_id: cart_id(),
            item: item(1, 100),
            occurred_at: Utc::now(),
        });
        let err = dispatcher
            .dispatch(
                tenant_id,
                cart_id().as_str(),
                CART_STREAM_TYPE,
                &cmd,
                ExpectedVersion::Exact(0),
                || Cart::empty(cart_id()),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn tenant_isolation_preserved() {
        let dispatcher = setup();
        let (tenant1, tenant2) = (TenantId::new(), TenantId::new());
        create(&dispatcher, tenant1);

        let other: Cart = dispatcher
            .load(tenant2, cart_id().as_str(), || Cart::empty(cart_id()))
            .unwrap();
        assert!(!other.is_created());

        // Same lineage id, different tenant: an independent stream.
        let cart = create(&dispatcher, tenant2);
        assert_eq!(cart.version(), 1);
    }

    #[test]
    fn order_stream_is_placed_from_a_submitted_cart() {
        let dispatcher = setup();
        let tenant_id = TenantId::new();
        create(&dispatcher, tenant_id);
        add(&dispatcher, tenant_id, item(2, 1_000));
        let cart = dispatcher
            .dispatch(
                tenant_id,
                cart_id().as_str(),
                CART_STREAM_TYPE,
                &CartCommand::Submit(Submit {
                    tenant_id,
                    cart_id: cart_id(),
                    occurred_at: Utc::now(),
                }),
                ExpectedVersion::Any,
                || Cart::empty(cart_id()),
            )
            .unwrap()
            .aggregate;
        assert_eq!(cart.status(), CartStatus::Submitted);

        let order_id = derive_order_id(cart_id().as_str()).unwrap();
        let place = OrderCommand::PlaceOrder(PlaceOrder::from_cart(&cart, Utc::now()).unwrap());
        let dispatched = dispatcher
            .dispatch(
                tenant_id,
                order_id.as_str(),
                ORDER_STREAM_TYPE,
                &place,
                ExpectedVersion::Exact(0),
                || Order::empty(order_id.clone()),
            )
            .unwrap();

        assert_eq!(dispatched.aggregate.status(), OrderStatus::Submitted);
        assert_eq!(dispatched.committed.len(), 1);
        assert_eq!(dispatched.committed[0].stream_type, ORDER_STREAM_TYPE);
        assert_eq!(order_id.as_str(), "ORD-user1234-0001");
    }
}
