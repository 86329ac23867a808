//! Spawning fresh cart instances from Recurring / Scheduled templates.

use chrono::{DateTime, NaiveDate, Utc};

use procura_core::{Aggregate, AggregateRoot, DomainError, ItemId};
use procura_events::execute;
use procura_identity::CartId;
use procura_scheduling::OccurrenceFired;

use crate::cart::{
    AddItem, Cart, CartCommand, CartEvent, CartItem, CartType, CreateCart, RecordOccurrence,
};

/// A cart spawned from a template, plus the occurrence it covers.
///
/// Carries the events produced on both streams so a store can append them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredInstance {
    pub occurrence: NaiveDate,
    pub cart: Cart,
    pub cart_events: Vec<CartEvent>,
    pub template_events: Vec<CartEvent>,
}

/// Occurrence the template should fire for on `today`, if any.
///
/// Scheduled templates are one-shot: once they have fired they are never due
/// again.
pub fn due_occurrence(template: &Cart, today: NaiveDate) -> Option<NaiveDate> {
    if !template.cart_type().is_template() {
        return None;
    }
    let recurrence = template.recurrence()?;
    if template.cart_type() == CartType::Scheduled && !recurrence.firings().is_empty() {
        return None;
    }
    if recurrence.is_due(today) {
        recurrence.next_occurrence()
    } else {
        None
    }
}

/// Fire `template` if an occurrence is due at `now`.
///
/// On success the template records an `OccurrenceFired` fact and a new Draft
/// Standard cart is returned, carrying copies of the template's items under
/// fresh item ids. `mint_id` is only called when an occurrence is due and its
/// error is returned as is. On any error the template is left untouched.
pub fn fire_if_due<F, E>(
    template: &mut Cart,
    now: DateTime<Utc>,
    mint_id: F,
) -> Result<Option<FiredInstance>, E>
where
    F: FnOnce() -> Result<CartId, E>,
    E: From<DomainError>,
{
    if !template.is_created() {
        return Err(DomainError::not_found().into());
    }
    if !template.cart_type().is_template() {
        return Err(DomainError::validation("cart is not a recurring template").into());
    }
    let Some(occurrence) = due_occurrence(template, now.date_naive()) else {
        return Ok(None);
    };
    let (Some(tenant_id), Some(author_id)) = (template.tenant_id(), template.author_id().cloned())
    else {
        return Err(DomainError::invariant("template cart is missing tenant or author").into());
    };

    let cart_id = mint_id()?;

    let record = CartCommand::RecordOccurrence(RecordOccurrence {
        tenant_id,
        cart_id: template.id().clone(),
        fired: OccurrenceFired {
            occurrence,
            fired_at: now,
            spawned_cart_id: cart_id.clone(),
        },
    });
    let template_events = template.handle(&record)?;

    let mut cart = Cart::empty(cart_id.clone());
    let mut cart_events = execute(
        &mut cart,
        &CartCommand::CreateCart(CreateCart {
            tenant_id,
            cart_id: cart_id.clone(),
            author_id,
            name: format!("{} ({occurrence})", template.name()),
            cart_type: CartType::Standard,
            recurrence: None,
            property_id: template.property_id(),
            occurred_at: now,
        }),
    )?;
    for item in template.items() {
        cart_events.extend(execute(
            &mut cart,
            &CartCommand::AddItem(AddItem {
                tenant_id,
                cart_id: cart_id.clone(),
                item: CartItem {
                    item_id: ItemId::new(),
                    ..item.clone()
                },
                occurred_at: now,
            }),
        )?);
    }

    for event in &template_events {
        template.apply(event);
    }

    tracing::info!(
        template = %template.id(),
        cart_id = %cart_id,
        %occurrence,
        items = cart.items().len(),
        "recurring cart fired"
    );

    Ok(Some(FiredInstance {
        occurrence,
        cart,
        cart_events,
        template_events,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartStatus, Submit};
    use procura_core::{AuthorId, DomainResult, Money, ProductId, PropertyId, TenantId};
    use procura_scheduling::{Frequency, RecurrenceDescriptor};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(day: NaiveDate) -> DateTime<Utc> {
        day.and_hms_opt(9, 0, 0).unwrap().and_utc()
    }

    fn template(cart_type: CartType, tenant_id: TenantId) -> Cart {
        let id: CartId = "CRT-user1234-0001".parse().unwrap();
        let mut cart = Cart::empty(id.clone());
        execute(
            &mut cart,
            &CartCommand::CreateCart(CreateCart {
                tenant_id,
                cart_id: id.clone(),
                author_id: AuthorId::new("user-12345678").unwrap(),
                name: "Pool chemicals".to_string(),
                cart_type,
                recurrence: Some(
                    RecurrenceDescriptor::new(Frequency::Monthly, date(2026, 1, 1))
                        .on_day_of_month(15)
                        .unwrap(),
                ),
                property_id: Some(PropertyId::new()),
                occurred_at: at(date(2026, 1, 1)),
            }),
        )
        .unwrap();
        execute(
            &mut cart,
            &CartCommand::AddItem(AddItem {
                tenant_id,
                cart_id: id,
                item: CartItem {
                    item_id: ItemId::new(),
                    product_id: ProductId::new(),
                    sku: "CHL-25".to_string(),
                    name: "Chlorine tablets".to_string(),
                    quantity: 3,
                    unit_price: Money::from_minor(4599),
                    note: Some("25 lb bucket".to_string()),
                    vendor_hint: None,
                },
                occurred_at: at(date(2026, 1, 1)),
            }),
        )
        .unwrap();
        cart
    }

    #[derive(Debug)]
    enum MintError {
        Unavailable,
        Domain,
    }

    impl From<DomainError> for MintError {
        fn from(_: DomainError) -> Self {
            MintError::Domain
        }
    }

    fn minted(seq: u64) -> impl FnOnce() -> DomainResult<CartId> {
        move || format!("CRT-user1234-{seq:04}").parse()
    }

    #[test]
    fn not_due_before_first_occurrence() {
        let mut tpl = template(CartType::Recurring, TenantId::new());
        let fired = fire_if_due::<_, DomainError>(&mut tpl, at(date(2026, 1, 14)), || {
            panic!("id must not be minted when nothing is due")
        })
        .unwrap();
        assert!(fired.is_none());
        assert!(tpl.recurrence().unwrap().firings().is_empty());
    }

    #[test]
    fn firing_spawns_draft_copy_and_records_occurrence() {
        let tenant_id = TenantId::new();
        let mut tpl = template(CartType::Recurring, tenant_id);

        let fired = fire_if_due(&mut tpl, at(date(2026, 1, 15)), minted(2))
            .unwrap()
            .unwrap();

        assert_eq!(fired.occurrence, date(2026, 1, 15));
        assert_eq!(fired.cart.id().as_str(), "CRT-user1234-0002");
        assert_eq!(fired.cart.status(), CartStatus::Draft);
        assert_eq!(fired.cart.cart_type(), CartType::Standard);
        assert_eq!(fired.cart.tenant_id(), Some(tenant_id));
        assert_eq!(fired.cart.property_id(), tpl.property_id());
        assert_eq!(fired.cart.items().len(), 1);
        assert_eq!(fired.cart.items()[0].sku, tpl.items()[0].sku);
        assert_ne!(fired.cart.items()[0].item_id, tpl.items()[0].item_id);
        assert_eq!(fired.cart_events.len(), 2);
        assert!(matches!(fired.template_events[..], [CartEvent::RecurrenceFired(_)]));

        let recurrence = tpl.recurrence().unwrap();
        assert_eq!(recurrence.last_run_at(), Some(date(2026, 1, 15)));
        assert_eq!(recurrence.firings()[0].spawned_cart_id, *fired.cart.id());
        assert_eq!(recurrence.next_occurrence(), Some(date(2026, 2, 15)));
    }

    #[test]
    fn same_period_does_not_fire_twice() {
        let mut tpl = template(CartType::Recurring, TenantId::new());
        fire_if_due(&mut tpl, at(date(2026, 1, 15)), minted(2)).unwrap();
        let again = fire_if_due(&mut tpl, at(date(2026, 1, 20)), minted(3)).unwrap();
        assert!(again.is_none());
        assert_eq!(tpl.recurrence().unwrap().firings().len(), 1);
    }

    #[test]
    fn scheduled_template_fires_only_once() {
        let mut tpl = template(CartType::Scheduled, TenantId::new());
        assert!(fire_if_due(&mut tpl, at(date(2026, 1, 15)), minted(2)).unwrap().is_some());
        assert!(fire_if_due(&mut tpl, at(date(2026, 3, 1)), minted(3)).unwrap().is_none());
    }

    #[test]
    fn spawned_cart_is_submittable() {
        let tenant_id = TenantId::new();
        let mut tpl = template(CartType::Recurring, tenant_id);
        let fired = fire_if_due(&mut tpl, at(date(2026, 1, 15)), minted(2)).unwrap().unwrap();

        let events = fired
            .cart
            .handle(&CartCommand::Submit(Submit {
                tenant_id,
                cart_id: fired.cart.id().clone(),
                occurred_at: at(date(2026, 1, 15)),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn mint_failure_leaves_template_untouched() {
        let mut tpl = template(CartType::Recurring, TenantId::new());
        let before = tpl.clone();
        let err = fire_if_due(&mut tpl, at(date(2026, 1, 15)), || Err(MintError::Unavailable))
            .unwrap_err();
        assert!(matches!(err, MintError::Unavailable));
        assert_eq!(tpl, before);
    }
}
