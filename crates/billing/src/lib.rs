//! Billing Reconciliation Trigger.
//!
//! Turns a purchase order's move to Paid into billable items for the
//! invoicing collaborator, published as a `BillingEvent` on an event bus.

pub mod billable;
pub mod trigger;

pub use billable::{
    BillableItem, CartDirectory, InMemoryCartDirectory, billable_items, resolve_property,
};
pub use trigger::{BILLING_STREAM_TYPE, BillingError, BillingEvent, BillingTrigger};
