//! Carts domain module: the user-authored draft that becomes an order.
//!
//! Business rules only (no IO, no HTTP, no storage). Template carts
//! (Recurring / Scheduled) spawn fresh Draft instances via [`fire_if_due`].

pub mod cart;
pub mod template;

pub use cart::{
    AddItem, Cart, CartCommand, CartCreated, CartEvent, CartItem, CartStatus, CartSubmitted,
    CartType, CreateCart, ItemAdded, ItemQuantityChanged, ItemRemoved, MarkReadyForReview,
    RecordOccurrence, RecurrenceFired, RemoveItem, ReturnToDraft, RevertToDraft, Submit,
    UpdateItemQuantity,
};
pub use template::{FiredInstance, due_occurrence, fire_if_due};
