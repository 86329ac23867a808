//! Identifier Derivation Service.
//!
//! Allocates a monotonic per-author sequence and renders lineage-preserving
//! identifiers:
//!
//! ```text
//! CRT-<fragment>-<seq>  ->  ORD-<fragment>-<seq>  ->  PO-<fragment>-<seq>[-V<n>]
//! ```
//!
//! Uniqueness is per author only; two authors whose ids share an 8-character
//! fragment can produce equal ids.

pub mod lineage;
pub mod sequence;
pub mod service;

pub use lineage::{
    AUTHOR_FRAGMENT_LEN, CartId, IdKind, LineageId, OrderId, PurchaseOrderId, author_fragment,
    derive_order_id, derive_purchase_order_id, extract_author_fragment, format_cart_id,
};
pub use sequence::{InMemorySequenceStore, SequenceStore, SequenceStoreError};
pub use service::{IdentifierService, IssuedCartId, Uniqueness};
