//! Vendor catalog: vendors and the per-product price options used for
//! comparison during vendor assignment.
//!
//! The engine only reads from the catalog; it never mutates vendor data.

pub mod vendor;

pub use vendor::{InMemoryVendorCatalog, Vendor, VendorCatalog, VendorId, VendorOption};
