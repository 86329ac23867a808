//! Tenant-isolated read models.

pub mod carts;
pub mod tenant_store;

pub use carts::CartSummary;
pub use tenant_store::{InMemoryTenantStore, TenantStore};
