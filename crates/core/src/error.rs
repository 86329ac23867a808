//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// All variants are local, recoverable failures returned to the caller. The
/// engine never repairs invalid input on its own; each variant names the exact
/// condition the calling layer has to fix before retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A lineage identifier did not parse into author/sequence components.
    #[error("malformed identifier: {0}")]
    MalformedId(String),

    /// A lifecycle transition was attempted while its precondition is unmet.
    #[error("guard violation: {0}")]
    GuardViolation(String),

    /// A vendor assignment referenced a vendor missing from the catalog.
    #[error("unknown vendor: {0}")]
    UnknownVendor(String),

    /// Purchase order creation was attempted without any assigned items.
    #[error("no items assigned to a vendor")]
    EmptyAssignment,

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn malformed_id(msg: impl Into<String>) -> Self {
        Self::MalformedId(msg.into())
    }

    /// Guard failure naming the unmet precondition
    /// (e.g. `"missing vendor confirmation number"`).
    pub fn guard(unmet: impl Into<String>) -> Self {
        Self::GuardViolation(unmet.into())
    }

    pub fn unknown_vendor(vendor: impl core::fmt::Display) -> Self {
        Self::UnknownVendor(vendor.to_string())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// True for guard failures; callers typically prompt for the missing data.
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Self::GuardViolation(_))
    }
}
