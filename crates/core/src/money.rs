//! Single-currency money in minor units, plus the fixed-rate tax estimate.

use core::iter::Sum;
use core::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Amount in the smallest currency unit (e.g., cents).
///
/// The engine is single-currency; there is no currency code.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    /// Line total for `quantity` units at this unit price.
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(u64::from(quantity)))
    }

    /// `self - other`, or `None` when `other` is larger.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl ValueObject for Money {}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Fixed-rate tax estimate, rounded half-up to the nearest minor unit.
///
/// `rate_bps` is in basis points (825 = 8.25%). This is an estimate only; the
/// engine does no jurisdictional tax calculation.
pub fn estimate_tax(subtotal: Money, rate_bps: u32) -> Money {
    let scaled = u128::from(subtotal.0) * u128::from(rate_bps);
    let rounded = (scaled + 5_000) / 10_000;
    Money(u64::try_from(rounded).unwrap_or(u64::MAX))
}
