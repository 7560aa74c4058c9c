//! Value objects shared by the bookstore domain.

use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
///
/// Balances may be negative (overdraft), so the amount is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from whole currency units.
    pub const fn from_units(units: i64) -> Self {
        Self {
            cents: units * 100,
        }
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-unit portion.
    pub fn units(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after whole units).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.units().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.units(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.cents -= rhs.cents;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

const BASIS_POINTS: u32 = 10_000;

/// Fraction of the list price a customer pays, in basis points.
///
/// `DiscountRate::from_basis_points(8_500)` means the customer pays 85% of
/// the list price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountRate(u32);

impl DiscountRate {
    /// Full price, no discount.
    pub const FULL_PRICE: DiscountRate = DiscountRate(BASIS_POINTS);

    /// Returns `None` when the rate is above 100%.
    pub const fn from_basis_points(bp: u32) -> Option<Self> {
        if bp > BASIS_POINTS {
            None
        } else {
            Some(Self(bp))
        }
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// Applies the rate to a list price, rounding half-up to the cent.
    pub fn apply(&self, list_price: Money) -> Money {
        let scaled = list_price.cents() * i64::from(self.0);
        let half = i64::from(BASIS_POINTS / 2);
        let rounded = if scaled >= 0 {
            (scaled + half) / i64::from(BASIS_POINTS)
        } else {
            (scaled - half) / i64::from(BASIS_POINTS)
        };
        Money::from_cents(rounded)
    }
}

impl Default for DiscountRate {
    fn default() -> Self {
        Self::FULL_PRICE
    }
}

impl std::fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:04}", self.0 / BASIS_POINTS, self.0 % BASIS_POINTS)
    }
}
