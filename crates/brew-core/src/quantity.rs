//! # Quantity Module
//!
//! Fixed-point quantities for ingredient stock.
//!
//! Recipes call for fractional amounts (18.5 g of beans, 0.25 l of milk),
//! so stock is counted in thousandths of the ingredient's unit. Like
//! [`Money`](crate::money::Money), nothing here ever touches a float.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

/// Number of milli-units in one whole unit.
const SCALE: i64 = 1000;

/// An ingredient amount in thousandths of its unit of measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Creates a quantity from milli-units.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Creates a quantity from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * SCALE)
    }

    /// Returns the raw milli-unit value.
    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Scales a per-unit amount by a sold item count.
    ///
    /// ```rust
    /// use brew_core::quantity::Quantity;
    ///
    /// let beans_per_latte = Quantity::from_milli(18_500);
    /// assert_eq!(beans_per_latte.times(2), Quantity::from_units(37));
    /// ```
    #[inline]
    pub const fn times(&self, count: i64) -> Self {
        Quantity(self.0 * count)
    }

    /// [`times`](Self::times), returning `None` on overflow.
    #[inline]
    pub fn checked_times(&self, count: i64) -> Option<Self> {
        self.0.checked_mul(count).map(Quantity)
    }

    /// Adds, returning `None` on overflow.
    #[inline]
    pub fn checked_add(self, other: Quantity) -> Option<Self> {
        self.0.checked_add(other.0).map(Quantity)
    }

    /// Subtraction that reports underflow below zero as `None`.
    pub fn checked_deplete(&self, amount: Quantity) -> Option<Quantity> {
        let remaining = self.0 - amount.0;
        (remaining >= 0).then_some(Quantity(remaining))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / SCALE;
        let frac = abs % SCALE;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

/// Parses decimal text such as `"18.5"` or `"250"`.
///
/// At most three fractional digits are accepted.
impl FromStr for Quantity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "quantity".to_string(),
            reason: reason.to_string(),
        };

        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("expected a decimal number"));
        }
        if frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("at most three decimal places"));
        }

        let whole: i64 = whole.parse().map_err(|_| invalid("number too large"))?;
        let frac_milli: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<3}", frac).parse().map_err(|_| invalid("bad fraction"))?
        };

        let milli = whole
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac_milli))
            .ok_or_else(|| invalid("number too large"))?;

        Ok(Quantity(if negative { -milli } else { milli }))
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}
