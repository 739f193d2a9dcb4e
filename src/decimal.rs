use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

use crate::errors::LoanError;

/// decimal places of the currency minor unit (cents)
pub const MINOR_UNIT_DP: u32 = 2;

/// quantise a raw decimal to the minor unit using round-half-even
pub fn quantize(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::MidpointNearestEven)
}

/// Money type fixed to the currency minor unit.
///
/// Every constructor and every multiplicative operation re-quantises with
/// round-half-even, so addition and subtraction between two `Money` values
/// are always exact. Deserialization refuses amounts finer than the minor
/// unit instead of rounding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "Decimal")]
pub struct Money(Decimal);

impl TryFrom<Decimal> for Money {
    type Error = LoanError;

    fn try_from(d: Decimal) -> Result<Self, LoanError> {
        let quantized = quantize(d);
        if quantized != d {
            return Err(LoanError::validation(format!(
                "amount {} has more than {} decimal places",
                d, MINOR_UNIT_DP
            )));
        }
        Ok(Money(quantized))
    }
}

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// create from decimal, rounding half-even to the minor unit
    pub fn from_decimal(d: Decimal) -> Self {
        Money(quantize(d))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(quantize(Decimal::from_str(s)?)))
    }

    /// create from integer amount (dollars, shillings, etc)
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from minor amount (cents)
    pub fn from_minor(amount: i64) -> Self {
        Money(Decimal::new(amount, MINOR_UNIT_DP))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// amount expressed in minor units
    pub fn to_minor(&self) -> i64 {
        (self.0 * Decimal::from(100)).to_i64().unwrap_or(i64::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// subtraction floored at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        (self - other).max(Money::ZERO)
    }

    /// calculate percentage (e.g., 2 for 2% of the amount)
    pub fn percentage(&self, percent: Decimal) -> Self {
        Money::from_decimal(self.0 * percent / Decimal::from(100))
    }

    /// simple interest for `days` at an annual rate on a 365-day year
    pub fn simple_interest(&self, annual_rate: Rate, days: u32) -> Self {
        let interest = self.0 * annual_rate.as_decimal() * Decimal::from(days) / Decimal::from(365);
        Money::from_decimal(interest)
    }

    /// regular share and final share of an even split into `parts`.
    ///
    /// `share * (parts - 1) + last == self` always holds; each share is rounded
    /// half-even and the residual lands on `last`.
    pub fn even_share(&self, parts: u32) -> (Money, Money) {
        if parts <= 1 {
            return (*self, *self);
        }
        let n = Decimal::from(parts);
        let mut share = quantize(self.0 / n);
        if share * (n - Decimal::ONE) > self.0 {
            share = (self.0 / n).round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::ToZero);
        }
        let last = self.0 - share * (n - Decimal::ONE);
        (Money(share), Money(last))
    }

    /// split into `parts` amounts that sum exactly to `self`
    pub fn split_even(&self, parts: u32) -> Vec<Money> {
        if parts == 0 {
            return Vec::new();
        }
        let (share, last) = self.even_share(parts);
        let mut split = vec![share; parts as usize];
        if let Some(tail) = split.last_mut() {
            *tail = last;
        }
        split
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl From<u32> for Money {
    fn from(i: u32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, other: Decimal) -> Money {
        Money::from_decimal(self.0 * other)
    }
}

impl Div<Decimal> for Money {
    type Output = Money;

    fn div(self, other: Decimal) -> Money {
        Money::from_decimal(self.0 / other)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

/// rate type for interest rates, percentages, and ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    /// create from decimal (e.g., 0.24 for 24%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from percentage (e.g., 24 for 24%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::from(100))
    }

    /// create from basis points (e.g., 2400 for 24%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10000))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::from(100)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_refuses_sub_cent_amounts() {
        let err = serde_json::from_str::<Money>("\"10197.255\"").unwrap_err();
        assert!(err.to_string().contains("more than 2 decimal places"));

        let trailing_zero: Money = serde_json::from_str("\"10197.250\"").unwrap();
        assert_eq!(trailing_zero, Money::from_str_exact("10197.25").unwrap());
        assert_eq!(serde_json::to_string(&trailing_zero).unwrap(), "\"10197.25\"");
    }

    #[test]
    fn test_money_rounds_half_even() {
        assert_eq!(Money::from_decimal(dec!(49.315)), Money::from_str_exact("49.32").unwrap());
        assert_eq!(Money::from_decimal(dec!(49.325)), Money::from_str_exact("49.32").unwrap());
        assert_eq!(Money::from_decimal(dec!(0.005)), Money::ZERO);
        assert_eq!(Money::from_decimal(dec!(0.015)), Money::from_minor(2));
    }

    #[test]
    fn test_minor_units() {
        let m = Money::from_minor(123_456);
        assert_eq!(m.to_string(), "1234.56");
        assert_eq!(m.to_minor(), 123_456);
        assert_eq!(Money::from_minor(1), Money::CENT);
    }

    #[test]
    fn test_split_even_reconciles() {
        let total = Money::from_major(100);
        let parts = total.split_even(3);
        assert_eq!(parts, vec![
            Money::from_minor(3333),
            Money::from_minor(3333),
            Money::from_minor(3334),
        ]);
        assert_eq!(parts.iter().sum::<Money>(), total);
    }

    #[test]
    fn test_split_even_never_negative_tail() {
        let parts = Money::from_minor(15).split_even(10);
        assert_eq!(parts.iter().sum::<Money>(), Money::from_minor(15));
        assert!(parts.iter().all(|p| !p.is_negative()));
    }

    #[test]
    fn test_simple_interest() {
        let principal = Money::from_major(10_000);
        let interest = principal.simple_interest(Rate::from_percentage(24), 30);
        // 10000 * 0.24 * 30 / 365 = 197.2602...
        assert_eq!(interest, Money::from_str_exact("197.26").unwrap());
    }

    #[test]
    fn test_rate_display() {
        assert_eq!(Rate::from_percentage(24).to_string(), "24%");
        assert_eq!(Rate::from_bps(250).to_string(), "2.5%");
    }
}
