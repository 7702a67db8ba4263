/// Fixed-point monetary amounts
///
/// Every fiat value in the system is an integer number of cents. Rates and
/// crypto quantities arrive as decimals and are converted to cents at the
/// boundary with round-half-to-even, so no balance ever touches binary
/// floating point.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount overflow in operation")]
    Overflow,

    #[error("Amount must be positive")]
    NotPositive,

    #[error("Amount is not representable in cents")]
    NotRepresentable,
}

/// Fiat amount in cents, signed
///
/// Positive values are credits to the player, negative values debits. The
/// i64 range covers any plausible bankroll.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    /// Convert a decimal dollar amount to cents, ties to even.
    pub fn from_f64_dollars(dollars: f64) -> Result<Self, MoneyError> {
        if !dollars.is_finite() {
            return Err(MoneyError::NotRepresentable);
        }
        let cents = (dollars * 100.0).round_ties_even();
        if cents.abs() >= i64::MAX as f64 {
            return Err(MoneyError::NotRepresentable);
        }
        Ok(Self(cents as i64))
    }

    pub const fn as_cents(self) -> i64 {
        self.0
    }

    /// Decimal dollar view, for display and provider-facing conversions only.
    pub fn to_f64_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub const fn neg(self) -> Self {
        Self(-self.0)
    }

    pub fn checked_add(self, other: Cents) -> Result<Self, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Cents) -> Result<Self, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    /// `self * num / den` with banker's rounding, computed in i128.
    ///
    /// This is the single payout primitive: multipliers are expressed as
    /// integer ratios so results are exact to the cent.
    pub fn mul_ratio(self, num: i64, den: i64) -> Result<Self, MoneyError> {
        if den <= 0 {
            return Err(MoneyError::NotPositive);
        }
        let scaled = (self.0 as i128)
            .checked_mul(num as i128)
            .ok_or(MoneyError::Overflow)?;
        let cents = div_round_half_even(scaled, den as i128);
        i64::try_from(cents)
            .map(Self)
            .map_err(|_| MoneyError::Overflow)
    }
}

impl std::ops::Add for Cents {
    type Output = Cents;

    fn add(self, other: Cents) -> Cents {
        Cents(self.0 + other.0)
    }
}

impl std::ops::Sub for Cents {
    type Output = Cents;

    fn sub(self, other: Cents) -> Cents {
        Cents(self.0 - other.0)
    }
}

impl std::iter::Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Cents {
        Cents(iter.map(|c| c.0).sum())
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Floor division adjusted to round-half-even. `den` must be positive.
fn div_round_half_even(num: i128, den: i128) -> i128 {
    let q = num.div_euclid(den);
    let r = num.rem_euclid(den);
    let twice = 2 * r;
    if twice > den || (twice == den && q % 2 != 0) {
        q + 1
    } else {
        q
    }
}
