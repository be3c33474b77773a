//! Value Objects for the point of sale

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

use crate::PosError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self { Self(value) }
        }
    };
}

id_type!(
    /// Row id of a user account.
    UserId
);
id_type!(
    /// The owner or staff account a catalog, customer base and order book belong to.
    TenantId
);
id_type!(ProductId);
id_type!(OrderId);

impl From<UserId> for TenantId {
    fn from(id: UserId) -> Self { Self(id.0) }
}

/// Money value object, always held at minor-unit (2 decimal) precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        let mut amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        amount.rescale(2);
        Self(amount)
    }

    pub fn from_cents(cents: i64) -> Self { Self(Decimal::new(cents, 2)) }

    /// Parses a user supplied price. Anything that is not a non-negative number is rejected.
    pub fn parse_price(input: &str) -> Result<Self, PosError> {
        let trimmed = input.trim();
        let amount = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| PosError::InvalidPrice(input.to_string()))?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PosError::InvalidPrice(input.to_string()));
        }
        Ok(Self::new(amount))
    }

    pub fn amount(&self) -> Decimal { self.0 }

    pub fn cents(&self) -> Result<i64, PosError> {
        (self.0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| PosError::Validation(format!("amount {} is out of range", self.0)))
    }

    pub fn add(&self, other: Money) -> Money { Money(self.0 + other.0) }

    pub fn multiply(&self, qty: Quantity) -> Money { Money(self.0 * Decimal::from(qty.value())) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::ZERO, |acc, m| acc.add(m)) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Quantity value object. A line quantity is never below one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const ONE: Quantity = Quantity(1);

    pub fn new(value: i64) -> Result<Self, PosError> {
        if value < 1 || value > i64::from(u32::MAX) {
            return Err(PosError::InvalidQuantity(value.to_string()));
        }
        Ok(Self(value as u32))
    }

    pub fn value(&self) -> u32 { self.0 }

    pub fn add(&self, other: Quantity) -> Result<Self, PosError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| PosError::InvalidQuantity(format!("{} + {}", self.0, other.0)))
    }

    /// Applies an increment or decrement, never going below one.
    pub fn adjusted(&self, delta: i64) -> Self {
        let next = (i64::from(self.0) + delta).clamp(1, i64::from(u32::MAX));
        Self(next as u32)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = PosError;
    fn try_from(value: i64) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self { q.0 }
}

/// How the customer takes the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "Dine in")]
    DineIn,
    #[serde(rename = "Take out")]
    TakeOut,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::DineIn => "Dine in", Self::TakeOut => "Take out" }
    }
}

impl FromStr for OrderType {
    type Err = PosError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Dine in" => Ok(Self::DineIn),
            "Take out" => Ok(Self::TakeOut),
            other => Err(PosError::InvalidOrderType(other.to_string())),
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
