//! # Money Types
//!
//! Currency and price types. Amounts are held in the smallest currency unit;
//! rates, ratios and percentages are applied with `Decimal` and rounded back.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    ARS,
    EUR,
    BRL,
    MXN,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::ARS => "ARS",
            Currency::EUR => "EUR",
            Currency::BRL => "BRL",
            Currency::MXN => "MXN",
        }
    }

    /// Number of decimal places for this currency
    pub fn decimal_places(&self) -> u32 {
        2
    }

    /// Smallest units per whole currency unit (100 for cents)
    pub fn minor_per_unit(&self) -> i64 {
        10_i64.pow(self.decimal_places())
    }

    /// Convert a decimal amount to the smallest currency unit, rounding half away from zero.
    /// Amounts outside the `i64` range saturate rather than wrap or vanish.
    pub fn to_smallest_unit(&self, amount: Decimal) -> i64 {
        amount
            .checked_mul(Decimal::from(self.minor_per_unit()))
            .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|minor| minor.to_i64())
            .unwrap_or_else(|| {
                warn!(%amount, currency = self.as_str(), "amount out of range, saturating");
                if amount.is_sign_negative() {
                    i64::MIN
                } else {
                    i64::MAX
                }
            })
    }

    /// Convert from smallest unit back to decimal
    pub fn from_smallest_unit(&self, amount: i64) -> Decimal {
        Decimal::new(amount, self.decimal_places())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::ARS
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit (cents)
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a price from a decimal amount
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: currency.to_smallest_unit(amount),
            currency,
        }
    }

    /// Create a price from smallest unit (cents)
    pub fn from_cents(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        Self::from_cents(0, currency)
    }

    /// One whole currency unit
    pub fn one_unit(currency: Currency) -> Self {
        Self::from_cents(currency.minor_per_unit(), currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Get the decimal amount
    pub fn as_decimal(&self) -> Decimal {
        self.currency.from_smallest_unit(self.amount)
    }

    /// Multiply by a quantity
    pub fn times(&self, quantity: u32) -> Self {
        Self::from_cents(self.amount.saturating_mul(i64::from(quantity)), self.currency)
    }

    /// Scale by a decimal factor and round to the smallest unit
    pub fn scale(&self, factor: Decimal) -> Self {
        Self::new(self.as_decimal() * factor, self.currency)
    }

    /// Format for display (e.g., "ARS 1500.00")
    pub fn display(&self) -> String {
        format!("{} {:.2}", self.currency, self.as_decimal())
    }
}
