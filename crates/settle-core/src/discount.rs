//! # Discount Ledger
//!
//! Validation of discount codes against a subtotal, and exactly-once
//! consumption bookkeeping after a payment settles.
//!
//! Validation checks run in a fixed order and the first failure wins:
//! `NOT_FOUND`, `INACTIVE`, `NOT_YET_VALID`, `EXPIRED`, `EXHAUSTED`,
//! `BELOW_MINIMUM`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::error::{PaymentError, PaymentResult};
use crate::money::Price;

/// Why a discount code was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscountError {
    #[error("discount code not found")]
    NotFound,

    #[error("discount code is no longer active")]
    Inactive,

    #[error("discount code is not valid yet")]
    NotYetValid,

    #[error("discount code has expired")]
    Expired,

    #[error("discount code has reached its usage limit")]
    Exhausted,

    #[error("subtotal is below the minimum purchase for this code")]
    BelowMinimum,
}

impl DiscountError {
    pub fn code(&self) -> &'static str {
        match self {
            DiscountError::NotFound => "NOT_FOUND",
            DiscountError::Inactive => "INACTIVE",
            DiscountError::NotYetValid => "NOT_YET_VALID",
            DiscountError::Expired => "EXPIRED",
            DiscountError::Exhausted => "EXHAUSTED",
            DiscountError::BelowMinimum => "BELOW_MINIMUM",
        }
    }

    /// Every rejection is a bad request, unknown codes included
    pub fn status_code(&self) -> u16 {
        400
    }
}

/// A persisted discount code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountCode {
    /// Internal row id. The drain code is recognized by this, never by its text.
    pub id: i64,
    pub code: String,
    /// Percentage off (0 means use the fixed amount)
    #[serde(default)]
    pub discount_percent: Decimal,
    /// Fixed amount off, smallest currency unit
    #[serde(default)]
    pub discount_amount: i64,
    #[serde(default)]
    pub max_uses: Option<i64>,
    #[serde(default)]
    pub used_count: i64,
    /// Minimum subtotal, smallest currency unit
    #[serde(default)]
    pub min_purchase_amount: i64,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl DiscountCode {
    /// Active percentage code with no limits
    pub fn percent(id: i64, code: impl Into<String>, percent: Decimal) -> Self {
        Self {
            id,
            code: normalize_code(&code.into()),
            discount_percent: percent,
            discount_amount: 0,
            max_uses: None,
            used_count: 0,
            min_purchase_amount: 0,
            valid_from: None,
            valid_until: None,
            is_active: true,
        }
    }

    /// Active fixed-amount code with no limits
    pub fn fixed(id: i64, code: impl Into<String>, amount: i64) -> Self {
        Self {
            discount_percent: Decimal::ZERO,
            discount_amount: amount,
            ..Self::percent(id, code, Decimal::ZERO)
        }
    }

    pub fn with_max_uses(mut self, max_uses: i64, used_count: i64) -> Self {
        self.max_uses = Some(max_uses);
        self.used_count = used_count;
        self
    }

    pub fn with_min_purchase(mut self, amount: i64) -> Self {
        self.min_purchase_amount = amount;
        self
    }

    pub fn with_window(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.used_count >= max)
    }

    /// Check the code's rules against `subtotal` at `now` and compute the discount.
    pub fn evaluate(
        &self,
        subtotal: Price,
        now: DateTime<Utc>,
        drain_code_id: Option<i64>,
    ) -> Result<AppliedDiscount, DiscountError> {
        if !self.is_active {
            return Err(DiscountError::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(DiscountError::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(DiscountError::Expired);
        }
        if self.is_exhausted() {
            return Err(DiscountError::Exhausted);
        }
        if subtotal.amount < self.min_purchase_amount {
            return Err(DiscountError::BelowMinimum);
        }

        let raw = if drain_code_id == Some(self.id) {
            // Drain to one currency unit regardless of the stored amounts.
            subtotal.amount - Price::one_unit(subtotal.currency).amount
        } else if self.discount_percent > Decimal::ZERO {
            subtotal.scale(self.discount_percent / Decimal::ONE_HUNDRED).amount
        } else {
            self.discount_amount
        };

        Ok(AppliedDiscount {
            code: self.code.clone(),
            discount_amount: Price::from_cents(raw.clamp(0, subtotal.amount.max(0)), subtotal.currency),
            computed_at_subtotal: subtotal,
        })
    }
}

/// A validated discount bound to one checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub code: String,
    pub discount_amount: Price,
    pub computed_at_subtotal: Price,
}

impl AppliedDiscount {
    /// `max(0, subtotal - discount)`
    pub fn total(&self) -> Price {
        Price::from_cents(
            (self.computed_at_subtotal.amount - self.discount_amount.amount).max(0),
            self.computed_at_subtotal.currency,
        )
    }

    /// Fraction of the subtotal that remains payable
    pub fn ratio(&self) -> Decimal {
        if self.computed_at_subtotal.amount <= 0 {
            return Decimal::ONE;
        }
        Decimal::from(self.total().amount) / Decimal::from(self.computed_at_subtotal.amount)
    }
}

/// What `consume` does to `is_active`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumePolicy {
    /// Every successful use deactivates the code, whatever `max_uses` says.
    #[default]
    DeactivateOnFirstUse,
    /// Deactivate only once `used_count` reaches `max_uses`.
    DeactivateWhenExhausted,
}

impl FromStr for ConsumePolicy {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deactivate_on_first_use" | "first_use" => Ok(ConsumePolicy::DeactivateOnFirstUse),
            "deactivate_when_exhausted" | "exhausted" => {
                Ok(ConsumePolicy::DeactivateWhenExhausted)
            }
            other => Err(PaymentError::Configuration(format!(
                "unknown discount consume policy: {}",
                other
            ))),
        }
    }
}

/// Storage for discount codes
#[async_trait]
pub trait DiscountStore: Send + Sync {
    /// Look up a code (already normalized)
    async fn find_by_code(&self, code: &str) -> PaymentResult<Option<DiscountCode>>;

    /// Atomically record one use. Returns `false` when no usable row matched
    /// (unknown, inactive or exhausted code).
    async fn consume(&self, code: &str, policy: ConsumePolicy) -> PaymentResult<bool>;
}

/// Codes are compared trimmed and upper-cased
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Validation and consumption over a [`DiscountStore`]
#[derive(Clone)]
pub struct DiscountLedger {
    store: Arc<dyn DiscountStore>,
    drain_code_id: Option<i64>,
    policy: ConsumePolicy,
}

impl DiscountLedger {
    pub fn new(store: Arc<dyn DiscountStore>) -> Self {
        Self {
            store,
            drain_code_id: None,
            policy: ConsumePolicy::default(),
        }
    }

    /// Builder: internal id of the drain code
    pub fn with_drain_code_id(mut self, id: Option<i64>) -> Self {
        self.drain_code_id = id;
        self
    }

    /// Builder: consumption policy
    pub fn with_policy(mut self, policy: ConsumePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn validate(&self, code: &str, subtotal: Price) -> PaymentResult<AppliedDiscount> {
        self.validate_at(code, subtotal, Utc::now()).await
    }

    #[instrument(skip(self, subtotal), fields(subtotal = subtotal.amount))]
    pub async fn validate_at(
        &self,
        code: &str,
        subtotal: Price,
        now: DateTime<Utc>,
    ) -> PaymentResult<AppliedDiscount> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Err(DiscountError::NotFound.into());
        }

        let discount = self
            .store
            .find_by_code(&normalized)
            .await?
            .ok_or(DiscountError::NotFound)?;

        let applied = discount.evaluate(subtotal, now, self.drain_code_id)?;
        debug!(
            code = %applied.code,
            discount = applied.discount_amount.amount,
            "discount code validated"
        );
        Ok(applied)
    }

    /// Record one use of `code`
    #[instrument(skip(self))]
    pub async fn consume(&self, code: &str) -> PaymentResult<bool> {
        let normalized = normalize_code(code);
        let consumed = self.store.consume(&normalized, self.policy).await?;
        info!(code = %normalized, consumed, "discount code consumption");
        Ok(consumed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::money::Currency;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store mirroring the conditional update of the SQL store
    #[derive(Default)]
    pub(crate) struct MemoryDiscountStore {
        pub(crate) codes: Mutex<HashMap<String, DiscountCode>>,
    }

    impl MemoryDiscountStore {
        pub(crate) fn with(codes: Vec<DiscountCode>) -> Self {
            Self {
                codes: Mutex::new(codes.into_iter().map(|c| (c.code.clone(), c)).collect()),
            }
        }
    }

    #[async_trait]
    impl DiscountStore for MemoryDiscountStore {
        async fn find_by_code(&self, code: &str) -> PaymentResult<Option<DiscountCode>> {
            Ok(self.codes.lock().unwrap().get(code).cloned())
        }

        async fn consume(&self, code: &str, policy: ConsumePolicy) -> PaymentResult<bool> {
            let mut codes = self.codes.lock().unwrap();
            let Some(row) = codes.get_mut(code) else {
                return Ok(false);
            };
            if !row.is_active || row.is_exhausted() {
                return Ok(false);
            }
            row.used_count += 1;
            row.is_active = match policy {
                ConsumePolicy::DeactivateOnFirstUse => false,
                ConsumePolicy::DeactivateWhenExhausted => !row.is_exhausted(),
            };
            Ok(true)
        }
    }

    fn ars(amount: i64) -> Price {
        Price::from_cents(amount, Currency::ARS)
    }

    #[test]
    fn test_percent_discount_is_clamped_fraction_of_subtotal() {
        let now = Utc::now();
        for (subtotal, percent) in [
            (100_000, dec!(10)),
            (33_333, dec!(15)),
            (1, dec!(50)),
            (0, dec!(20)),
            (50_000, dec!(100)),
            (50_000, dec!(150)),
        ] {
            let code = DiscountCode::percent(1, "save", percent);
            let applied = code.evaluate(ars(subtotal), now, None).unwrap();
            let expected = ars(subtotal)
                .scale(percent / Decimal::ONE_HUNDRED)
                .amount
                .clamp(0, subtotal);
            assert_eq!(applied.discount_amount.amount, expected, "S={} P={}", subtotal, percent);
        }
    }

    #[test]
    fn test_fixed_discount_clamped_to_subtotal() {
        let code = DiscountCode::fixed(1, "flat", 5_000);
        let applied = code.evaluate(ars(3_000), Utc::now(), None).unwrap();
        assert_eq!(applied.discount_amount.amount, 3_000);
        assert_eq!(applied.total().amount, 0);
    }

    #[test]
    fn test_drain_code_leaves_one_unit() {
        let code = DiscountCode::percent(42, "promo", dec!(5));
        for subtotal in [100, 101, 12_345, 9_999_999] {
            let applied = code.evaluate(ars(subtotal), Utc::now(), Some(42)).unwrap();
            assert_eq!(applied.total().amount, 100);
        }
        // Below one unit there is nothing to drain.
        let applied = code.evaluate(ars(50), Utc::now(), Some(42)).unwrap();
        assert_eq!(applied.discount_amount.amount, 0);

        // Same text, different id: normal percentage applies.
        let applied = code.evaluate(ars(10_000), Utc::now(), Some(7)).unwrap();
        assert_eq!(applied.discount_amount.amount, 500);
    }

    #[test]
    fn test_below_minimum() {
        let code = DiscountCode::percent(1, "big", dec!(10)).with_min_purchase(1_000);
        assert_eq!(
            code.evaluate(ars(500), Utc::now(), None),
            Err(DiscountError::BelowMinimum)
        );
    }

    #[test]
    fn test_exhausted() {
        let code = DiscountCode::percent(1, "five", dec!(10)).with_max_uses(5, 5);
        assert_eq!(
            code.evaluate(ars(10_000), Utc::now(), None),
            Err(DiscountError::Exhausted)
        );
    }

    #[test]
    fn test_expired_wins_over_below_minimum() {
        let now = Utc::now();
        let code = DiscountCode::percent(1, "old", dec!(10))
            .with_min_purchase(1_000)
            .with_window(None, Some(now - Duration::days(1)));
        assert_eq!(code.evaluate(ars(500), now, None), Err(DiscountError::Expired));
    }

    #[test]
    fn test_check_order() {
        let now = Utc::now();
        let everything_wrong = DiscountCode::percent(1, "bad", dec!(10))
            .with_min_purchase(1_000)
            .with_max_uses(1, 1)
            .with_window(Some(now + Duration::days(1)), Some(now - Duration::days(1)));

        assert_eq!(
            everything_wrong.clone().inactive().evaluate(ars(1), now, None),
            Err(DiscountError::Inactive)
        );
        assert_eq!(
            everything_wrong.evaluate(ars(1), now, None),
            Err(DiscountError::NotYetValid)
        );
    }

    #[tokio::test]
    async fn test_unknown_code_not_found() {
        let ledger = DiscountLedger::new(Arc::new(MemoryDiscountStore::default()));
        let err = ledger.validate("nope", ars(1_000)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Discount(DiscountError::NotFound)));

        let err = ledger.validate("   ", ars(1_000)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Discount(DiscountError::NotFound)));
    }

    #[tokio::test]
    async fn test_code_lookup_is_case_insensitive() {
        let store = MemoryDiscountStore::with(vec![DiscountCode::percent(1, "Winter10", dec!(10))]);
        let ledger = DiscountLedger::new(Arc::new(store));
        let applied = ledger.validate(" winter10 ", ars(10_000)).await.unwrap();
        assert_eq!(applied.code, "WINTER10");
        assert_eq!(applied.discount_amount.amount, 1_000);
    }

    // Current behavior: one use deactivates the code even when max_uses > 1.
    // Switch to ConsumePolicy::DeactivateWhenExhausted if that is not intended.
    #[tokio::test]
    async fn test_consume_then_validate_is_inactive_regardless_of_max_uses() {
        let store = MemoryDiscountStore::with(vec![
            DiscountCode::percent(1, "MULTI", dec!(10)).with_max_uses(10, 0)
        ]);
        let ledger = DiscountLedger::new(Arc::new(store));

        assert!(ledger.consume("multi").await.unwrap());
        let err = ledger.validate("MULTI", ars(10_000)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Discount(DiscountError::Inactive)));

        // A second consumption finds nothing usable.
        assert!(!ledger.consume("MULTI").await.unwrap());
    }

    #[tokio::test]
    async fn test_deactivate_when_exhausted_policy() {
        let store = MemoryDiscountStore::with(vec![
            DiscountCode::percent(1, "TWICE", dec!(10)).with_max_uses(2, 0)
        ]);
        let ledger = DiscountLedger::new(Arc::new(store))
            .with_policy(ConsumePolicy::DeactivateWhenExhausted);

        assert!(ledger.consume("TWICE").await.unwrap());
        assert!(ledger.validate("TWICE", ars(10_000)).await.is_ok());
        assert!(ledger.consume("TWICE").await.unwrap());
        let err = ledger.validate("TWICE", ars(10_000)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Discount(DiscountError::Inactive)));
    }

    #[test]
    fn test_consume_policy_from_str() {
        assert_eq!(
            "deactivate_when_exhausted".parse::<ConsumePolicy>().unwrap(),
            ConsumePolicy::DeactivateWhenExhausted
        );
        assert_eq!(
            "FIRST_USE".parse::<ConsumePolicy>().unwrap(),
            ConsumePolicy::DeactivateOnFirstUse
        );
        assert!("sometimes".parse::<ConsumePolicy>().is_err());
    }
}
