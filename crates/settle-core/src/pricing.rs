//! # Price Quotes
//!
//! Converts a catalog item's list price and shipping weight into a
//! local-currency unit price for a price tier.
//!
//! ```text
//! total_src = list_price + weight * shipping_rate
//! marked    = total_src * (1 + markup% / 100)      (source currency)
//! unit      = round2(marked * exchange_rate)       (local currency)
//! ```
//!
//! The exchange rate is never a process constant: callers take a snapshot
//! from [`ExchangeRates`], which a background task refreshes from an
//! [`ExchangeRateSource`]. Snapshots older than the configured max age are
//! refused.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::CatalogItem;
use crate::error::{PaymentError, PaymentResult};
use crate::money::{Currency, Price};

/// Customer pricing tier as known by the storefront
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    #[default]
    Retail,
    Wholesale,
}

/// Tier used to pick a markup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceTier {
    NoStock,
    Wholesale,
    Retail,
}

impl PriceTier {
    /// Out-of-stock items are always quoted at the no-stock tier.
    pub fn resolve(customer: CustomerTier, inventory_total: u32) -> Self {
        if inventory_total == 0 {
            return PriceTier::NoStock;
        }
        match customer {
            CustomerTier::Retail => PriceTier::Retail,
            CustomerTier::Wholesale => PriceTier::Wholesale,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceTier::NoStock => "NO_STOCK",
            PriceTier::Wholesale => "WHOLESALE",
            PriceTier::Retail => "RETAIL",
        }
    }
}

/// Markup percentages per tier. Required configuration, there are no defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierMarkups {
    pub retail: Decimal,
    pub wholesale: Decimal,
    pub no_stock: Decimal,
}

impl TierMarkups {
    pub fn percent(&self, tier: PriceTier) -> Decimal {
        match tier {
            PriceTier::Retail => self.retail,
            PriceTier::Wholesale => self.wholesale,
            PriceTier::NoStock => self.no_stock,
        }
    }

    fn validate(&self) -> PaymentResult<()> {
        for (name, value) in [
            ("retail", self.retail),
            ("wholesale", self.wholesale),
            ("no_stock", self.no_stock),
        ] {
            if value <= Decimal::from(-100) {
                return Err(PaymentError::Configuration(format!(
                    "markup for {} tier must be above -100%, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Where exchange rates come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateSourceConfig {
    /// Operator-set rate
    Fixed { rate: Decimal },
    /// JSON endpoint; `field` is a dot path to the numeric rate
    Http { url: String, field: String },
}

/// Exchange-rate refresh settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateConfig {
    pub source: RateSourceConfig,
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_refresh_secs() -> u64 {
    900
}

fn default_max_age_secs() -> u64 {
    3600
}

/// Pricing configuration (loaded from `config/pricing.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Currency of catalog list prices
    pub source_currency: Currency,
    /// Currency customers are charged in
    pub local_currency: Currency,
    /// Shipping cost per weight unit, in the source currency
    pub shipping_rate_per_weight: Decimal,
    pub markups: TierMarkups,
    pub exchange_rate: ExchangeRateConfig,
}

impl PricingConfig {
    /// Parse and validate from TOML
    pub fn from_toml(toml_str: &str) -> PaymentResult<Self> {
        let config: PricingConfig = toml::from_str(toml_str)
            .map_err(|e| PaymentError::Configuration(format!("invalid pricing config: {}", e)))?;
        config.markups.validate()?;
        if config.shipping_rate_per_weight < Decimal::ZERO {
            return Err(PaymentError::Configuration(
                "shipping_rate_per_weight must not be negative".to_string(),
            ));
        }
        Ok(config)
    }
}

/// A rate snapshot: one source-currency unit in local currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(rate: Decimal, fetched_at: DateTime<Utc>) -> Self {
        Self { rate, fetched_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }
}

/// Fetches the current exchange rate
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    async fn fetch_rate(&self) -> PaymentResult<Decimal>;

    fn source_name(&self) -> &'static str;
}

/// Rate set by configuration
#[derive(Debug, Clone, Copy)]
pub struct FixedRateSource {
    rate: Decimal,
}

impl FixedRateSource {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl ExchangeRateSource for FixedRateSource {
    async fn fetch_rate(&self) -> PaymentResult<Decimal> {
        Ok(self.rate)
    }

    fn source_name(&self) -> &'static str {
        "fixed"
    }
}

/// Shared, periodically refreshed exchange-rate cell
#[derive(Debug, Clone)]
pub struct ExchangeRates {
    current: Arc<RwLock<Option<ExchangeRate>>>,
    max_age: Duration,
}

impl ExchangeRates {
    pub fn new(max_age: Duration) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            max_age,
        }
    }

    /// Seeded cell, mostly for tests
    pub fn with_rate(rate: ExchangeRate, max_age: Duration) -> Self {
        let rates = Self::new(max_age);
        if let Ok(mut guard) = rates.current.write() {
            *guard = Some(rate);
        }
        rates
    }

    /// Store a new rate. Non-positive rates are rejected.
    pub fn set(&self, rate: ExchangeRate) -> PaymentResult<()> {
        if rate.rate <= Decimal::ZERO {
            return Err(PaymentError::Configuration(format!(
                "exchange rate must be positive, got {}",
                rate.rate
            )));
        }
        let mut guard = self
            .current
            .write()
            .map_err(|_| PaymentError::Internal("exchange rate lock poisoned".to_string()))?;
        *guard = Some(rate);
        Ok(())
    }

    /// Pull from `source` and store the result
    pub async fn refresh(&self, source: &dyn ExchangeRateSource) -> PaymentResult<ExchangeRate> {
        let rate = ExchangeRate::new(source.fetch_rate().await?, Utc::now());
        self.set(rate)?;
        info!(source = source.source_name(), rate = %rate.rate, "exchange rate refreshed");
        Ok(rate)
    }

    /// Current snapshot if it is not older than `max_age`
    pub fn current(&self, now: DateTime<Utc>) -> PaymentResult<ExchangeRate> {
        let guard = self
            .current
            .read()
            .map_err(|_| PaymentError::Internal("exchange rate lock poisoned".to_string()))?;
        let rate = (*guard).ok_or_else(|| {
            PaymentError::Configuration("exchange rate not loaded yet".to_string())
        })?;
        if rate.age(now) > self.max_age {
            return Err(PaymentError::Configuration(format!(
                "exchange rate is stale (fetched at {})",
                rate.fetched_at.to_rfc3339()
            )));
        }
        Ok(rate)
    }
}

/// A computed quote. A zero `unit_price` means the item cannot be priced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub unit_price: Price,
    pub shipping_component: Price,
    pub tier: PriceTier,
}

impl PriceQuote {
    fn zero(currency: Currency, tier: PriceTier) -> Self {
        Self {
            unit_price: Price::zero(currency),
            shipping_component: Price::zero(currency),
            tier,
        }
    }

    pub fn is_unpriceable(&self) -> bool {
        self.unit_price.amount <= 0
    }
}

/// Pure quote computation over a [`PricingConfig`]
#[derive(Debug, Clone)]
pub struct PriceQuoteCalculator {
    config: PricingConfig,
}

impl PriceQuoteCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn local_currency(&self) -> Currency {
        self.config.local_currency
    }

    /// Quote one unit of `item`. Missing list price or weight yields a zero quote.
    pub fn quote(&self, item: &CatalogItem, tier: PriceTier, rate: &ExchangeRate) -> PriceQuote {
        let currency = self.config.local_currency;
        let (Some(list_price), Some(weight)) = (item.list_price, item.weight) else {
            debug!(item_id = %item.id, "item missing list price or weight");
            return PriceQuote::zero(currency, tier);
        };

        let shipping_src = weight * self.config.shipping_rate_per_weight;
        let total_src = list_price + shipping_src;
        let multiplier =
            Decimal::ONE + self.config.markups.percent(tier) / Decimal::ONE_HUNDRED;
        let marked = total_src * multiplier;

        PriceQuote {
            unit_price: Price::new(marked * rate.rate, currency),
            shipping_component: Price::new(shipping_src * rate.rate, currency),
            tier,
        }
    }
}
