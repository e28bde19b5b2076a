//! # Exchange Rate Refresh
//!
//! HTTP rate source and the background task that keeps
//! [`ExchangeRates`](settle_core::ExchangeRates) fresh.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use settle_core::{
    ExchangeRateSource, ExchangeRates, FixedRateSource, PaymentError, PaymentResult,
    RateSourceConfig,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Reads a rate from a JSON endpoint
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
    /// Dot path into the response, e.g. `blue.value_sell`
    field: String,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>, field: impl Into<String>) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            field: field.into(),
        })
    }
}

/// Follow a dot path and read a number or numeric string
fn rate_at(json: &Value, field: &str) -> Option<Decimal> {
    let value = field
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(json, |node, segment| node.get(segment))?;

    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[async_trait]
impl ExchangeRateSource for HttpRateSource {
    async fn fetch_rate(&self) -> PaymentResult<Decimal> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::ProviderError {
                provider: "exchange-rate".to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| PaymentError::Serialization(e.to_string()))?;

        rate_at(&json, &self.field).ok_or_else(|| {
            PaymentError::Serialization(format!("no numeric rate at '{}'", self.field))
        })
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Source described by the pricing config
pub fn rate_source(config: &RateSourceConfig) -> PaymentResult<Arc<dyn ExchangeRateSource>> {
    Ok(match config {
        RateSourceConfig::Fixed { rate } => Arc::new(FixedRateSource::new(*rate)),
        RateSourceConfig::Http { url, field } => Arc::new(HttpRateSource::new(url, field)?),
    })
}

/// Refresh `rates` from `source` every `interval`. The first tick fires immediately.
pub fn spawn_refresher(
    rates: ExchangeRates,
    source: Arc<dyn ExchangeRateSource>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(source = source.source_name(), interval_secs = interval.as_secs(), "exchange rate refresher started");

        loop {
            ticker.tick().await;
            match rates.refresh(source.as_ref()).await {
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "exchange rate refresh failed, keeping previous rate");
                }
                Err(err) => {
                    error!(error = %err, "exchange rate refresh failed");
                }
            }
        }
    })
}
