//! # MercadoPago Checkout Pro
//!
//! Preference creation, payment lookup and notification parsing against the
//! MercadoPago REST API.

use crate::config::MercadoPagoConfig;
use crate::webhook::{extract_payment_id, verify_signature};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_core::{
    CheckoutSession, CheckoutUrls, InboundNotification, Notification, PaymentError,
    PaymentProcessor, PaymentRecord, PaymentResult, PaymentStatus, ProcessorCheckout,
};
use tracing::{debug, error, info, instrument, warn};

const PROVIDER: &str = "mercadopago";

/// Hosted-checkout client for MercadoPago
///
/// Payments are captured on MercadoPago's checkout page; this client only
/// registers preferences and reads payments back.
pub struct MercadoPagoClient {
    config: MercadoPagoConfig,
    client: Client,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn build_preference(
        &self,
        session: &CheckoutSession,
        urls: &CheckoutUrls,
    ) -> PaymentResult<PreferenceRequest> {
        let snapshot = &session.metadata_snapshot;
        let items = session
            .processor_items
            .iter()
            .map(|item| PreferenceItem {
                id: item.id.clone(),
                title: item.title.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price.as_decimal(),
                currency_id: item.unit_price.currency.as_str().to_string(),
            })
            .collect();

        Ok(PreferenceRequest {
            items,
            payer: PreferencePayer {
                email: snapshot.customer.email.clone(),
                name: snapshot.customer.name.clone(),
            },
            external_reference: session.external_reference.clone(),
            metadata: serde_json::to_value(snapshot)?,
            back_urls: BackUrls {
                success: urls.success_url(),
                failure: urls.failure_url(),
                pending: urls.pending_url(),
            },
            auto_return: "approved".to_string(),
            notification_url: urls.notification_url(),
        })
    }

    /// Map a non-success response to an error
    fn api_error(status: StatusCode, body: &str) -> PaymentError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return PaymentError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_secs: 1,
            };
        }

        let detail = serde_json::from_str::<ApiErrorResponse>(body)
            .map(|e| e.message)
            .unwrap_or_else(|_| body.to_string());

        PaymentError::ProviderError {
            provider: PROVIDER.to_string(),
            message: format!("HTTP {}: {}", status.as_u16(), detail),
        }
    }

    fn network_error(err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::NetworkError(format!("timed out: {}", err))
        } else {
            PaymentError::NetworkError(err.to_string())
        }
    }

    /// One GET of `/v1/payments/{id}`
    async fn fetch_payment_once(&self, payment_id: &str) -> PaymentResult<PaymentRecord> {
        let url = format!("{}/v1/payments/{}", self.config.api_base_url, payment_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(Self::network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::network_error)?;

        if status == StatusCode::NOT_FOUND {
            return Err(PaymentError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Self::api_error(status, &body));
        }

        let payment: PaymentResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse MercadoPago payment: {}", e))
        })?;

        Ok(payment.into_record())
    }
}

#[async_trait]
impl PaymentProcessor for MercadoPagoClient {
    #[instrument(skip(self, session, urls), fields(external_reference = %session.external_reference))]
    async fn create_checkout(
        &self,
        session: &CheckoutSession,
        urls: &CheckoutUrls,
    ) -> PaymentResult<ProcessorCheckout> {
        if session.processor_items.is_empty() {
            return Err(PaymentError::Validation("Session has no items".to_string()));
        }

        let preference = self.build_preference(session, urls)?;
        debug!(items = preference.items.len(), "creating MercadoPago preference");

        let url = format!("{}/checkout/preferences", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("X-Idempotency-Key", &session.external_reference)
            .json(&preference)
            .send()
            .await
            .map_err(Self::network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::network_error)?;

        if !status.is_success() {
            error!(%status, %body, "MercadoPago preference rejected");
            return Err(Self::api_error(status, &body));
        }

        let created: PreferenceResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse MercadoPago response: {}", e))
        })?;

        let checkout_url = match (self.config.is_test_mode(), created.sandbox_init_point) {
            (true, Some(sandbox)) => sandbox,
            _ => created.init_point,
        };

        info!(preference_id = %created.id, "created MercadoPago preference");

        Ok(ProcessorCheckout {
            session_id: created.id,
            checkout_url,
            expires_at: created.date_of_expiration,
        })
    }

    /// Lookup with bounded retries on network errors, 429 and 5xx.
    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<PaymentRecord> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match self.fetch_payment_once(payment_id).await {
                Ok(record) => {
                    debug!(attempt, status = record.status.as_str(), "payment fetched");
                    return Ok(record);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, error = %err, "payment lookup failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn parse_notification(&self, inbound: &InboundNotification) -> Notification {
        let notification = extract_payment_id(inbound);

        let (Notification::Payment { payment_id }, Some(secret)) =
            (&notification, self.config.webhook_secret.as_deref())
        else {
            return notification;
        };

        match verify_signature(inbound, payment_id, secret, self.config.signature_tolerance) {
            Ok(()) => notification,
            Err(err) => {
                warn!(%payment_id, error = %err, "notification signature rejected");
                Notification::Ignored {
                    reason: "invalid signature".to_string(),
                }
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

// =============================================================================
// MercadoPago API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct PreferenceRequest {
    items: Vec<PreferenceItem>,
    payer: PreferencePayer,
    external_reference: String,
    metadata: serde_json::Value,
    back_urls: BackUrls,
    auto_return: String,
    notification_url: String,
}

#[derive(Debug, Serialize)]
struct PreferenceItem {
    id: String,
    title: String,
    quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct PreferencePayer {
    email: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
    #[serde(default)]
    date_of_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    transaction_amount: Option<Decimal>,
    #[serde(default)]
    currency_id: Option<String>,
    #[serde(default)]
    payer: Option<PaymentPayer>,
}

#[derive(Debug, Deserialize)]
struct PaymentPayer {
    #[serde(default)]
    email: Option<String>,
}

impl PaymentResponse {
    fn into_record(self) -> PaymentRecord {
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };

        PaymentRecord {
            id,
            status: PaymentStatus::parse(&self.status),
            status_detail: self.status_detail,
            external_reference: self.external_reference,
            metadata: self.metadata,
            transaction_amount: self.transaction_amount,
            currency: self.currency_id,
            payer_email: self.payer.and_then(|p| p.email),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use settle_core::{
        assemble_session, AppliedDiscount, CatalogItem, Currency, Customer, PriceQuote,
        PriceTier, PricedCart, PricedLine, Price, ShippingAddress,
    };
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MercadoPagoClient {
        let config = MercadoPagoConfig::new("APP_USR-test-token")
            .with_api_base_url(server.uri())
            .with_retries(3, Duration::from_millis(1));
        MercadoPagoClient::new(config).unwrap()
    }

    fn session() -> CheckoutSession {
        let line = |id: &str, cents: i64, qty: u32| PricedLine {
            item: CatalogItem::new(id, format!("Item {}", id), dec!(1), dec!(1)),
            quantity: qty,
            quote: PriceQuote {
                unit_price: Price::from_cents(cents, Currency::ARS),
                shipping_component: Price::zero(Currency::ARS),
                tier: PriceTier::Retail,
            },
        };
        let priced = PricedCart {
            lines: vec![line("a", 10_000, 1), line("b", 5_000, 2)],
            subtotal: Price::from_cents(20_000, Currency::ARS),
            exchange_rate: dec!(1000),
        };
        let discount = AppliedDiscount {
            code: "HALF".to_string(),
            discount_amount: Price::from_cents(10_000, Currency::ARS),
            computed_at_subtotal: priced.subtotal,
        };
        assemble_session(
            &priced,
            Some(&discount),
            Customer::new("ana@example.com", "Ana"),
            ShippingAddress::default(),
            Utc::now(),
        )
        .unwrap()
    }

    fn payment_body(status: &str) -> serde_json::Value {
        json!({
            "id": 144728647320u64,
            "status": status,
            "status_detail": "accredited",
            "external_reference": "ref-1",
            "metadata": {"external_reference": "ref-1"},
            "transaction_amount": 100.0,
            "currency_id": "ARS",
            "payer": {"email": "ana@example.com"}
        })
    }

    #[tokio::test]
    async fn test_create_checkout_sends_discounted_items_and_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .and(header("Authorization", "Bearer APP_USR-test-token"))
            .and(body_partial_json(json!({
                "items": [
                    {"id": "a", "quantity": 1, "unit_price": 50.0, "currency_id": "ARS"},
                    {"id": "b", "quantity": 2, "unit_price": 25.0, "currency_id": "ARS"}
                ],
                "metadata": {"discount_code": "HALF", "subtotal": 20000, "total": 10000},
                "notification_url": "https://shop.example.com/payments/webhook",
                "auto_return": "approved"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pref-123",
                "init_point": "https://www.mercadopago.com/checkout?pref_id=pref-123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let checkout = client(&server)
            .create_checkout(&session(), &CheckoutUrls::new("https://shop.example.com"))
            .await
            .unwrap();

        assert_eq!(checkout.session_id, "pref-123");
        assert!(checkout.checkout_url.ends_with("pref-123"));
    }

    #[tokio::test]
    async fn test_create_checkout_error_surfaces_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "invalid items",
                "error": "bad_request",
                "status": 400
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_checkout(&session(), &CheckoutUrls::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderError { ref message, .. } if message.contains("invalid items")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_payment_maps_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/144728647320"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("approved")))
            .mount(&server)
            .await;

        let record = client(&server).fetch_payment("144728647320").await.unwrap();
        assert_eq!(record.id, "144728647320");
        assert!(record.status.is_approved());
        assert_eq!(record.transaction_amount, Some(dec!(100)));
        assert_eq!(record.payer_email.as_deref(), Some("ana@example.com"));
        assert_eq!(record.metadata["external_reference"], "ref-1");
    }

    #[tokio::test]
    async fn test_fetch_payment_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/42"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "status": "pending"})))
            .mount(&server)
            .await;

        let record = client(&server).fetch_payment("42").await.unwrap();
        assert_eq!(record.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_fetch_payment_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/42"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).fetch_payment("42").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_payment_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/7"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).fetch_payment("7").await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_fetch_payment_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/8"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let mut config = MercadoPagoConfig::new("TEST-token")
            .with_api_base_url(server.uri())
            .with_retries(1, Duration::from_millis(1));
        config.request_timeout = Duration::from_millis(50);
        let err = MercadoPagoClient::new(config)
            .unwrap()
            .fetch_payment("8")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_parse_notification_with_secret_requires_signature() {
        let server = MockServer::start().await;
        let config = MercadoPagoConfig::new("TEST-token")
            .with_api_base_url(server.uri())
            .with_webhook_secret("shh");
        let client = MercadoPagoClient::new(config).unwrap();

        let mut inbound = InboundNotification::default();
        inbound.query.insert("type".to_string(), "payment".to_string());
        inbound.query.insert("data.id".to_string(), "123".to_string());
        assert!(matches!(
            client.parse_notification(&inbound),
            Notification::Ignored { .. }
        ));

        // A genuine signature from an old delivery is a replay
        let manifest = crate::webhook::signature_manifest("123", None, "1700000000");
        let sig = crate::webhook::compute_hmac_sha256("shh", &manifest).unwrap();
        inbound
            .headers
            .insert("x-signature".to_string(), format!("ts=1700000000,v1={}", sig));
        assert!(matches!(
            client.parse_notification(&inbound),
            Notification::Ignored { .. }
        ));

        let ts = Utc::now().timestamp().to_string();
        let manifest = crate::webhook::signature_manifest("123", None, &ts);
        let sig = crate::webhook::compute_hmac_sha256("shh", &manifest).unwrap();
        inbound
            .headers
            .insert("x-signature".to_string(), format!("ts={},v1={}", ts, sig));
        assert_eq!(
            client.parse_notification(&inbound),
            Notification::Payment {
                payment_id: "123".to_string()
            }
        );
    }
}
