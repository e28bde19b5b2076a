//! # Request Handlers
//!
//! Axum request handlers for checkout, payment notifications, discount
//! previews and bank-transfer orders.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use settle_core::{
    AppliedDiscount, BankTransferReceipt, CartLine, Customer, InboundNotification, PaymentError,
    PendingOrderInput, Price, PricedCart, ShippingAddress, WebhookOutcome,
};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Cart submission shared by the checkout and bank-transfer routes
#[derive(Debug, Deserialize)]
pub struct CartRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    pub customer: Customer,
    #[serde(default)]
    pub shipping: ShippingAddress,
    #[serde(default)]
    pub discount_code: Option<String>,
}

/// Create checkout response
#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    /// Redirect the customer here
    pub checkout_url: String,
    pub external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub currency: String,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct ValidateDiscountRequest {
    pub code: String,
    /// Smallest currency unit
    pub subtotal: i64,
}

#[derive(Debug, Serialize)]
pub struct ValidateDiscountResponse {
    pub code: String,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
}

impl From<AppliedDiscount> for ValidateDiscountResponse {
    fn from(applied: AppliedDiscount) -> Self {
        Self {
            total: applied.total().amount,
            code: applied.code,
            subtotal: applied.computed_at_subtotal.amount,
            discount_amount: applied.discount_amount.amount,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    /// Machine-readable reason, e.g. `EXPIRED`
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            reason: reason.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn payment_error_to_response(err: PaymentError) -> ApiError {
    let code = err.status_code();
    let response = ErrorResponse::new(err.to_string(), code, err.code());
    (StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(response))
}

/// Unwrap a JSON body, answering extractor rejections with a 400 `ErrorResponse`
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(error = %rejection, "request body rejected");
        (
            StatusCode::BAD_REQUEST,
            Json(
                ErrorResponse::new("Invalid request body", 400, "VALIDATION")
                    .with_details(rejection.body_text()),
            ),
        )
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let rate = state.rates.current(chrono::Utc::now()).ok();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "settle-cart",
        "version": env!("CARGO_PKG_VERSION"),
        "processor": state.processor.provider_name(),
        "exchange_rate": rate.map(|r| r.rate),
    }))
}

/// Price the cart and validate the optional discount against its subtotal
async fn price_request(
    state: &AppState,
    request: &CartRequest,
) -> Result<(PricedCart, Option<AppliedDiscount>), ApiError> {
    let priced = state
        .builder
        .price_cart(&request.items, request.customer.tier)
        .await
        .map_err(payment_error_to_response)?;

    let discount = match request.discount_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(
            state
                .ledger
                .validate(code, priced.subtotal)
                .await
                .map_err(payment_error_to_response)?,
        ),
        _ => None,
    };

    Ok((priced, discount))
}

/// Create a hosted checkout session
#[instrument(skip_all)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    payload: Result<Json<CartRequest>, JsonRejection>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let request = json_body(payload)?;
    let (priced, discount) = price_request(&state, &request).await?;

    let session = state
        .builder
        .build(&priced, discount.as_ref(), request.customer, request.shipping)
        .map_err(payment_error_to_response)?;

    let checkout = state
        .processor
        .create_checkout(&session, &state.urls)
        .await
        .map_err(|e| {
            error!(error = %e, reference = %session.external_reference, "failed to register checkout");
            payment_error_to_response(e)
        })?;

    let session = session.registered(checkout);
    let snapshot = &session.metadata_snapshot;
    info!(
        reference = %session.external_reference,
        subtotal = snapshot.subtotal,
        discount = snapshot.discount_amount,
        total = snapshot.total,
        "checkout session created"
    );

    let checkout_url = session.checkout_url.clone().ok_or_else(|| {
        payment_error_to_response(PaymentError::Internal(
            "processor returned no checkout URL".to_string(),
        ))
    })?;

    Ok(Json(CreateCheckoutResponse {
        checkout_url,
        currency: snapshot.currency.to_string(),
        subtotal: snapshot.subtotal,
        discount_amount: snapshot.discount_amount,
        total: snapshot.total,
        session_id: session.processor_session_id.clone(),
        external_reference: session.external_reference,
    }))
}

/// Discount preview for the cart UI
#[instrument(skip_all)]
pub async fn validate_discount(
    State(state): State<AppState>,
    payload: Result<Json<ValidateDiscountRequest>, JsonRejection>,
) -> Result<Json<ValidateDiscountResponse>, ApiError> {
    let request = json_body(payload)?;
    if request.subtotal < 0 {
        return Err(payment_error_to_response(PaymentError::Validation(
            "subtotal must not be negative".to_string(),
        )));
    }

    let subtotal = Price::from_cents(request.subtotal, state.pricing.local_currency);
    let applied = state
        .ledger
        .validate(&request.code, subtotal)
        .await
        .map_err(payment_error_to_response)?;

    Ok(Json(applied.into()))
}

/// Processor notification endpoint.
///
/// Acknowledged with 200 on every path once the payment has been looked up;
/// only failures before that return 5xx so the processor redelivers.
#[instrument(skip(state, headers, body))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let inbound = InboundNotification {
        query,
        headers,
        body: body.to_vec(),
    };

    match state.webhook.handle(&inbound).await {
        Ok(WebhookOutcome::Ignored { reason }) => {
            info!(%reason, "notification ignored");
        }
        Ok(WebhookOutcome::NotApproved { payment_id, status }) => {
            info!(%payment_id, status = status.as_str(), "payment not approved");
        }
        Ok(WebhookOutcome::Settled(report)) => {
            if report.is_clean() {
                info!(payment_id = %report.payment_id, order_id = ?report.order_id, "payment settled");
            } else {
                warn!(
                    payment_id = %report.payment_id,
                    errors = report.errors.len(),
                    "payment settled with reconciliation errors"
                );
            }
        }
        Err(err) => {
            error!(error = %err, "payment verification failed");
            let code = if err.is_retryable() { 503 } else { 500 };
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Err((status, Json(ErrorResponse::new(err.to_string(), code, err.code()))));
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Endpoint ownership check: echo `challenge`
pub async fn webhook_challenge(
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    params.get("challenge").cloned().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing challenge parameter", 400, "VALIDATION")),
        )
    })
}

/// Create a `pending_transfer` order for manual reconciliation
#[instrument(skip_all)]
pub async fn create_bank_transfer_order(
    State(state): State<AppState>,
    payload: Result<Json<CartRequest>, JsonRejection>,
) -> Result<Json<BankTransferReceipt>, ApiError> {
    let request = json_body(payload)?;
    let (priced, discount) = price_request(&state, &request).await?;

    let input = PendingOrderInput {
        items: priced.order_items(),
        currency: priced.currency(),
        subtotal: priced.subtotal.amount,
        discount_code: discount.as_ref().map(|d| d.code.clone()),
        discount_amount: discount.as_ref().map_or(0, |d| d.discount_amount.amount),
        metadata: serde_json::json!({
            "channel": "bank_transfer",
            "exchange_rate": priced.exchange_rate,
        }),
        customer: request.customer,
        shipping: request.shipping,
    };

    let receipt = state
        .bank_transfer
        .create_pending_order(input)
        .await
        .map_err(payment_error_to_response)?;

    Ok(Json(receipt))
}
