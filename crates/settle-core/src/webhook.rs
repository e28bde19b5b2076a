//! # Payment Webhook Handling
//!
//! Turns processor notifications into settled orders.
//!
//! ```text
//! received ──parse──▶ verified ──approved──▶ settled
//!     │                  │                      │
//!     └──────────────────┴──────────────────────┴──▶ acknowledged
//! ```
//!
//! Notification fields are never trusted: the payment is always fetched from
//! the processor before anything is written. Once the processor says
//! "approved", every failure is reported for reconciliation and the
//! notification is still acknowledged.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::checkout::MetadataSnapshot;
use crate::discount::DiscountLedger;
use crate::error::{PaymentError, PaymentResult};
use crate::order::{InsertOutcome, OrderStatus, OrderStore};
use crate::strategy::{InboundNotification, Notification, PaymentProcessor, PaymentRecord};

/// Failure of a settlement sub-step after the payment was approved
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementError {
    /// Payment metadata does not hold a usable order snapshot
    #[error("payment metadata has no order snapshot: {message}")]
    MissingSnapshot { message: String },

    /// Snapshot totals do not add up; nothing was written or consumed
    #[error("order snapshot is inconsistent: {message}")]
    InconsistentSnapshot { message: String },

    #[error("order could not be persisted: {message}")]
    OrderPersistence { message: String },

    #[error("discount code {code} could not be consumed: {message}")]
    DiscountConsumption { code: String, message: String },

    /// The conditional update matched no row (inactive or exhausted by a concurrent payment)
    #[error("discount code {code} was no longer consumable")]
    DiscountNotConsumed { code: String },

    /// Processor charged a different amount than the snapshot total
    #[error("charged amount {actual} differs from order total {expected}")]
    AmountMismatch { expected: i64, actual: i64 },
}

/// Receives settlement failures that need an operator
pub trait ReconciliationSink: Send + Sync {
    fn report(&self, payment_id: &str, error: &SettlementError);
}

/// Default sink: structured error events under the `reconciliation` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReconciliationSink;

impl ReconciliationSink for TracingReconciliationSink {
    fn report(&self, payment_id: &str, err: &SettlementError) {
        error!(
            target: "reconciliation",
            payment_id,
            error = %err,
            detail = %serde_json::to_string(err).unwrap_or_default(),
            "settlement needs reconciliation"
        );
    }
}

/// What happened during settlement of one approved payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub payment_id: String,
    pub order_id: Option<String>,
    /// `true` only when this delivery wrote the order
    pub order_created: bool,
    /// `None` when no consumption was attempted
    pub discount_consumed: Option<bool>,
    pub errors: Vec<SettlementError>,
}

impl SettlementReport {
    fn new(payment_id: &str) -> Self {
        Self {
            payment_id: payment_id.to_string(),
            order_id: None,
            order_created: false,
            discount_consumed: None,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Terminal state of one delivery. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// No recognizable payment, or the payment does not exist
    Ignored { reason: String },
    /// Verified, but not approved; nothing written
    NotApproved { payment_id: String, status: String },
    Settled(SettlementReport),
}

/// Verifies notifications against the processor and settles approved payments
#[derive(Clone)]
pub struct PaymentWebhookHandler {
    processor: Arc<dyn PaymentProcessor>,
    ledger: DiscountLedger,
    orders: Arc<dyn OrderStore>,
    sink: Arc<dyn ReconciliationSink>,
}

impl PaymentWebhookHandler {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        ledger: DiscountLedger,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            processor,
            ledger,
            orders,
            sink: Arc::new(TracingReconciliationSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReconciliationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Process one delivery.
    ///
    /// Returns `Err` only when verification could not complete (processor
    /// unreachable, bad credentials); the caller should answer with a 5xx so
    /// the processor redelivers. Everything else is `Ok`.
    #[instrument(skip_all, fields(provider = self.processor.provider_name()))]
    pub async fn handle(&self, inbound: &InboundNotification) -> PaymentResult<WebhookOutcome> {
        let payment_id = match self.processor.parse_notification(inbound) {
            Notification::Payment { payment_id } => payment_id,
            Notification::Ignored { reason } => {
                info!(%reason, "notification ignored");
                return Ok(WebhookOutcome::Ignored { reason });
            }
        };

        let record = match self.processor.fetch_payment(&payment_id).await {
            Ok(record) => record,
            Err(PaymentError::PaymentNotFound { payment_id }) => {
                warn!(%payment_id, "notification for unknown payment");
                return Ok(WebhookOutcome::Ignored {
                    reason: format!("payment {} not found", payment_id),
                });
            }
            Err(err) => {
                error!(%payment_id, error = %err, retryable = err.is_retryable(), "payment verification failed");
                return Err(err);
            }
        };

        if record.id != payment_id {
            warn!(%payment_id, fetched = %record.id, "processor returned a different payment");
            return Ok(WebhookOutcome::Ignored {
                reason: "payment id mismatch".to_string(),
            });
        }

        if !record.status.is_approved() {
            info!(%payment_id, status = record.status.as_str(), "payment not approved");
            return Ok(WebhookOutcome::NotApproved {
                payment_id,
                status: record.status.as_str().to_string(),
            });
        }

        Ok(WebhookOutcome::Settled(self.settle(&record).await))
    }

    /// Persist the order and consume its discount. Never fails; problems are
    /// collected in the report and forwarded to the sink.
    #[instrument(skip_all, fields(payment_id = %record.id))]
    pub async fn settle(&self, record: &PaymentRecord) -> SettlementReport {
        let mut report = SettlementReport::new(&record.id);

        let snapshot: MetadataSnapshot = match serde_json::from_value(record.metadata.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.fail(&mut report, SettlementError::MissingSnapshot {
                    message: err.to_string(),
                });
                return report;
            }
        };

        if let Some(actual) = charged_amount(record, &snapshot) {
            let tolerance: i64 = snapshot.items.iter().map(|i| i64::from(i.quantity)).sum();
            if (actual - snapshot.total).abs() > tolerance {
                self.fail(&mut report, SettlementError::AmountMismatch {
                    expected: snapshot.total,
                    actual,
                });
            }
        }

        let order = snapshot.to_new_order(
            record.id.clone(),
            OrderStatus::Approved,
            serde_json::json!({
                "provider": self.processor.provider_name(),
                "external_reference": snapshot.external_reference,
                "status_detail": record.status_detail,
                "transaction_amount": record.transaction_amount,
                "payer_email": record.payer_email,
                "exchange_rate": snapshot.exchange_rate,
            }),
        );

        // A redelivery finds the order already written and must not consume again.
        let consume = match self.orders.create(&order).await {
            Ok(InsertOutcome::Created(order)) => {
                info!(order_id = %order.id, total = order.total, "order settled");
                report.order_id = Some(order.id);
                report.order_created = true;
                true
            }
            Ok(InsertOutcome::Existing(order)) => {
                info!(order_id = %order.id, "order already settled");
                report.order_id = Some(order.id);
                false
            }
            Err(err) => {
                self.fail(&mut report, SettlementError::OrderPersistence {
                    message: err.to_string(),
                });
                true
            }
        };

        if let Some(code) = snapshot.discount_code.as_deref().filter(|_| consume) {
            match self.ledger.consume(code).await {
                Ok(true) => report.discount_consumed = Some(true),
                Ok(false) => {
                    report.discount_consumed = Some(false);
                    self.fail(&mut report, SettlementError::DiscountNotConsumed {
                        code: code.to_string(),
                    });
                }
                Err(err) => {
                    report.discount_consumed = Some(false);
                    self.fail(&mut report, SettlementError::DiscountConsumption {
                        code: code.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        report
    }

    fn fail(&self, report: &mut SettlementReport, err: SettlementError) {
        self.sink.report(&report.payment_id, &err);
        report.errors.push(err);
    }
}

fn charged_amount(record: &PaymentRecord, snapshot: &MetadataSnapshot) -> Option<i64> {
    record
        .transaction_amount
        .map(|amount| snapshot.currency.to_smallest_unit(amount))
}
