//! # Payment Processor Trait
//!
//! Seam between the settlement pipeline and a hosted-checkout processor.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProcessor (trait)                   │
//! │  ├── create_checkout()     register a session, get a URL    │
//! │  ├── fetch_payment()       authoritative payment status     │
//! │  ├── parse_notification()  inbound webhook → payment id     │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                  ┌─────────┴─────────┐
//!                  │ MercadoPagoClient │
//!                  └───────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::checkout::CheckoutSession;
use crate::error::PaymentResult;

/// Status of a payment as reported by the processor API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Approved,
    Pending,
    InProcess,
    Authorized,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    Other(String),
}

impl PaymentStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "approved" => PaymentStatus::Approved,
            "pending" => PaymentStatus::Pending,
            "in_process" => PaymentStatus::InProcess,
            "authorized" => PaymentStatus::Authorized,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" => PaymentStatus::Refunded,
            "charged_back" => PaymentStatus::ChargedBack,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, PaymentStatus::Approved)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Pending => "pending",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::ChargedBack => "charged_back",
            PaymentStatus::Other(s) => s.as_str(),
        }
    }
}

/// Authoritative payment record fetched from the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    /// Metadata attached when the checkout was registered
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Amount actually charged, in whole currency units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_email: Option<String>,
}

/// A checkout registered with the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorCheckout {
    /// Processor's id for the session
    pub session_id: String,
    /// URL to redirect the customer to
    pub checkout_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Raw inbound webhook request, reduced to what a processor needs to parse it
#[derive(Debug, Clone, Default)]
pub struct InboundNotification {
    pub query: HashMap<String, String>,
    /// Header names lower-cased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundNotification {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// What an inbound notification refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A payment the handler should look up
    Payment { payment_id: String },
    /// Nothing to act on (other topic, no id, bad signature)
    Ignored { reason: String },
}

/// Core trait for payment processor integrations.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Register a checkout session and return the redirect URL.
    async fn create_checkout(
        &self,
        session: &CheckoutSession,
        urls: &CheckoutUrls,
    ) -> PaymentResult<ProcessorCheckout>;

    /// Fetch the authoritative payment record by id.
    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<PaymentRecord>;

    /// Extract the payment id from an inbound notification.
    fn parse_notification(&self, inbound: &InboundNotification) -> Notification;

    /// Get the provider name (for logging).
    fn provider_name(&self) -> &'static str;
}

/// Configuration for URLs handed to the processor
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://shop.example.com")
    pub base_url: String,
    pub success_path: String,
    pub failure_path: String,
    pub pending_path: String,
    /// Where the processor should POST notifications
    pub notification_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            failure_path: "/checkout/failure".to_string(),
            pending_path: "/checkout/pending".to_string(),
            notification_path: "/payments/webhook".to_string(),
        }
    }

    pub fn success_url(&self) -> String {
        format!("{}{}", self.base_url, self.success_path)
    }

    pub fn failure_url(&self) -> String {
        format!("{}{}", self.base_url, self.failure_path)
    }

    pub fn pending_url(&self) -> String {
        format!("{}{}", self.base_url, self.pending_path)
    }

    pub fn notification_url(&self) -> String {
        format!("{}{}", self.base_url, self.notification_path)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}
