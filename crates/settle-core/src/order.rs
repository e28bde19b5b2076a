//! # Order Types
//!
//! The persisted order record and the store that owns it.
//! `payment_id` is the idempotency key: one order per processor payment
//! (or per bank-transfer settlement id).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, PaymentResult};
use crate::money::Currency;
use crate::pricing::CustomerTier;

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid through the processor
    Approved,
    /// Waiting for an operator to confirm a bank transfer
    PendingTransfer,
    Processing,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Approved => "approved",
            OrderStatus::PendingTransfer => "pending_transfer",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(OrderStatus::Approved),
            "pending_transfer" => Ok(OrderStatus::PendingTransfer),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(PaymentError::Serialization(format!(
                "unknown order status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer details captured at checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub tier: CustomerTier,
}

impl Customer {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            phone: None,
            tier: CustomerTier::Retail,
        }
    }

    pub fn wholesale(mut self) -> Self {
        self.tier = CustomerTier::Wholesale;
        self
    }
}

/// Shipping destination
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub province: String,
    pub zip_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A line of a persisted order, at its original (undiscounted) unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub name: String,
    pub quantity: u32,
    /// Smallest currency unit
    pub unit_price: i64,
}

/// An order about to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub payment_id: String,
    pub status: OrderStatus,
    pub customer: Customer,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub currency: Currency,
    pub subtotal: i64,
    pub discount_code: Option<String>,
    pub discount_amount: i64,
    pub total: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl NewOrder {
    /// `max(0, subtotal - discount_amount)`
    pub fn expected_total(subtotal: i64, discount_amount: i64) -> i64 {
        subtotal.saturating_sub(discount_amount).max(0)
    }

    /// Reject orders whose totals do not add up
    pub fn check_totals(&self) -> PaymentResult<()> {
        if self.items.is_empty() {
            return Err(PaymentError::Validation("order has no items".to_string()));
        }
        let items_subtotal: i64 = self
            .items
            .iter()
            .map(|i| i.unit_price.saturating_mul(i64::from(i.quantity)))
            .fold(0i64, i64::saturating_add);
        if items_subtotal != self.subtotal {
            return Err(PaymentError::Validation(format!(
                "subtotal {} does not match items {}",
                self.subtotal, items_subtotal
            )));
        }
        if self.total != Self::expected_total(self.subtotal, self.discount_amount) {
            return Err(PaymentError::Validation(format!(
                "total {} does not match subtotal {} minus discount {}",
                self.total, self.subtotal, self.discount_amount
            )));
        }
        Ok(())
    }
}

/// A persisted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub payment_id: String,
    pub status: OrderStatus,
    pub customer: Customer,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub currency: Currency,
    pub subtotal: i64,
    pub discount_code: Option<String>,
    pub discount_amount: i64,
    pub total: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Operator-entered, never set by this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

impl Order {
    pub fn from_new(id: impl Into<String>, order: NewOrder, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payment_id: order.payment_id,
            status: order.status,
            customer: order.customer,
            shipping: order.shipping,
            items: order.items,
            currency: order.currency,
            subtotal: order.subtotal,
            discount_code: order.discount_code,
            discount_amount: order.discount_amount,
            total: order.total,
            metadata: order.metadata,
            created_at,
            shipping_status: None,
            tracking_number: None,
        }
    }
}

/// Result of an insert attempt
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A new row was written
    Created(Order),
    /// A row with the same `payment_id` already existed and was returned
    Existing(Order),
}

impl InsertOutcome {
    pub fn order(&self) -> &Order {
        match self {
            InsertOutcome::Created(order) | InsertOutcome::Existing(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// Persistence for orders.
///
/// `insert` must treat a uniqueness violation on `payment_id` as success and
/// return the stored row; implementations must not check-then-insert.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &NewOrder) -> PaymentResult<InsertOutcome>;

    /// Idempotent create: rejects inconsistent totals, then inserts
    async fn create(&self, order: &NewOrder) -> PaymentResult<InsertOutcome> {
        order.check_totals()?;
        self.insert(order).await
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> PaymentResult<Option<Order>>;

    /// Most recent `pending_transfer` order for `email` with `total`, created at or after `since`
    async fn find_recent_pending_transfer(
        &self,
        email: &str,
        total: i64,
        since: DateTime<Utc>,
    ) -> PaymentResult<Option<Order>>;
}
