//! # Bank Transfer Settlement
//!
//! Manual-reconciliation path. No processor is involved: the order is written
//! as `pending_transfer` under a settlement id the customer quotes on their
//! transfer, and an operator confirms it later.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{PaymentError, PaymentResult};
use crate::money::Currency;
use crate::order::{
    Customer, InsertOutcome, NewOrder, OrderItem, OrderStatus, OrderStore, ShippingAddress,
};

/// Settlement id format and duplicate window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransferConfig {
    pub prefix: String,
    pub digits: u32,
    /// Id generations tried before giving up on collisions
    pub max_attempts: u32,
    pub duplicate_window_secs: i64,
}

impl Default for BankTransferConfig {
    fn default() -> Self {
        Self {
            prefix: "TRF-".to_string(),
            digits: 8,
            max_attempts: 5,
            duplicate_window_secs: 300,
        }
    }
}

impl BankTransferConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::seconds(self.duplicate_window_secs)
    }

    /// `prefix` followed by `digits` random decimal digits
    pub fn generate_id(&self) -> String {
        let mut rng = rand::thread_rng();
        let digits: String = (0..self.digits)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        format!("{}{}", self.prefix, digits)
    }
}

/// Priced order data for a bank-transfer submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrderInput {
    pub customer: Customer,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub currency: Currency,
    pub subtotal: i64,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub discount_amount: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PendingOrderInput {
    pub fn total(&self) -> i64 {
        NewOrder::expected_total(self.subtotal, self.discount_amount)
    }

    fn to_draft(&self) -> NewOrder {
        NewOrder {
            payment_id: String::new(),
            status: OrderStatus::PendingTransfer,
            customer: self.customer.clone(),
            shipping: self.shipping.clone(),
            items: self.items.clone(),
            currency: self.currency,
            subtotal: self.subtotal,
            discount_code: self.discount_code.clone(),
            discount_amount: self.discount_amount,
            total: self.total(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BankTransferReceipt {
    pub order_id: String,
    pub settlement_id: String,
    pub total: i64,
    /// `true` when an earlier identical submission was returned
    pub duplicate: bool,
}

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Creates `pending_transfer` orders
#[derive(Clone)]
pub struct BankTransferSettlement {
    orders: Arc<dyn OrderStore>,
    config: BankTransferConfig,
    generate_id: IdGenerator,
}

impl BankTransferSettlement {
    pub fn new(orders: Arc<dyn OrderStore>, config: BankTransferConfig) -> Self {
        let generator_config = config.clone();
        Self {
            orders,
            config,
            generate_id: Arc::new(move || generator_config.generate_id()),
        }
    }

    /// Replace the random id generator
    pub fn with_id_generator(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generate_id = Arc::new(generate);
        self
    }

    pub async fn create_pending_order(
        &self,
        input: PendingOrderInput,
    ) -> PaymentResult<BankTransferReceipt> {
        self.create_pending_order_at(input, Utc::now()).await
    }

    #[instrument(skip(self, input, now), fields(total = input.total()))]
    pub async fn create_pending_order_at(
        &self,
        mut input: PendingOrderInput,
        now: DateTime<Utc>,
    ) -> PaymentResult<BankTransferReceipt> {
        input.customer.email = input.customer.email.trim().to_lowercase();
        if input.customer.email.is_empty() {
            return Err(PaymentError::Validation("customer email is required".to_string()));
        }
        let mut draft = input.to_draft();
        draft.check_totals()?;

        let total = draft.total;
        let since = now - self.config.duplicate_window();
        if let Some(existing) = self
            .orders
            .find_recent_pending_transfer(&draft.customer.email, total, since)
            .await?
        {
            info!(order_id = %existing.id, settlement_id = %existing.payment_id, "duplicate bank transfer submission");
            return Ok(BankTransferReceipt {
                order_id: existing.id,
                settlement_id: existing.payment_id,
                total,
                duplicate: true,
            });
        }

        for attempt in 1..=self.config.max_attempts {
            draft.payment_id = (self.generate_id)();
            match self.orders.create(&draft).await? {
                InsertOutcome::Created(order) => {
                    info!(order_id = %order.id, settlement_id = %order.payment_id, "bank transfer order created");
                    return Ok(BankTransferReceipt {
                        order_id: order.id,
                        settlement_id: order.payment_id,
                        total,
                        duplicate: false,
                    });
                }
                InsertOutcome::Existing(_) => {
                    warn!(settlement_id = %draft.payment_id, attempt, "settlement id collision");
                }
            }
        }

        Err(PaymentError::Persistence(format!(
            "no free settlement id after {} attempts",
            self.config.max_attempts
        )))
    }
}
