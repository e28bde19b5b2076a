//! # Checkout Sessions
//!
//! Builds the processor-facing side of a checkout from a cart.
//!
//! Each line is quoted, then a single ratio `(subtotal - discount) / subtotal`
//! is applied to every unit price. The processor wants non-negative per-line
//! prices that add up to what it charges, so the discount is spread across
//! lines instead of sent as one negative line. The metadata snapshot keeps
//! the original prices; that is what the order is rebuilt from.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogItem};
use crate::discount::AppliedDiscount;
use crate::error::{PaymentError, PaymentResult};
use crate::money::{Currency, Price};
use crate::order::{Customer, NewOrder, OrderItem, OrderStatus, ShippingAddress};
use crate::pricing::{CustomerTier, ExchangeRates, PriceQuote, PriceQuoteCalculator, PriceTier};
use crate::strategy::ProcessorCheckout;

/// One cart line as submitted by the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl CartLine {
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }
}

/// A cart line with its catalog item and quote
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub item: CatalogItem,
    pub quantity: u32,
    pub quote: PriceQuote,
}

impl PricedLine {
    pub fn line_total(&self) -> Price {
        self.quote.unit_price.times(self.quantity)
    }
}

/// All lines quoted against one exchange-rate snapshot
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Price,
    pub exchange_rate: Decimal,
}

impl PricedCart {
    pub fn currency(&self) -> Currency {
        self.subtotal.currency
    }

    /// Order lines at original prices
    pub fn order_items(&self) -> Vec<OrderItem> {
        self.lines
            .iter()
            .map(|line| OrderItem {
                id: line.item.id.clone(),
                sku: line.item.sku.clone(),
                name: line.item.name.clone(),
                quantity: line.quantity,
                unit_price: line.quote.unit_price.amount,
            })
            .collect()
    }
}

/// Line sent to the processor, at the discounted unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorItem {
    pub id: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Price,
}

/// Line kept in the metadata snapshot, at the original unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub tier: PriceTier,
}

/// Everything needed to rebuild the order once the payment is approved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub external_reference: String,
    pub items: Vec<SnapshotItem>,
    pub customer: Customer,
    pub shipping: ShippingAddress,
    pub currency: Currency,
    pub subtotal: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub discount_amount: i64,
    pub total: i64,
    pub exchange_rate: Decimal,
}

impl MetadataSnapshot {
    /// Order record for a settled payment
    pub fn to_new_order(
        &self,
        payment_id: impl Into<String>,
        status: OrderStatus,
        metadata: serde_json::Value,
    ) -> NewOrder {
        NewOrder {
            payment_id: payment_id.into(),
            status,
            customer: self.customer.clone(),
            shipping: self.shipping.clone(),
            items: self
                .items
                .iter()
                .map(|item| OrderItem {
                    id: item.id.clone(),
                    sku: item.sku.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            currency: self.currency,
            subtotal: self.subtotal,
            discount_code: self.discount_code.clone(),
            discount_amount: self.discount_amount,
            total: self.total,
            metadata,
        }
    }
}

/// A checkout ready to be registered with the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub external_reference: String,
    pub processor_items: Vec<ProcessorItem>,
    pub metadata_snapshot: MetadataSnapshot,
    /// Set once the processor has accepted the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Record the processor's registration
    pub fn registered(mut self, checkout: ProcessorCheckout) -> Self {
        self.checkout_url = Some(checkout.checkout_url);
        self.processor_session_id = Some(checkout.session_id);
        self
    }

    /// What the processor will charge: Σ discounted unit price × quantity
    pub fn processor_total(&self) -> Price {
        let amount = self
            .processor_items
            .iter()
            .map(|item| item.unit_price.times(item.quantity).amount)
            .sum();
        Price::from_cents(amount, self.metadata_snapshot.currency)
    }

    /// Internally computed total
    pub fn total(&self) -> Price {
        Price::from_cents(self.metadata_snapshot.total, self.metadata_snapshot.currency)
    }
}

/// Timestamp plus random suffix, unique per checkout
pub fn new_external_reference(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S%3f"), &suffix[..8])
}

/// Prices carts and assembles checkout sessions
#[derive(Clone)]
pub struct CheckoutSessionBuilder {
    catalog: Arc<dyn Catalog>,
    calculator: PriceQuoteCalculator,
    rates: ExchangeRates,
}

impl CheckoutSessionBuilder {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        calculator: PriceQuoteCalculator,
        rates: ExchangeRates,
    ) -> Self {
        Self {
            catalog,
            calculator,
            rates,
        }
    }

    /// Quote every line. Fails on an empty cart, zero quantities, unknown
    /// items and unpriceable items.
    #[instrument(skip(self, cart), fields(lines = cart.len()))]
    pub async fn price_cart(&self, cart: &[CartLine], tier: CustomerTier) -> PaymentResult<PricedCart> {
        if cart.is_empty() {
            return Err(PaymentError::Validation("cart is empty".to_string()));
        }

        let rate = self.rates.current(Utc::now())?;
        let currency = self.calculator.local_currency();
        let mut lines = Vec::with_capacity(cart.len());

        for line in cart {
            if line.quantity == 0 {
                return Err(PaymentError::Validation(format!(
                    "quantity for {} must be at least 1",
                    line.item_id
                )));
            }

            let item = self
                .catalog
                .fetch(&line.item_id)
                .await?
                .ok_or_else(|| PaymentError::ItemNotFound {
                    item_id: line.item_id.clone(),
                })?;

            let tier = PriceTier::resolve(tier, item.inventory_total);
            let quote = self.calculator.quote(&item, tier, &rate);
            if quote.is_unpriceable() {
                return Err(PaymentError::Unpriceable {
                    item_id: item.id.clone(),
                });
            }

            lines.push(PricedLine {
                item,
                quantity: line.quantity,
                quote,
            });
        }

        let subtotal = Price::from_cents(lines.iter().map(|l| l.line_total().amount).sum(), currency);
        debug!(subtotal = subtotal.amount, "cart priced");

        Ok(PricedCart {
            lines,
            subtotal,
            exchange_rate: rate.rate,
        })
    }

    /// Assemble the session for an already priced cart
    #[instrument(skip_all, fields(lines = priced.lines.len(), subtotal = priced.subtotal.amount))]
    pub fn build(
        &self,
        priced: &PricedCart,
        discount: Option<&AppliedDiscount>,
        customer: Customer,
        shipping: ShippingAddress,
    ) -> PaymentResult<CheckoutSession> {
        assemble_session(priced, discount, customer, shipping, Utc::now())
    }
}

/// Pure session assembly, split out so it can be tested without a catalog
pub fn assemble_session(
    priced: &PricedCart,
    discount: Option<&AppliedDiscount>,
    customer: Customer,
    shipping: ShippingAddress,
    now: DateTime<Utc>,
) -> PaymentResult<CheckoutSession> {
    if priced.lines.is_empty() {
        return Err(PaymentError::Validation("cart is empty".to_string()));
    }
    if priced.subtotal.amount <= 0 {
        return Err(PaymentError::Validation("cart subtotal must be positive".to_string()));
    }

    if let Some(discount) = discount {
        if discount.computed_at_subtotal != priced.subtotal {
            return Err(PaymentError::Validation(format!(
                "discount {} was computed for a different subtotal",
                discount.code
            )));
        }
    }

    let discount_amount = discount.map(|d| d.discount_amount.amount).unwrap_or(0);
    let ratio = discount.map(AppliedDiscount::ratio).unwrap_or(Decimal::ONE);
    let external_reference = new_external_reference(now);

    let processor_items = priced
        .lines
        .iter()
        .map(|line| ProcessorItem {
            id: line.item.id.clone(),
            title: line.item.name.clone(),
            quantity: line.quantity,
            unit_price: line.quote.unit_price.scale(ratio),
        })
        .collect();

    let snapshot_items = priced
        .lines
        .iter()
        .map(|line| SnapshotItem {
            id: line.item.id.clone(),
            sku: line.item.sku.clone(),
            name: line.item.name.clone(),
            quantity: line.quantity,
            unit_price: line.quote.unit_price.amount,
            category_id: line.item.category_id.clone(),
            tier: line.quote.tier,
        })
        .collect();

    let session = CheckoutSession {
        external_reference: external_reference.clone(),
        processor_items,
        metadata_snapshot: MetadataSnapshot {
            external_reference,
            items: snapshot_items,
            customer,
            shipping,
            currency: priced.currency(),
            subtotal: priced.subtotal.amount,
            discount_code: discount.map(|d| d.code.clone()),
            discount_amount,
            total: NewOrder::expected_total(priced.subtotal.amount, discount_amount),
            exchange_rate: priced.exchange_rate,
        },
        checkout_url: None,
        processor_session_id: None,
        created_at: now,
    };

    info!(
        external_reference = %session.external_reference,
        total = session.metadata_snapshot.total,
        processor_total = session.processor_total().amount,
        "checkout session assembled"
    );

    Ok(session)
}
