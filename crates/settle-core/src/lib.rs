//! # settle-core
//!
//! Core types and traits for the settle-cart order-settlement pipeline.
//!
//! This crate provides:
//! - `PriceQuoteCalculator` and `ExchangeRates` for tiered, currency-converted quotes
//! - `DiscountLedger` for discount-code validation and consumption
//! - `CheckoutSessionBuilder` for processor-facing checkout sessions
//! - `PaymentWebhookHandler` for verifying and settling approved payments
//! - `BankTransferSettlement` for the manually reconciled path
//! - `PaymentProcessor`, `OrderStore`, `DiscountStore` and `Catalog` traits
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use settle_core::{CartLine, CheckoutSessionBuilder, CustomerTier};
//!
//! let priced = builder.price_cart(&[CartLine::new("pad", 2)], CustomerTier::Retail).await?;
//! let discount = ledger.validate("SAVE10", priced.subtotal).await?;
//! let session = builder.build(&priced, Some(&discount), customer, shipping)?;
//!
//! // Register with the processor and redirect the customer
//! let checkout = processor.create_checkout(&session, &urls).await?;
//! ```

pub mod bank_transfer;
pub mod catalog;
pub mod checkout;
pub mod discount;
pub mod error;
pub mod money;
pub mod order;
pub mod pricing;
pub mod strategy;
pub mod webhook;

// Re-exports for convenience
pub use bank_transfer::{
    BankTransferConfig, BankTransferReceipt, BankTransferSettlement, PendingOrderInput,
};
pub use catalog::{Catalog, CatalogItem, ItemCatalog};
pub use checkout::{
    assemble_session, new_external_reference, CartLine, CheckoutSession, CheckoutSessionBuilder,
    MetadataSnapshot, PricedCart, PricedLine, ProcessorItem, SnapshotItem,
};
pub use discount::{
    normalize_code, AppliedDiscount, ConsumePolicy, DiscountCode, DiscountError, DiscountLedger,
    DiscountStore,
};
pub use error::{PaymentError, PaymentResult};
pub use money::{Currency, Price};
pub use order::{
    Customer, InsertOutcome, NewOrder, Order, OrderItem, OrderStatus, OrderStore,
    ShippingAddress,
};
pub use pricing::{
    CustomerTier, ExchangeRate, ExchangeRateConfig, ExchangeRateSource, ExchangeRates,
    FixedRateSource, PriceQuote, PriceQuoteCalculator, PriceTier, PricingConfig,
    RateSourceConfig, TierMarkups,
};
pub use strategy::{
    CheckoutUrls, InboundNotification, Notification, PaymentProcessor, PaymentRecord,
    PaymentStatus, ProcessorCheckout,
};
pub use webhook::{
    PaymentWebhookHandler, ReconciliationSink, SettlementError, SettlementReport,
    TracingReconciliationSink, WebhookOutcome,
};
