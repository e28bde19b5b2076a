//! # settle-mercadopago
//!
//! MercadoPago Checkout Pro integration for settle-cart-rs.
//!
//! - **MercadoPagoClient** implements [`PaymentProcessor`](settle_core::PaymentProcessor):
//!   - registers checkout preferences (discounted items plus the order snapshot as metadata)
//!   - fetches payments with a timeout and bounded retries
//!   - parses notifications, checking `x-signature` when a secret is configured
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use settle_mercadopago::MercadoPagoClient;
//! use settle_core::{CheckoutUrls, PaymentProcessor};
//!
//! let processor = MercadoPagoClient::from_env()?;
//! let checkout = processor
//!     .create_checkout(&session, &CheckoutUrls::new("https://shop.example.com"))
//!     .await?;
//!
//! // Redirect the customer to checkout.checkout_url
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::MercadoPagoClient;
pub use config::MercadoPagoConfig;
pub use webhook::{
    extract_payment_id, is_valid_payment_id, signature_manifest, verify_signature,
    verify_signature_at,
};
