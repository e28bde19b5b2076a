//! # settle-api
//!
//! HTTP API layer for settle-cart.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Checkout, discount preview and bank-transfer endpoints
//! - The processor notification endpoint
//! - The exchange-rate refresher task
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/checkout/session` | Create checkout session |
//! | POST | `/payments/webhook` | Payment notification |
//! | GET | `/payments/webhook?challenge=` | Endpoint challenge |
//! | POST | `/discounts/validate` | Discount preview |
//! | POST | `/bank-transfer/orders` | Pending bank-transfer order |

pub mod handlers;
pub mod rates;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, Backends};
