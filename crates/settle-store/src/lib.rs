//! # settle-store
//!
//! SQLite implementations of [`OrderStore`](settle_core::OrderStore) and
//! [`DiscountStore`](settle_core::DiscountStore).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use settle_store::{connect, init_schema, SqliteDiscountStore, SqliteOrderStore};
//!
//! let pool = connect("sqlite://settle.db").await?;
//! init_schema(&pool).await?;
//!
//! let orders = SqliteOrderStore::new(pool.clone());
//! let discounts = SqliteDiscountStore::new(pool);
//! ```

mod discounts;
mod error;
mod orders;
mod schema;

pub use discounts::SqliteDiscountStore;
pub use orders::SqliteOrderStore;
pub use schema::{connect, connect_in_memory, init_schema};
