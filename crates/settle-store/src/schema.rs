//! Schema bootstrap and pool construction

use std::str::FromStr;

use settle_core::PaymentResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::storage_error;

pub(crate) const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    payment_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    customer_email TEXT NOT NULL,
    customer TEXT NOT NULL,
    shipping_address TEXT NOT NULL,
    shipping_city TEXT NOT NULL,
    shipping_province TEXT NOT NULL,
    shipping_zip_code TEXT NOT NULL,
    shipping_notes TEXT,
    items TEXT NOT NULL,
    currency TEXT NOT NULL,
    subtotal INTEGER NOT NULL,
    discount_code TEXT,
    discount_amount INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    shipping_status TEXT,
    tracking_number TEXT,
    created_at TEXT NOT NULL
)
"#;

pub(crate) const CREATE_PENDING_TRANSFER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_orders_pending_transfer
    ON orders (customer_email, total, status, created_at)
"#;

pub(crate) const CREATE_DISCOUNT_CODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS discount_codes (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    discount_percent TEXT NOT NULL DEFAULT '0',
    discount_amount INTEGER NOT NULL DEFAULT 0,
    max_uses INTEGER,
    used_count INTEGER NOT NULL DEFAULT 0,
    min_purchase_amount INTEGER NOT NULL DEFAULT 0,
    valid_from TEXT,
    valid_until TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

/// Open a pool, creating the database file when missing
pub async fn connect(database_url: &str) -> PaymentResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(storage_error)?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(storage_error)
}

/// Single-connection in-memory pool; every connection would otherwise get its own database
pub async fn connect_in_memory() -> PaymentResult<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(storage_error)
}

/// Create tables and indexes if they don't exist
pub async fn init_schema(pool: &SqlitePool) -> PaymentResult<()> {
    for statement in [
        CREATE_ORDERS_TABLE,
        CREATE_PENDING_TRANSFER_INDEX,
        CREATE_DISCOUNT_CODES_TABLE,
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(storage_error)?;
    }
    info!("database schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_is_repeatable() {
        let pool = connect_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('orders', 'discount_codes')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 2);
    }
}
