//! SQLite `DiscountStore`

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use settle_core::{normalize_code, ConsumePolicy, DiscountCode, DiscountStore, PaymentResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::error::{corrupt, storage_error};
use crate::orders::{parse_timestamp, timestamp};

/// Discount codes table. `consume` is a single conditional UPDATE.
#[derive(Clone)]
pub struct SqliteDiscountStore {
    pool: SqlitePool,
}

impl SqliteDiscountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Operator seeding; not used by the settlement path
    pub async fn insert_code(&self, code: &DiscountCode) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO discount_codes (
                id, code, discount_percent, discount_amount, max_uses, used_count,
                min_purchase_amount, valid_from, valid_until, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(code.id)
        .bind(normalize_code(&code.code))
        .bind(code.discount_percent.to_string())
        .bind(code.discount_amount)
        .bind(code.max_uses)
        .bind(code.used_count)
        .bind(code.min_purchase_amount)
        .bind(code.valid_from.map(timestamp))
        .bind(code.valid_until.map(timestamp))
        .bind(code.is_active)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> PaymentResult<DiscountCode> {
        let percent: String = row.try_get("discount_percent").map_err(storage_error)?;
        let valid_from: Option<String> = row.try_get("valid_from").map_err(storage_error)?;
        let valid_until: Option<String> = row.try_get("valid_until").map_err(storage_error)?;

        Ok(DiscountCode {
            id: row.try_get("id").map_err(storage_error)?,
            code: row.try_get("code").map_err(storage_error)?,
            discount_percent: Decimal::from_str(&percent)
                .map_err(|e| corrupt("discount_percent", e))?,
            discount_amount: row.try_get("discount_amount").map_err(storage_error)?,
            max_uses: row.try_get("max_uses").map_err(storage_error)?,
            used_count: row.try_get("used_count").map_err(storage_error)?,
            min_purchase_amount: row.try_get("min_purchase_amount").map_err(storage_error)?,
            valid_from: valid_from
                .as_deref()
                .map(|v| parse_timestamp("valid_from", v))
                .transpose()?,
            valid_until: valid_until
                .as_deref()
                .map(|v| parse_timestamp("valid_until", v))
                .transpose()?,
            is_active: row.try_get("is_active").map_err(storage_error)?,
        })
    }
}

#[async_trait]
impl DiscountStore for SqliteDiscountStore {
    async fn find_by_code(&self, code: &str) -> PaymentResult<Option<DiscountCode>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, discount_percent, discount_amount, max_uses, used_count,
                   min_purchase_amount, valid_from, valid_until, is_active
            FROM discount_codes
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn consume(&self, code: &str, policy: ConsumePolicy) -> PaymentResult<bool> {
        let deactivate_now = matches!(policy, ConsumePolicy::DeactivateOnFirstUse);

        // SET expressions see the pre-update row.
        let result = sqlx::query(
            r#"
            UPDATE discount_codes
            SET used_count = used_count + 1,
                is_active = CASE
                    WHEN ?2 THEN 0
                    WHEN max_uses IS NOT NULL AND used_count + 1 >= max_uses THEN 0
                    ELSE is_active
                END
            WHERE code = ?1
              AND is_active = 1
              AND (max_uses IS NULL OR used_count < max_uses)
            "#,
        )
        .bind(code)
        .bind(deactivate_now)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        let consumed = result.rows_affected() == 1;
        debug!(consumed, "discount consume update");
        Ok(consumed)
    }
}
