//! SQLite `OrderStore`

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use settle_core::{
    Currency, Customer, InsertOutcome, NewOrder, Order, OrderItem, OrderStatus, OrderStore,
    PaymentError, PaymentResult, ShippingAddress,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{corrupt, is_unique_violation, storage_error};

const SELECT_ORDER: &str = r#"
SELECT id, payment_id, status, customer,
       shipping_address, shipping_city, shipping_province, shipping_zip_code, shipping_notes,
       items, currency, subtotal, discount_code, discount_amount, total, metadata,
       shipping_status, tracking_number, created_at
FROM orders
"#;

/// Fixed-width UTC timestamps so text comparison matches time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> PaymentResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

/// Orders table with `UNIQUE(payment_id)`
#[derive(Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> PaymentResult<Order> {
        let get_text = |column: &str| -> PaymentResult<String> {
            row.try_get::<String, _>(column).map_err(storage_error)
        };
        let get_opt = |column: &str| -> PaymentResult<Option<String>> {
            row.try_get::<Option<String>, _>(column).map_err(storage_error)
        };
        let get_int = |column: &str| -> PaymentResult<i64> {
            row.try_get::<i64, _>(column).map_err(storage_error)
        };

        let customer: Customer =
            serde_json::from_str(&get_text("customer")?).map_err(|e| corrupt("customer", e))?;
        let items: Vec<OrderItem> =
            serde_json::from_str(&get_text("items")?).map_err(|e| corrupt("items", e))?;
        let metadata: serde_json::Value =
            serde_json::from_str(&get_text("metadata")?).map_err(|e| corrupt("metadata", e))?;
        let currency: Currency = serde_json::from_value(serde_json::Value::String(get_text("currency")?))
            .map_err(|e| corrupt("currency", e))?;

        Ok(Order {
            id: get_text("id")?,
            payment_id: get_text("payment_id")?,
            status: get_text("status")?.parse::<OrderStatus>()?,
            customer,
            shipping: ShippingAddress {
                address: get_text("shipping_address")?,
                city: get_text("shipping_city")?,
                province: get_text("shipping_province")?,
                zip_code: get_text("shipping_zip_code")?,
                notes: get_opt("shipping_notes")?,
            },
            items,
            currency,
            subtotal: get_int("subtotal")?,
            discount_code: get_opt("discount_code")?,
            discount_amount: get_int("discount_amount")?,
            total: get_int("total")?,
            metadata,
            created_at: parse_timestamp("created_at", &get_text("created_at")?)?,
            shipping_status: get_opt("shipping_status")?,
            tracking_number: get_opt("tracking_number")?,
        })
    }

    async fn write(&self, order: &Order, customer: String, items: String) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, payment_id, status, customer_email, customer,
                shipping_address, shipping_city, shipping_province, shipping_zip_code, shipping_notes,
                items, currency, subtotal, discount_code, discount_amount, total, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.payment_id)
        .bind(order.status.as_str())
        .bind(&order.customer.email)
        .bind(customer)
        .bind(&order.shipping.address)
        .bind(&order.shipping.city)
        .bind(&order.shipping.province)
        .bind(&order.shipping.zip_code)
        .bind(&order.shipping.notes)
        .bind(items)
        .bind(order.currency.as_str())
        .bind(order.subtotal)
        .bind(&order.discount_code)
        .bind(order.discount_amount)
        .bind(order.total)
        .bind(order.metadata.to_string())
        .bind(timestamp(order.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    #[instrument(skip(self, order), fields(payment_id = %order.payment_id))]
    async fn insert(&self, order: &NewOrder) -> PaymentResult<InsertOutcome> {
        // Stored with microsecond precision; keep the returned row identical.
        let created = Order::from_new(Uuid::new_v4().to_string(), order.clone(), Utc::now().trunc_subsecs(6));
        let customer = serde_json::to_string(&created.customer)?;
        let items = serde_json::to_string(&created.items)?;

        match self.write(&created, customer, items).await {
            Ok(()) => {
                debug!(order_id = %created.id, "order row inserted");
                Ok(InsertOutcome::Created(created))
            }
            Err(err) if is_unique_violation(&err) => {
                debug!("payment id already recorded");
                self.find_by_payment_id(&order.payment_id)
                    .await?
                    .map(InsertOutcome::Existing)
                    .ok_or_else(|| {
                        PaymentError::Persistence(format!(
                            "unique violation for payment {} but no row found",
                            order.payment_id
                        ))
                    })
            }
            Err(err) => Err(storage_error(err)),
        }
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> PaymentResult<Option<Order>> {
        let row = sqlx::query(&format!("{} WHERE payment_id = ?", SELECT_ORDER))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_recent_pending_transfer(
        &self,
        email: &str,
        total: i64,
        since: DateTime<Utc>,
    ) -> PaymentResult<Option<Order>> {
        let row = sqlx::query(&format!(
            "{} WHERE customer_email = ? AND total = ? AND status = ? AND created_at >= ? \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_ORDER
        ))
        .bind(email)
        .bind(total)
        .bind(OrderStatus::PendingTransfer.as_str())
        .bind(timestamp(since))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(Self::from_row).transpose()
    }
}
