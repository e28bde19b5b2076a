//! Router tests against an in-memory SQLite store and a mocked MercadoPago API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use settle_api::{create_router, AppConfig, AppState, Backends};
use settle_core::{
    CatalogItem, DiscountCode, ExchangeRate, ExchangeRates, ItemCatalog, OrderStatus,
    OrderStore, PricingConfig,
};
use settle_mercadopago::{MercadoPagoClient, MercadoPagoConfig};
use settle_store::{SqliteDiscountStore, SqliteOrderStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYMENT_ID: &str = "144728647320";

const PRICING: &str = r#"
source_currency = "USD"
local_currency = "ARS"
shipping_rate_per_weight = "0"

[markups]
retail = "0"
wholesale = "0"
no_stock = "0"

[exchange_rate.source]
kind = "fixed"
rate = "100"
"#;

struct TestApp {
    server: TestServer,
    processor: MockServer,
    orders: SqliteOrderStore,
}

async fn test_app() -> TestApp {
    let pool = settle_store::connect_in_memory().await.unwrap();
    settle_store::init_schema(&pool).await.unwrap();

    let discounts = SqliteDiscountStore::new(pool.clone());
    discounts
        .insert_code(&DiscountCode::percent(1, "SAVE10", dec!(10)))
        .await
        .unwrap();
    discounts
        .insert_code(
            &DiscountCode::percent(2, "SUMMER", dec!(20))
                .with_window(None, Some(Utc::now() - Duration::days(1))),
        )
        .await
        .unwrap();

    // 10 USD at 100 ARS/USD, no shipping or markup: 1000.00 ARS per unit
    let catalog = ItemCatalog::new()
        .with_item(CatalogItem::new("pad", "Brake pad", dec!(10), dec!(1)).with_inventory(5));

    let processor = MockServer::start().await;
    let mp_config = MercadoPagoConfig::new("APP_USR-test-token")
        .with_api_base_url(processor.uri())
        .with_retries(1, std::time::Duration::from_millis(1));
    let client = MercadoPagoClient::new(mp_config).unwrap();

    let pricing = PricingConfig::from_toml(PRICING).unwrap();
    let rates = ExchangeRates::with_rate(
        ExchangeRate::new(dec!(100), Utc::now()),
        Duration::hours(1),
    );

    let orders = SqliteOrderStore::new(pool.clone());
    let state = AppState::assemble(
        AppConfig {
            base_url: "https://shop.example.com".to_string(),
            ..AppConfig::default()
        },
        pricing,
        rates,
        Backends {
            catalog: Arc::new(catalog),
            processor: Arc::new(client),
            orders: Arc::new(orders.clone()),
            discounts: Arc::new(discounts),
        },
    );

    TestApp {
        server: TestServer::new(create_router(state)).unwrap(),
        processor,
        orders,
    }
}

async fn mount_preference(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pref-1",
            "init_point": "https://www.mercadopago.com/checkout?pref_id=pref-1"
        })))
        .mount(server)
        .await;
}

fn cart(discount_code: Option<&str>) -> Value {
    json!({
        "items": [{"item_id": "pad", "quantity": 2}],
        "customer": {"email": "ana@example.com", "name": "Ana"},
        "shipping": {
            "address": "Av. Corrientes 1234",
            "city": "CABA",
            "province": "Buenos Aires",
            "zip_code": "1043"
        },
        "discount_code": discount_code
    })
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let response = app.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["processor"], "mercadopago");
}

#[tokio::test]
async fn test_checkout_session_applies_discount() {
    let app = test_app().await;
    mount_preference(&app.processor).await;

    let response = app.server.post("/checkout/session").json(&cart(Some("save10"))).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert!(body["checkout_url"].as_str().unwrap().ends_with("pref-1"));
    assert!(!body["external_reference"].as_str().unwrap().is_empty());
    assert_eq!(body["subtotal"], 200_000);
    assert_eq!(body["discount_amount"], 20_000);
    assert_eq!(body["total"], 180_000);

    // Processor sees discounted unit prices, the snapshot keeps the originals
    let requests = app.processor.received_requests().await.unwrap();
    let preference: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(preference["items"][0]["unit_price"], 900.0);
    assert_eq!(preference["metadata"]["items"][0]["unit_price"], 100_000);
    assert_eq!(preference["metadata"]["discount_code"], "SAVE10");
}

#[tokio::test]
async fn test_checkout_rejections() {
    let app = test_app().await;
    mount_preference(&app.processor).await;

    let mut empty = cart(None);
    empty["items"] = json!([]);
    let response = app.server.post("/checkout/session").json(&empty).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let mut unknown = cart(None);
    unknown["items"] = json!([{"item_id": "ghost", "quantity": 1}]);
    let response = app.server.post("/checkout/session").json(&unknown).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "ITEM_NOT_FOUND");

    let response = app.server.post("/checkout/session").json(&cart(Some("SUMMER"))).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "EXPIRED");

    assert!(app.processor.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_discount_preview() {
    let app = test_app().await;

    let response = app
        .server
        .post("/discounts/validate")
        .json(&json!({"code": "SAVE10", "subtotal": 50_000}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["discount_amount"], 5_000);
    assert_eq!(body["total"], 45_000);

    let response = app
        .server
        .post("/discounts/validate")
        .json(&json!({"code": "NOPE", "subtotal": 50_000}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "NOT_FOUND");
}

#[tokio::test]
async fn test_webhook_challenge() {
    let app = test_app().await;

    let response = app
        .server
        .get("/payments/webhook")
        .add_query_param("challenge", "token-123")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "token-123");

    let response = app.server.get("/payments/webhook").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_approved_webhook_creates_one_order() {
    let app = test_app().await;
    mount_preference(&app.processor).await;

    let response = app.server.post("/checkout/session").json(&cart(Some("SAVE10"))).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let requests = app.processor.received_requests().await.unwrap();
    let preference: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let snapshot = preference["metadata"].clone();

    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{}", PAYMENT_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 144728647320u64,
            "status": "approved",
            "external_reference": snapshot["external_reference"],
            "metadata": snapshot,
            "transaction_amount": 1800.0,
            "currency_id": "ARS",
            "payer": {"email": "ana@example.com"}
        })))
        .mount(&app.processor)
        .await;

    let notification = json!({"type": "payment", "action": "payment.updated", "data": {"id": PAYMENT_ID}});
    for _ in 0..2 {
        let response = app.server.post("/payments/webhook").json(&notification).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["received"], true);
    }

    let order = app.orders.find_by_payment_id(PAYMENT_ID).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(order.total, 180_000);
    assert_eq!(order.discount_code.as_deref(), Some("SAVE10"));
    assert_eq!(order.items[0].unit_price, 100_000);
}

#[tokio::test]
async fn test_webhook_for_unknown_payment_is_acknowledged() {
    let app = test_app().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Payment not found"})))
        .mount(&app.processor)
        .await;

    let response = app
        .server
        .post("/payments/webhook")
        .add_query_param("type", "payment")
        .add_query_param("data.id", "999")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_processor_outage_asks_for_redelivery() {
    let app = test_app().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&app.processor)
        .await;

    let response = app
        .server
        .post("/payments/webhook")
        .json(&json!({"type": "payment", "data": {"id": PAYMENT_ID}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.orders.find_by_payment_id(PAYMENT_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bank_transfer_double_submit_is_deduplicated() {
    let app = test_app().await;

    let first = app.server.post("/bank-transfer/orders").json(&cart(Some("SAVE10"))).await;
    assert_eq!(first.status_code(), StatusCode::OK);
    let first: Value = first.json();
    assert!(first["settlement_id"].as_str().unwrap().starts_with("TRF-"));
    assert_eq!(first["total"], 180_000);
    assert_eq!(first["duplicate"], false);

    let second = app.server.post("/bank-transfer/orders").json(&cart(Some("SAVE10"))).await;
    let second: Value = second.json();
    assert_eq!(second["settlement_id"], first["settlement_id"]);
    assert_eq!(second["order_id"], first["order_id"]);
    assert_eq!(second["duplicate"], true);

    let settlement_id = first["settlement_id"].as_str().unwrap();
    let order = app.orders.find_by_payment_id(settlement_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PendingTransfer);
    assert_eq!(order.subtotal, 200_000);
    assert_eq!(order.discount_amount, 20_000);
    assert_eq!(order.metadata["channel"], "bank_transfer");
    assert!(order.metadata.get("exchange_rate").is_some());
}

#[tokio::test]
async fn test_malformed_bodies_get_error_response() {
    let app = test_app().await;

    let mut no_customer = cart(None);
    no_customer.as_object_mut().unwrap().remove("customer");
    let response = app.server.post("/checkout/session").json(&no_customer).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "VALIDATION");
    assert_eq!(body["code"], 400);
    assert!(body["details"].as_str().unwrap().contains("customer"));

    let response = app
        .server
        .post("/bank-transfer/orders")
        .bytes(axum::body::Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "VALIDATION");

    let response = app
        .server
        .post("/discounts/validate")
        .json(&json!({"code": "SAVE10"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["reason"], "VALIDATION");
}
