//! # Application State
//!
//! Shared state for the Axum application: configuration, the checkout
//! builder, discount ledger, webhook handler and bank-transfer settlement.

use chrono::Duration;
use settle_core::{
    BankTransferConfig, BankTransferSettlement, Catalog, CheckoutSessionBuilder, CheckoutUrls,
    ConsumePolicy, DiscountLedger, DiscountStore, ExchangeRates, ItemCatalog, OrderStore,
    PaymentError, PaymentProcessor, PaymentWebhookHandler, PriceQuoteCalculator, PricingConfig,
};
use settle_mercadopago::MercadoPagoClient;
use settle_store::{SqliteDiscountStore, SqliteOrderStore};
use std::env;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for processor callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// sqlx connection string
    pub database_url: String,
    /// Internal id of the code that drains a cart to one currency unit
    pub drain_discount_code_id: Option<i64>,
    pub consume_policy: ConsumePolicy,
    pub bank_transfer: BankTransferConfig,
    pub pricing_path: Option<String>,
    pub catalog_path: Option<String>,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok();

        let mut bank_transfer = BankTransferConfig::default();
        if let Ok(prefix) = env::var("BANK_TRANSFER_PREFIX") {
            bank_transfer.prefix = prefix;
        }
        if let Some(digits) = parse_var::<u32>("BANK_TRANSFER_DIGITS")? {
            if !(4..=18).contains(&digits) {
                return Err(PaymentError::Configuration(
                    "BANK_TRANSFER_DIGITS must be between 4 and 18".to_string(),
                ));
            }
            bank_transfer.digits = digits;
        }

        let consume_policy = match env::var("DISCOUNT_CONSUME_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => ConsumePolicy::default(),
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT")?.unwrap_or(8080),
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://settle.db".to_string()),
            drain_discount_code_id: parse_var("DRAIN_DISCOUNT_CODE_ID")?,
            consume_policy,
            bank_transfer,
            pricing_path: env::var("PRICING_CONFIG").ok(),
            catalog_path: env::var("CATALOG_CONFIG").ok(),
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, PaymentError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| PaymentError::Configuration(format!("invalid HOST/PORT: {}", e)))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            environment: "development".to_string(),
            database_url: "sqlite://settle.db".to_string(),
            drain_discount_code_id: None,
            consume_policy: ConsumePolicy::default(),
            bank_transfer: BankTransferConfig::default(),
            pricing_path: None,
            catalog_path: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, PaymentError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PaymentError::Configuration(format!("{} has an invalid value", key))),
        _ => Ok(None),
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub urls: CheckoutUrls,
    pub pricing: PricingConfig,
    pub rates: ExchangeRates,
    pub builder: CheckoutSessionBuilder,
    pub ledger: DiscountLedger,
    pub processor: Arc<dyn PaymentProcessor>,
    pub webhook: PaymentWebhookHandler,
    pub bank_transfer: BankTransferSettlement,
}

/// External collaborators the state is wired from
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub orders: Arc<dyn OrderStore>,
    pub discounts: Arc<dyn DiscountStore>,
}

impl AppState {
    /// Wire the components together
    pub fn assemble(config: AppConfig, pricing: PricingConfig, rates: ExchangeRates, backends: Backends) -> Self {
        let urls = CheckoutUrls::new(&config.base_url);

        let ledger = DiscountLedger::new(backends.discounts)
            .with_drain_code_id(config.drain_discount_code_id)
            .with_policy(config.consume_policy);

        let builder = CheckoutSessionBuilder::new(
            backends.catalog,
            PriceQuoteCalculator::new(pricing.clone()),
            rates.clone(),
        );

        let webhook = PaymentWebhookHandler::new(
            backends.processor.clone(),
            ledger.clone(),
            backends.orders.clone(),
        );

        let bank_transfer = BankTransferSettlement::new(backends.orders, config.bank_transfer.clone());

        Self {
            config,
            urls,
            pricing,
            rates,
            builder,
            ledger,
            processor: backends.processor,
            webhook,
            bank_transfer,
        }
    }

    /// Build from environment, config files and the database
    pub async fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let pricing = load_pricing_config(config.pricing_path.as_deref())?;
        let catalog = load_catalog(config.catalog_path.as_deref())?;

        let pool = settle_store::connect(&config.database_url).await?;
        settle_store::init_schema(&pool).await?;

        let processor = MercadoPagoClient::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize MercadoPago: {}", e))?;

        let max_age = i64::try_from(pricing.exchange_rate.max_age_secs).unwrap_or(i64::MAX);
        let rates = ExchangeRates::new(Duration::seconds(max_age));

        Ok(Self::assemble(
            config,
            pricing,
            rates,
            Backends {
                catalog: Arc::new(catalog),
                processor: Arc::new(processor),
                orders: Arc::new(SqliteOrderStore::new(pool.clone())),
                discounts: Arc::new(SqliteDiscountStore::new(pool)),
            },
        ))
    }
}

fn read_first(explicit: Option<&str>, candidates: &[&str]) -> anyhow::Result<Option<(String, String)>> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
        return Ok(Some((path.to_string(), content)));
    }
    for path in candidates {
        if let Ok(content) = std::fs::read_to_string(path) {
            return Ok(Some((path.to_string(), content)));
        }
    }
    Ok(None)
}

/// Pricing is required: markups have no defaults
fn load_pricing_config(explicit: Option<&str>) -> anyhow::Result<PricingConfig> {
    let candidates = [
        "config/pricing.toml",
        "../config/pricing.toml",
        "../../config/pricing.toml",
    ];

    let (path, content) = read_first(explicit, &candidates)?
        .ok_or_else(|| anyhow::anyhow!("No pricing config found (config/pricing.toml)"))?;
    let pricing = PricingConfig::from_toml(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    tracing::info!(%path, "loaded pricing config");
    Ok(pricing)
}

/// Load item catalog from config file
fn load_catalog(explicit: Option<&str>) -> anyhow::Result<ItemCatalog> {
    let candidates = [
        "config/catalog.toml",
        "../config/catalog.toml",
        "../../config/catalog.toml",
    ];

    match read_first(explicit, &candidates)? {
        Some((path, content)) => {
            let catalog = ItemCatalog::from_toml(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            tracing::info!("Loaded {} items from {}", catalog.len(), path);
            Ok(catalog)
        }
        None => {
            tracing::warn!("No item catalog found, using empty catalog");
            Ok(ItemCatalog::new())
        }
    }
}
