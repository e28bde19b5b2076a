//! # MercadoPago Configuration
//!
//! Configuration for the MercadoPago integration.
//! Secrets are loaded from environment variables.

use settle_core::PaymentError;
use std::env;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "https://api.mercadopago.com";

/// MercadoPago API configuration
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    /// Access token (TEST-... or APP_USR-...)
    pub access_token: String,

    /// Secret for the `x-signature` header; unsigned notifications are accepted when absent
    pub webhook_secret: Option<String>,

    /// Maximum age (and future skew) of a signed `ts`; `None` skips the check
    pub signature_tolerance: Option<Duration>,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Attempts for the payment lookup, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on each further retry
    pub retry_backoff: Duration,
}

impl MercadoPagoConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `MP_ACCESS_TOKEN`
    ///
    /// Optional:
    /// - `MP_WEBHOOK_SECRET`
    /// - `MP_API_BASE_URL`
    /// - `MP_TIMEOUT_SECS` (default 10)
    /// - `MP_MAX_ATTEMPTS` (default 3)
    /// - `MP_RETRY_BACKOFF_MS` (default 200)
    /// - `MP_SIGNATURE_TOLERANCE_SECS` (default 300, `0` disables)
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let access_token = env::var("MP_ACCESS_TOKEN")
            .map_err(|_| PaymentError::Configuration("MP_ACCESS_TOKEN not set".to_string()))?;

        if access_token.trim().is_empty() {
            return Err(PaymentError::Configuration(
                "MP_ACCESS_TOKEN must not be empty".to_string(),
            ));
        }

        let mut config = Self::new(access_token);
        config.webhook_secret = env::var("MP_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());

        if let Ok(url) = env::var("MP_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        if let Some(secs) = parse_env::<u64>("MP_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_env::<u32>("MP_MAX_ATTEMPTS")? {
            config.max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_env::<u64>("MP_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env::<u64>("MP_SIGNATURE_TOLERANCE_SECS")? {
            config.signature_tolerance = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            webhook_secret: None,
            signature_tolerance: Some(Duration::from_secs(300)),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// Sandbox credentials
    pub fn is_test_mode(&self) -> bool {
        self.access_token.starts_with("TEST-")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: require signed notifications
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Builder: `None` accepts any signed timestamp
    pub fn with_signature_tolerance(mut self, tolerance: Option<Duration>) -> Self {
        self.signature_tolerance = tolerance;
        self
    }

    /// Builder: retry policy for the payment lookup
    pub fn with_retries(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, PaymentError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PaymentError::Configuration(format!("{} is not a valid number", key))),
        Err(_) => Ok(None),
    }
}
