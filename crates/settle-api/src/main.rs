//! # Settle-Cart
//!
//! Order-settlement server.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export MP_ACCESS_TOKEN=TEST-...
//! export MP_WEBHOOK_SECRET=...
//! export DATABASE_URL=sqlite://settle.db
//!
//! # Run the server
//! settle-server
//! ```

use settle_api::{rates, routes, state::AppState};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let state = AppState::new().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment processor: {}", state.processor.provider_name());

    // Prime the rate before accepting checkouts, then keep it fresh
    let source = rates::rate_source(&state.pricing.exchange_rate.source)?;
    if let Err(e) = state.rates.refresh(source.as_ref()).await {
        warn!(error = %e, "initial exchange rate refresh failed");
    }
    let interval = Duration::from_secs(state.pricing.exchange_rate.refresh_interval_secs.max(1));
    rates::spawn_refresher(state.rates.clone(), source, interval);

    let app = routes::create_router(state);

    info!("Settle-Cart starting on http://{}", addr);

    if !is_prod {
        info!("Checkout: POST http://{}/checkout/session", addr);
        info!("Webhook: POST http://{}/payments/webhook", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON lines
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
