//! OmniCortex HTTP Server
//!
//! Procedure API, Stripe webhooks and the Hugging Face proxy.

use std::sync::Arc;

use cortex_core::{MemoryStore, PriceStore, Store};
use cortex_db::SqliteStore;
use cortex_payments::{LogEmailSender, PaymentGateway, StripeConfig, StripeGateway};
use cortex_runtime::{HuggingFaceClient, ModelHub};
use cortex_server::{router, AppConfig, AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let state = if config.uses_memory_store() {
        tracing::warn!("⚠ Using in-memory store - data is lost on restart");
        build_state(Arc::new(MemoryStore::new()), config)?
    } else {
        let store = SqliteStore::connect(&config.database_url).await?;
        tracing::info!("✓ Database ready");
        build_state(Arc::new(store), config)?
    };

    // Verify hub connection
    match state.hub.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to Hugging Face"),
        Ok(false) | Err(_) => tracing::warn!("⚠ Hugging Face not reachable - hub procedures will fail"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let addr = state.config.bind_addr.clone();
    let app = router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 OmniCortex server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("  GET  /health              - Health check");
    tracing::info!("  *    /api/trpc/{{router}}.{{procedure}}");
    tracing::info!("  POST /api/stripe/webhook  - Stripe webhooks");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire a concrete store into every component that needs a slice of it
fn build_state<S: Store + 'static>(store: Arc<S>, config: AppConfig) -> anyhow::Result<AppState> {
    let hub: Arc<dyn ModelHub> = Arc::new(HuggingFaceClient::from_env()?);
    let mailer = Arc::new(LogEmailSender::from_env());
    let prices: Arc<dyn PriceStore> = store.clone();

    let mut state = AppState::new(store, hub, mailer, config);

    match StripeConfig::from_env() {
        Ok(stripe) => {
            let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(&stripe, prices));
            state = state.with_gateway(gateway);
            tracing::info!("✓ Stripe configured");

            match stripe.webhook_secret {
                Some(secret) => state = state.with_webhook_secret(secret),
                None => tracing::warn!("⚠ STRIPE_WEBHOOK_SECRET not set - webhooks will be rejected"),
            }
        }
        Err(e) => {
            tracing::warn!("⚠ Stripe not configured - payments disabled ({})", e);
            tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
        }
    }

    if state.config.auth_issuer_secret.is_none() {
        tracing::warn!("⚠ AUTH_ISSUER_SECRET not set - auth.createSession disabled");
    }

    Ok(state)
}
