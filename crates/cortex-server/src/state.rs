//! Application State

use std::sync::Arc;

use chrono::Duration;
use cortex_core::{ModelHub, Store};
use cortex_payments::{EmailSender, PaymentGateway, WebhookConfig, WebhookReconciler};

use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Users, keys, usage, sessions, webhook ledger and prices
    pub store: Arc<dyn Store>,

    /// Model hub (Hugging Face)
    pub hub: Arc<dyn ModelHub>,

    /// Transactional e-mail
    pub mailer: Arc<dyn EmailSender>,

    /// Stripe checkout (None if not configured)
    pub gateway: Option<Arc<dyn PaymentGateway>>,

    /// Stripe webhook handling (None without a webhook secret)
    pub reconciler: Option<Arc<WebhookReconciler>>,

    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<dyn ModelHub>,
        mailer: Arc<dyn EmailSender>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            hub,
            mailer,
            gateway: None,
            reconciler: None,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Enable the webhook endpoint with the given signing secret
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        let config = WebhookConfig::new(secret)
            .with_retention(Duration::days(self.config.webhook_retention_days));
        self.reconciler = Some(Arc::new(WebhookReconciler::new(
            self.store.clone(),
            self.mailer.clone(),
            config,
        )));
        self
    }
}
