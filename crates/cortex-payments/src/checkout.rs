//! Stripe Checkout Integration
//!
//! Hosted checkout for subscriptions and credit packs, live subscription
//! lookups, cancellation and the customer portal. Processor price ids are
//! persisted through `PriceStore`, so products and prices are created in
//! Stripe only the first time a plan/cycle or pack is sold.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::{PriceStore, UserId};
use serde::{Deserialize, Serialize};
use stripe::{
    BillingPortalSession, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateBillingPortalSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentIntentData, CreateCheckoutSessionSubscriptionData, CreatePrice,
    CreatePriceRecurring, CreatePriceRecurringInterval, CreateProduct, Currency, CustomerId,
    IdOrCreate, ListSubscriptions, Price, Product, Subscription, SubscriptionId,
    SubscriptionStatusFilter, UpdateSubscription,
};

use crate::catalog::{self, CreditPack, PricingPlan};
use crate::error::{PaymentError, Result};

/// Placeholder Stripe replaces with the session id on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Stripe credentials
#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
}

impl StripeConfig {
    /// Create from environment variables. The secret key is required; the
    /// webhook secret is optional so checkout can run without webhooks.
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

/// Request to create a subscription checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan_id: String,
    pub user_id: UserId,
    /// Prefills Stripe's e-mail field when known
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub yearly: bool,
    /// `?session_id=...` is appended
    pub success_url: String,
    pub cancel_url: String,
}

/// Request to buy a one-time credit pack
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsCheckoutRequest {
    pub credit_pack_id: String,
    pub user_id: UserId,
    #[serde(default)]
    pub user_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Stripe session ID
    pub session_id: String,

    /// URL to redirect the user to
    pub url: String,
}

/// Live view of a customer's active subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub id: String,
    pub status: String,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub plan_id: Option<String>,
}

/// Payment processor operations used by the API surface
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    async fn create_credits_checkout(&self, request: &CreditsCheckoutRequest) -> Result<CheckoutSession>;

    /// Most recent active subscription of `customer_id`, if any
    async fn subscription_status(&self, customer_id: &str) -> Result<Option<SubscriptionStatus>>;

    /// Cancel at the end of the current period
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Billing portal URL for `customer_id`
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;
}

/// Cache key of a plan price
pub fn plan_price_key(plan_id: &str, yearly: bool) -> String {
    format!("{plan_id}-{}", billing_cycle(yearly))
}

/// Cache key of a credit pack price
pub fn credit_price_key(pack_id: &str) -> String {
    format!("credit-{pack_id}")
}

const fn billing_cycle(yearly: bool) -> &'static str {
    if yearly { "yearly" } else { "monthly" }
}

fn with_session_id(success_url: &str) -> String {
    let separator = if success_url.contains('?') { '&' } else { '?' };
    format!("{success_url}{separator}session_id={SESSION_ID_PLACEHOLDER}")
}

fn subscription_metadata(request: &CheckoutRequest) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        ("user_id".to_string(), request.user_id.to_string()),
        (
            "customer_name".to_string(),
            request.user_name.clone().unwrap_or_default(),
        ),
        ("plan_id".to_string(), request.plan_id.clone()),
        ("billing_cycle".to_string(), billing_cycle(request.yearly).to_string()),
    ]);
    if let Some(email) = &request.user_email {
        metadata.insert("customer_email".to_string(), email.clone());
    }
    metadata
}

fn credit_metadata(request: &CreditsCheckoutRequest) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        ("user_id".to_string(), request.user_id.to_string()),
        ("credit_pack_id".to_string(), request.credit_pack_id.clone()),
        ("type".to_string(), "credit_purchase".to_string()),
    ]);
    if let Some(email) = &request.user_email {
        metadata.insert("customer_email".to_string(), email.clone());
    }
    metadata
}

/// Stripe-backed `PaymentGateway`
pub struct StripeGateway {
    client: Client,
    prices: Arc<dyn PriceStore>,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig, prices: Arc<dyn PriceStore>) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
            prices,
        }
    }

    /// Persisted price id for `key`, creating product and price through `create` on a miss
    async fn resolve_price<F, Fut>(&self, key: &str, create: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<String>> + Send,
    {
        if let Some(price_id) = self.prices.get_price_id(key).await? {
            return Ok(price_id);
        }

        let created = create().await?;
        let stored = self.prices.put_price_id(key, &created).await?;
        if stored != created {
            tracing::warn!(
                cache_key = %key,
                created = %created,
                stored = %stored,
                "Concurrent price creation, using the persisted price"
            );
        }
        Ok(stored)
    }

    async fn plan_price_id(&self, plan: &'static PricingPlan, yearly: bool) -> Result<String> {
        let key = plan_price_key(plan.id, yearly);
        self.resolve_price(&key, || async move {
            let name = format!("OmniCortex {}", plan.name);
            let mut product = CreateProduct::new(&name);
            product.description = Some(plan.description);
            product.metadata = Some(HashMap::from([("plan_id".to_string(), plan.id.to_string())]));
            let product = Product::create(&self.client, product).await?;

            let mut price = CreatePrice::new(Currency::USD);
            price.product = Some(IdOrCreate::Id(product.id.as_str()));
            price.unit_amount = Some(plan.price_cents(yearly));
            price.recurring = Some(CreatePriceRecurring {
                interval: if yearly {
                    CreatePriceRecurringInterval::Year
                } else {
                    CreatePriceRecurringInterval::Month
                },
                ..Default::default()
            });
            price.metadata = Some(HashMap::from([
                ("plan_id".to_string(), plan.id.to_string()),
                ("billing_cycle".to_string(), billing_cycle(yearly).to_string()),
            ]));
            let price = Price::create(&self.client, price).await?;

            tracing::info!(plan = plan.id, yearly, price_id = %price.id, "Created Stripe price");
            Ok(price.id.to_string())
        })
        .await
    }

    async fn credit_price_id(&self, pack: &'static CreditPack) -> Result<String> {
        let key = credit_price_key(pack.id);
        self.resolve_price(&key, || async move {
            let description = format!(
                "{} tokens for OmniCortex API",
                catalog::format_token_quota(pack.tokens)
            );
            let mut product = CreateProduct::new(pack.name);
            product.description = Some(description.as_str());
            product.metadata = Some(HashMap::from([
                ("credit_pack_id".to_string(), pack.id.to_string()),
                ("tokens".to_string(), pack.tokens.to_string()),
            ]));
            let product = Product::create(&self.client, product).await?;

            let mut price = CreatePrice::new(Currency::USD);
            price.product = Some(IdOrCreate::Id(product.id.as_str()));
            price.unit_amount = Some(pack.price_cents);
            price.metadata = Some(HashMap::from([(
                "credit_pack_id".to_string(),
                pack.id.to_string(),
            )]));
            let price = Price::create(&self.client, price).await?;

            tracing::info!(pack = pack.id, price_id = %price.id, "Created Stripe price");
            Ok(price.id.to_string())
        })
        .await
    }

    async fn checkout(&self, params: CreateCheckoutSession<'_>) -> Result<CheckoutSession> {
        let session = StripeCheckoutSession::create(&self.client, params).await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            url,
        })
    }
}

fn parse_customer_id(customer_id: &str) -> Result<CustomerId> {
    customer_id
        .parse()
        .map_err(|_| PaymentError::Validation(format!("Invalid customer id: {customer_id}")))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let plan = catalog::plan_by_id(&request.plan_id)
            .ok_or_else(|| PaymentError::NotFound(format!("Plan not found: {}", request.plan_id)))?;
        if plan.price_cents(request.yearly) == 0 {
            return Err(PaymentError::Validation(
                "The free plan does not require checkout".into(),
            ));
        }

        let price_id = self.plan_price_id(plan, request.yearly).await?;
        let user_id = request.user_id.to_string();
        let success_url = with_session_id(&request.success_url);

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer_email = request.user_email.as_deref();
        params.client_reference_id = Some(user_id.as_str());
        params.allow_promotion_codes = Some(true);
        params.metadata = Some(subscription_metadata(request));
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.success_url = Some(success_url.as_str());
        params.cancel_url = Some(request.cancel_url.as_str());
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(HashMap::from([
                ("user_id".to_string(), user_id.clone()),
                ("plan_id".to_string(), request.plan_id.clone()),
            ])),
            ..Default::default()
        });

        let session = self.checkout(params).await?;
        tracing::info!(
            user_id = request.user_id,
            plan = %request.plan_id,
            yearly = request.yearly,
            session_id = %session.session_id,
            "Created subscription checkout"
        );
        Ok(session)
    }

    async fn create_credits_checkout(&self, request: &CreditsCheckoutRequest) -> Result<CheckoutSession> {
        let pack = catalog::credit_pack_by_id(&request.credit_pack_id).ok_or_else(|| {
            PaymentError::NotFound(format!("Credit pack not found: {}", request.credit_pack_id))
        })?;

        let price_id = self.credit_price_id(pack).await?;
        let user_id = request.user_id.to_string();
        let success_url = with_session_id(&request.success_url);
        let metadata = credit_metadata(request);

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.customer_email = request.user_email.as_deref();
        params.client_reference_id = Some(user_id.as_str());
        params.allow_promotion_codes = Some(true);
        params.metadata = Some(metadata.clone());
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.success_url = Some(success_url.as_str());
        params.cancel_url = Some(request.cancel_url.as_str());
        // payment_intent.succeeded only sees the intent's own metadata
        params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
            metadata: Some(metadata),
            ..Default::default()
        });

        let session = self.checkout(params).await?;
        tracing::info!(
            user_id = request.user_id,
            pack = %request.credit_pack_id,
            session_id = %session.session_id,
            "Created credit checkout"
        );
        Ok(session)
    }

    async fn subscription_status(&self, customer_id: &str) -> Result<Option<SubscriptionStatus>> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(parse_customer_id(customer_id)?);
        params.status = Some(SubscriptionStatusFilter::Active);
        params.limit = Some(1);

        let list = Subscription::list(&self.client, &params).await?;
        Ok(list.data.into_iter().next().map(|sub| SubscriptionStatus {
            id: sub.id.to_string(),
            status: sub.status.as_str().to_string(),
            current_period_end: DateTime::from_timestamp(sub.current_period_end, 0)
                .unwrap_or_else(Utc::now),
            cancel_at_period_end: sub.cancel_at_period_end,
            plan_id: sub.metadata.get("plan_id").cloned(),
        }))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let id: SubscriptionId = subscription_id.parse().map_err(|_| {
            PaymentError::Validation(format!("Invalid subscription id: {subscription_id}"))
        })?;

        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);
        Subscription::update(&self.client, &id, params).await?;

        tracing::info!(subscription_id = %subscription_id, "Subscription set to cancel at period end");
        Ok(())
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let mut params = CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }
}
