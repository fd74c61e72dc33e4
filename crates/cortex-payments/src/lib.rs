//! # cortex-payments
//!
//! Pricing catalog, Stripe checkout, webhook reconciliation and
//! transactional e-mail for the OmniCortex backend.
//!
//! ## Subscription flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  API call   │────▶│  Stripe Hosted  │────▶│  Dashboard  │
//! │ (checkout)  │     │  Checkout Page  │     │  (success)  │
//! └─────────────┘     └────────┬────────┘     └─────────────┘
//!                              │ webhook
//!                              ▼
//!                     ┌─────────────────┐     ┌─────────────┐
//!                     │WebhookReconciler│────▶│ Store + mail│
//!                     └─────────────────┘     └─────────────┘
//! ```
//!
//! Checkout only hands out a redirect URL. Plan, status and token balance
//! change exclusively through verified webhook events.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cortex_payments::{CheckoutRequest, PaymentGateway, StripeConfig, StripeGateway};
//!
//! let gateway = StripeGateway::new(&StripeConfig::from_env()?, prices);
//!
//! let session = gateway.create_checkout_session(&CheckoutRequest {
//!     plan_id: "pro".into(),
//!     user_id: 42,
//!     user_email: Some("user@example.com".into()),
//!     user_name: None,
//!     yearly: false,
//!     success_url: "https://omnicortex.ai/dashboard/billing?success=true".into(),
//!     cancel_url: "https://omnicortex.ai/pricing?canceled=true".into(),
//! }).await?;
//!
//! // Redirect user to: session.url
//! ```

pub mod catalog;
mod checkout;
pub mod email;
mod error;
mod webhook;

pub use catalog::{CreditPack, PricingPlan};
pub use checkout::{
    CheckoutRequest, CheckoutSession, CreditsCheckoutRequest, PaymentGateway, StripeConfig,
    StripeGateway, SubscriptionStatus,
};
pub use email::{EmailMessage, EmailRecipient, EmailSender, EmailTemplate, LogEmailSender, RecordingEmailSender};
pub use error::{PaymentError, Result};
pub use webhook::{
    signature_header, verify_signature, Outcome, WebhookConfig, WebhookEvent, WebhookReconciler,
};
