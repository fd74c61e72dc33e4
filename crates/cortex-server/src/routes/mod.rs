//! HTTP Routes
//!
//! Procedures live at `/api/trpc/{router}.{procedure}`: queries are `GET`,
//! mutations are `POST`. The Stripe webhook and health check sit outside
//! the procedure namespace.

mod api_keys;
mod auth;
mod dashboard;
mod health;
mod huggingface;
mod pricing;
mod subscription;
mod webhook;

#[cfg(test)]
mod tests;

use axum::{
    http::{header, HeaderMap},
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))

        // Auth
        .route("/api/trpc/auth.me", get(auth::me))
        .route("/api/trpc/auth.logout", post(auth::logout))
        .route("/api/trpc/auth.createSession", post(auth::create_session))

        // Pricing
        .route("/api/trpc/pricing.getPlans", get(pricing::get_plans))
        .route("/api/trpc/pricing.getCreditPacks", get(pricing::get_credit_packs))
        .route("/api/trpc/pricing.getPlanById", get(pricing::get_plan_by_id))

        // Subscription
        .route("/api/trpc/subscription.getStatus", get(subscription::get_status))
        .route("/api/trpc/subscription.createCheckout", post(subscription::create_checkout))
        .route("/api/trpc/subscription.buyCredits", post(subscription::buy_credits))
        .route("/api/trpc/subscription.cancel", post(subscription::cancel))
        .route("/api/trpc/subscription.getPortalUrl", post(subscription::get_portal_url))

        // Dashboard
        .route("/api/trpc/dashboard.getStats", get(dashboard::get_stats))

        // API keys
        .route("/api/trpc/apiKeys.list", get(api_keys::list))
        .route("/api/trpc/apiKeys.create", post(api_keys::create))
        .route("/api/trpc/apiKeys.revoke", post(api_keys::revoke))
        .route("/api/trpc/apiKeys.delete", post(api_keys::delete))

        // Hugging Face
        .route("/api/trpc/huggingface.getOrgInfo", get(huggingface::get_org_info))
        .route("/api/trpc/huggingface.listModels", get(huggingface::list_models))
        .route("/api/trpc/huggingface.listDatasets", get(huggingface::list_datasets))
        .route("/api/trpc/huggingface.inference", post(huggingface::inference))
        .route("/api/trpc/huggingface.generateText", post(huggingface::generate_text))

        // Stripe
        .route("/api/stripe/webhook", post(webhook::stripe_webhook))

        .with_state(state)
}

/// Origin for redirect URLs: the request's `Origin` header, else the configured one
fn request_origin(headers: &HeaderMap, state: &AppState) -> String {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_end_matches('/'))
        .filter(|v| !v.is_empty() && *v != "null")
        .map_or_else(|| state.config.app_origin.clone(), str::to_string)
}
