//! subscription.* procedures

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap};
use chrono::{DateTime, Utc};
use cortex_core::{Permission, PlanTier};
use cortex_payments::{CheckoutRequest, CheckoutSession, CreditsCheckoutRequest, PaymentGateway};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::request_origin;
use crate::auth::Caller;
use crate::error::{ApiError, ApiResult, Rpc};
use crate::input::Input;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutInput {
    pub plan_id: String,
    #[serde(default)]
    pub is_yearly: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyCreditsInput {
    pub credit_pack_id: String,
}

/// Local subscription state merged with the processor's view
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan: PlanTier,
    pub status: String,
    pub token_balance: i64,
    pub tokens_used_this_month: i64,
    pub stripe_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
}

fn gateway(state: &AppState) -> Result<&Arc<dyn PaymentGateway>, ApiError> {
    state
        .gateway
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Payments are not configured."))
}

pub async fn get_status(State(state): State<AppState>, caller: Caller) -> ApiResult<SubscriptionView> {
    caller.require(Permission::Read)?;
    let user = caller.user;

    let live = match (user.stripe_customer_id.as_deref(), state.gateway.as_ref()) {
        (Some(customer_id), Some(gateway)) => gateway.subscription_status(customer_id).await?,
        _ => None,
    };

    Ok(Rpc(SubscriptionView {
        plan: user.subscription_plan,
        status: user.subscription_status,
        token_balance: user.token_balance,
        tokens_used_this_month: user.tokens_used_this_month,
        stripe_subscription_id: user.stripe_subscription_id,
        current_period_end: live.as_ref().map(|s| s.current_period_end),
        cancel_at_period_end: live.as_ref().map(|s| s.cancel_at_period_end),
    }))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Input(input): Input<CreateCheckoutInput>,
) -> ApiResult<CheckoutSession> {
    caller.require_session()?;
    let gateway = gateway(&state)?;
    let origin = request_origin(&headers, &state);
    let user = caller.user;

    let session = gateway
        .create_checkout_session(&CheckoutRequest {
            plan_id: input.plan_id,
            user_id: user.id,
            user_email: user.email.filter(|e| !e.is_empty()),
            user_name: user.name,
            yearly: input.is_yearly.unwrap_or(false),
            success_url: format!("{origin}/dashboard/billing?success=true"),
            cancel_url: format!("{origin}/pricing?canceled=true"),
        })
        .await?;

    Ok(Rpc(session))
}

pub async fn buy_credits(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Input(input): Input<BuyCreditsInput>,
) -> ApiResult<CheckoutSession> {
    caller.require_session()?;
    let gateway = gateway(&state)?;
    let origin = request_origin(&headers, &state);

    let session = gateway
        .create_credits_checkout(&CreditsCheckoutRequest {
            credit_pack_id: input.credit_pack_id,
            user_id: caller.user.id,
            user_email: caller.user.email.filter(|e| !e.is_empty()),
            success_url: format!("{origin}/dashboard/billing?credits=true"),
            cancel_url: format!("{origin}/pricing?canceled=true"),
        })
        .await?;

    Ok(Rpc(session))
}

/// Cancel at period end; the webhook flips the local status later
pub async fn cancel(State(state): State<AppState>, caller: Caller) -> ApiResult<Value> {
    caller.require_session()?;
    let subscription_id = caller
        .user
        .stripe_subscription_id
        .as_deref()
        .ok_or_else(|| ApiError::precondition_failed("No active subscription found"))?;

    gateway(&state)?.cancel_subscription(subscription_id).await?;
    tracing::info!(user_id = caller.user.id, subscription_id, "Subscription cancellation requested");

    Ok(Rpc(json!({ "success": true })))
}

pub async fn get_portal_url(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
) -> ApiResult<Value> {
    caller.require_session()?;
    let customer_id = caller
        .user
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::precondition_failed("No Stripe customer found"))?;

    let return_url = format!("{}/dashboard/billing", request_origin(&headers, &state));
    let url = gateway(&state)?
        .create_portal_session(customer_id, &return_url)
        .await?;

    Ok(Rpc(json!({ "url": url })))
}
