//! Stripe webhook endpoint
//!
//! Answers Stripe directly, outside the procedure envelope. A 2xx tells
//! Stripe to stop retrying, so only verified and fully handled deliveries
//! (or duplicates of them) get one.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cortex_payments::{Outcome, PaymentError};
use serde_json::json;

use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(reconciler) = state.reconciler.as_ref() else {
        tracing::error!("STRIPE_WEBHOOK_SECRET not configured, rejecting webhook");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, "Webhook secret not configured");
    };

    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return reply(StatusCode::BAD_REQUEST, "Missing stripe-signature header");
    };

    match reconciler.process(&body, signature).await {
        Ok(Outcome::Processed) => Json(json!({ "received": true })).into_response(),
        Ok(Outcome::TestEvent) => Json(json!({ "verified": true })).into_response(),
        Ok(Outcome::Duplicate) => Json(json!({ "received": true, "duplicate": true })).into_response(),
        Err(PaymentError::WebhookSignature(msg)) => {
            tracing::warn!(error = %msg, "Webhook signature verification failed");
            reply(StatusCode::BAD_REQUEST, &format!("Webhook Error: {msg}"))
        }
        Err(PaymentError::WebhookParse(msg)) => {
            tracing::warn!(error = %msg, "Webhook payload rejected");
            reply(StatusCode::BAD_REQUEST, &format!("Webhook Error: {msg}"))
        }
        Err(err) => {
            tracing::error!(error = %err, "Webhook processing failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed")
        }
    }
}

fn reply(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}
