//! huggingface.* procedures
//!
//! Listings are public pass-throughs. Inference is metered: tokens are
//! reserved with a conditional debit before the outbound call and given back
//! if the call fails.

use std::future::Future;

use axum::extract::State;
use cortex_core::{
    provider::{HubAccount, HubDataset, HubModel, HubQuery, TextGenerationOptions},
    CoreError, NewUsageLog, Permission, User, UsageStore, UserStore,
};
use cortex_payments::{catalog, email, EmailMessage, EmailRecipient};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult, Rpc};
use crate::input::Input;
use crate::state::AppState;

/// Flat charge for one inference call
pub const INFERENCE_COST: i64 = 100;

/// Balance a caller must hold before any metered call
pub const MINIMUM_BALANCE: i64 = 100;

const DEFAULT_MAX_NEW_TOKENS: u32 = 256;
const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

const fn default_limit() -> u32 {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInput {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl ListInput {
    fn query(self) -> Result<HubQuery, ApiError> {
        if !(1..=MAX_LIST_LIMIT).contains(&self.limit) {
            return Err(ApiError::bad_request(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }
        Ok(HubQuery {
            author: self.author.filter(|a| !a.trim().is_empty()),
            search: self.search.filter(|s| !s.trim().is_empty()),
            ..HubQuery::top_downloads(self.limit)
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceInput {
    pub model_id: String,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTextInput {
    pub model_id: String,
    pub prompt: String,
    #[serde(default)]
    pub max_new_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

pub async fn get_org_info(State(state): State<AppState>) -> ApiResult<HubAccount> {
    Ok(Rpc(state.hub.whoami().await?))
}

pub async fn list_models(
    State(state): State<AppState>,
    Input(input): Input<ListInput>,
) -> ApiResult<Vec<HubModel>> {
    let query = input.query()?;
    Ok(Rpc(state.hub.list_models(&query).await?))
}

pub async fn list_datasets(
    State(state): State<AppState>,
    Input(input): Input<ListInput>,
) -> ApiResult<Vec<HubDataset>> {
    let query = input.query()?;
    Ok(Rpc(state.hub.list_datasets(&query).await?))
}

pub async fn inference(
    State(state): State<AppState>,
    caller: Caller,
    Input(input): Input<InferenceInput>,
) -> ApiResult<Value> {
    caller.require(Permission::Inference)?;
    let model_id = require_model_id(&input.model_id)?;

    let output = metered(
        &state,
        &caller,
        model_id,
        "huggingface.inference",
        INFERENCE_COST,
        state.hub.inference(model_id, &input.inputs),
    )
    .await?;

    Ok(Rpc(output))
}

pub async fn generate_text(
    State(state): State<AppState>,
    caller: Caller,
    Input(input): Input<GenerateTextInput>,
) -> ApiResult<Value> {
    caller.require(Permission::Inference)?;
    let model_id = require_model_id(&input.model_id)?;
    if input.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }

    let max_new_tokens = input.max_new_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS);
    if max_new_tokens == 0 {
        return Err(ApiError::bad_request("maxNewTokens must be positive"));
    }

    let mut options = TextGenerationOptions {
        max_new_tokens,
        ..Default::default()
    };
    if let Some(temperature) = input.temperature {
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(ApiError::bad_request("temperature must be a non-negative number"));
        }
        options.temperature = temperature;
    }

    let cost = generation_cost(&input.prompt, max_new_tokens);
    let output = metered(
        &state,
        &caller,
        model_id,
        "huggingface.generateText",
        cost,
        state.hub.generate_text(model_id, &input.prompt, &options),
    )
    .await?;

    Ok(Rpc(output))
}

fn require_model_id(model_id: &str) -> Result<&str, ApiError> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return Err(ApiError::bad_request("modelId is required"));
    }
    Ok(model_id)
}

/// Roughly four characters per prompt token, plus the generation budget
fn generation_cost(prompt: &str, max_new_tokens: u32) -> i64 {
    let prompt_tokens = i64::try_from(prompt.chars().count().div_ceil(4)).unwrap_or(i64::MAX);
    prompt_tokens.saturating_add(i64::from(max_new_tokens))
}

/// Reserve `cost` tokens, run `call`, then record usage or refund
async fn metered<F>(
    state: &AppState,
    caller: &Caller,
    model_id: &str,
    endpoint: &str,
    cost: i64,
    call: F,
) -> Result<Value, ApiError>
where
    F: Future<Output = cortex_core::Result<Value>>,
{
    let user_id = caller.user.id;
    let Some(balance) = state
        .store
        .try_debit_tokens(user_id, cost, MINIMUM_BALANCE)
        .await?
    else {
        tracing::info!(user_id, cost, endpoint, "Rejected call, insufficient balance");
        return Err(insufficient_balance(state, &caller.user, cost).await.into());
    };

    let output = match call.await {
        Ok(output) => output,
        Err(err) => {
            if let Err(refund_err) = state.store.refund_tokens(user_id, cost).await {
                tracing::error!(user_id, cost, error = %refund_err, "Failed to refund reservation");
            }
            tracing::warn!(user_id, model = %model_id, endpoint, error = %err, "Metered call failed, tokens refunded");
            return Err(err.into());
        }
    };

    let entry = NewUsageLog {
        user_id,
        api_key_id: caller.api_key_id().map(str::to_string),
        model: model_id.to_string(),
        tokens_used: cost,
        endpoint: Some(endpoint.to_string()),
    };
    if let Err(err) = state.store.append_usage(&entry).await {
        tracing::error!(user_id, error = %err, "Failed to append usage log");
    }
    tracing::info!(user_id, model = %model_id, endpoint, cost, balance, "Metered call completed");

    alert_low_balance(state, &caller.user, balance.saturating_add(cost), balance).await;
    Ok(output)
}

/// Rejection for a failed debit, reporting the balance as it stands now
async fn insufficient_balance(state: &AppState, user: &User, cost: i64) -> CoreError {
    let available = match state.store.get_user(user.id).await {
        Ok(Some(current)) => current.token_balance,
        Ok(None) => 0,
        Err(err) => {
            tracing::warn!(user_id = user.id, error = %err, "Failed to re-read balance");
            user.token_balance
        }
    };
    CoreError::InsufficientBalance {
        required: cost.max(MINIMUM_BALANCE),
        available,
    }
}

/// Send credits_low once, when a debit crosses below the threshold
async fn alert_low_balance(state: &AppState, user: &User, before: i64, after: i64) {
    let threshold = state.config.low_balance_threshold;
    if before < threshold || after >= threshold {
        return;
    }

    let Some(address) = user.email.as_deref() else {
        tracing::warn!(user_id = user.id, "No e-mail address for low balance alert");
        return;
    };

    let message = EmailMessage::CreditsLow {
        name: user.display_name(),
        remaining: catalog::format_token_quota(after),
        plan: catalog::plan_for_tier(user.subscription_plan).name.to_string(),
    };
    let recipient = EmailRecipient {
        email: address.to_string(),
        name: user.name.clone(),
    };

    match state.mailer.send(&recipient, &email::render(&message), None).await {
        Ok(()) => tracing::info!(user_id = user.id, remaining = after, "Low balance alert sent"),
        Err(err) => tracing::warn!(user_id = user.id, error = %err, "Failed to send low balance alert"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use cortex_core::{MemoryStore, UserProfile};
    use cortex_payments::RecordingEmailSender;
    use cortex_runtime::{HuggingFaceClient, HuggingFaceConfig};

    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_insufficient_balance_reports_current_balance() {
        let store = Arc::new(MemoryStore::new());
        let profile = UserProfile {
            open_id: "u1".into(),
            ..Default::default()
        };
        let mut stale = User::new(1, &profile, Utc::now());
        stale.token_balance = 5_000;
        let mut current = stale.clone();
        current.token_balance = 80;
        store.insert_user(current).await;

        let hub = Arc::new(HuggingFaceClient::from_config(HuggingFaceConfig::default()).unwrap());
        let state = AppState::new(store, hub, Arc::new(RecordingEmailSender::new()), AppConfig::default());

        let err = insufficient_balance(&state, &stale, 300).await;
        assert!(matches!(
            err,
            CoreError::InsufficientBalance {
                required: 300,
                available: 80
            }
        ));
    }

    #[test]
    fn test_generation_cost() {
        assert_eq!(generation_cost("Hello world!", 64), 3 + 64);
        assert_eq!(generation_cost("Hello", 256), 2 + 256);
        assert_eq!(generation_cost("", 10), 10);
    }

    #[test]
    fn test_list_limit_bounds() {
        let input = |limit| ListInput {
            author: None,
            search: Some("  ".into()),
            limit,
        };

        assert!(input(0).query().is_err());
        assert!(input(101).query().is_err());

        let query = input(100).query().unwrap();
        assert_eq!(query.limit, Some(100));
        assert!(query.search.is_none());
    }
}
