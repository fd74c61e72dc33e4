//! apiKeys.* procedures
//!
//! Keys are managed from a signed-in session only. The secret is returned by
//! `create` and never again; listings carry the display prefix.

use axum::extract::State;
use chrono::{DateTime, Duration, Utc};
use cortex_core::{secret, ApiKey, ApiKeyStore, Permission};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult, Rpc};
use crate::input::Input;
use crate::state::AppState;

const MAX_NAME_CHARS: usize = 100;

fn default_permissions() -> Vec<Permission> {
    vec![Permission::Read]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyInput {
    pub name: String,
    #[serde(default = "default_permissions")]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyIdInput {
    pub key_id: String,
}

/// A freshly created key, the only response that carries the secret
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedKey {
    pub id: String,
    pub name: String,
    pub key: String,
    pub key_prefix: String,
    pub permissions: Vec<Permission>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn list(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<ApiKey>> {
    caller.require_session()?;
    Ok(Rpc(state.store.list_api_keys(caller.user.id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Input(input): Input<CreateKeyInput>,
) -> ApiResult<CreatedKey> {
    caller.require_session()?;

    let name = input.name.trim();
    let name_len = name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_CHARS {
        return Err(ApiError::bad_request(format!(
            "Key name must be 1 to {MAX_NAME_CHARS} characters"
        )));
    }

    let mut permissions = input.permissions;
    permissions.sort_by_key(|p| p.as_str());
    permissions.dedup();
    if permissions.is_empty() {
        return Err(ApiError::bad_request("At least one permission is required"));
    }

    let now = Utc::now();
    let expires_at = match input.expires_in_days {
        Some(days) if days <= 0 => {
            return Err(ApiError::bad_request("expiresInDays must be positive"));
        }
        Some(days) => Some(
            Duration::try_days(days)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| ApiError::bad_request("expiresInDays is too large"))?,
        ),
        None => None,
    };

    let generated = secret::generate_api_key();
    let key = ApiKey {
        id: Uuid::new_v4().to_string(),
        user_id: caller.user.id,
        name: name.to_string(),
        key_hash: generated.hash,
        key_prefix: generated.prefix,
        permissions,
        created_at: now,
        expires_at,
        last_used_at: None,
        is_active: true,
    };
    state.store.insert_api_key(&key).await?;
    tracing::info!(user_id = key.user_id, key_id = %key.id, prefix = %key.key_prefix, "API key created");

    Ok(Rpc(CreatedKey {
        id: key.id,
        name: key.name,
        key: generated.secret,
        key_prefix: key.key_prefix,
        permissions: key.permissions,
        expires_at: key.expires_at,
        created_at: key.created_at,
    }))
}

/// Deactivate a key; the row stays for auditing
pub async fn revoke(
    State(state): State<AppState>,
    caller: Caller,
    Input(input): Input<KeyIdInput>,
) -> ApiResult<Value> {
    caller.require_session()?;
    if !state.store.revoke_api_key(caller.user.id, &input.key_id).await? {
        return Err(ApiError::not_found("API key not found"));
    }
    tracing::info!(user_id = caller.user.id, key_id = %input.key_id, "API key revoked");
    Ok(Rpc(json!({ "success": true })))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Input(input): Input<KeyIdInput>,
) -> ApiResult<Value> {
    caller.require_session()?;
    if !state.store.delete_api_key(caller.user.id, &input.key_id).await? {
        return Err(ApiError::not_found("API key not found"));
    }
    tracing::info!(user_id = caller.user.id, key_id = %input.key_id, "API key deleted");
    Ok(Rpc(json!({ "success": true })))
}
