//! auth.* procedures

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use cortex_core::{secret, Session, SessionStore, User, UserProfile, UserStore};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{clear_session_cookie, session_cookie, Caller, MaybeCaller};
use crate::error::{ApiError, ApiResult, Rpc};
use crate::input::Input;
use crate::state::AppState;

/// Header carrying the identity provider's shared secret
pub const ISSUER_SECRET_HEADER: &str = "x-issuer-secret";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionInput {
    pub open_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub login_method: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    /// Shown once; only its hash is stored
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Current user, or null
pub async fn me(MaybeCaller(caller): MaybeCaller) -> ApiResult<Option<User>> {
    Ok(Rpc(caller.map(|c| c.user)))
}

/// End the current session
pub async fn logout(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = caller.require_session()?;
    state.store.delete_session(token_hash).await?;
    tracing::info!(user_id = caller.user.id, "User logged out");

    Ok((
        [(header::SET_COOKIE, clear_session_cookie())],
        Rpc(json!({ "success": true })),
    ))
}

/// Upsert a user from identity claims and issue a session token
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Input(input): Input<CreateSessionInput>,
) -> Result<impl IntoResponse, ApiError> {
    let expected = state
        .config
        .auth_issuer_secret
        .as_deref()
        .ok_or_else(|| ApiError::service_unavailable("Session issuing is not configured"))?;
    let presented = headers
        .get(ISSUER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secret::constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        return Err(ApiError::unauthorized("Invalid issuer secret"));
    }

    let open_id = input.open_id.trim();
    if open_id.is_empty() {
        return Err(ApiError::bad_request("openId is required"));
    }

    let user = state
        .store
        .upsert_user(&UserProfile {
            open_id: open_id.to_string(),
            name: input.name,
            email: input.email,
            login_method: input.login_method,
        })
        .await?;

    let generated = secret::generate_session_token();
    let now = Utc::now();
    let ttl = Duration::hours(state.config.session_ttl_hours);
    let session = Session {
        token_hash: generated.hash,
        user_id: user.id,
        created_at: now,
        expires_at: now + ttl,
    };
    state.store.create_session(&session).await?;
    tracing::info!(user_id = user.id, "Session issued");

    let cookie = session_cookie(&generated.secret, ttl.num_seconds());
    let issued = IssuedSession {
        token: generated.secret,
        expires_at: session.expires_at,
        user,
    };

    Ok(([(header::SET_COOKIE, cookie)], Rpc(issued)))
}
