//! Request Authentication
//!
//! Credentials arrive as `Authorization: Bearer <token>` or in the
//! `oc_session` cookie. `sess_` tokens resolve a login session and carry every
//! permission; `oc_` tokens resolve an API key and carry only its permissions.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use chrono::Utc;
use cortex_core::{
    secret::{self, API_KEY_PREFIX, SESSION_TOKEN_PREFIX},
    ApiKey, ApiKeyStore, Permission, SessionStore, User, UserProfile, UserStore,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "oc_session";

/// How the caller proved its identity
#[derive(Clone, Debug)]
pub enum Credential {
    Session { token_hash: String },
    ApiKey(Box<ApiKey>),
}

/// Authenticated caller with a freshly loaded user row
#[derive(Clone, Debug)]
pub struct Caller {
    pub user: User,
    pub credential: Credential,
}

impl Caller {
    /// Sessions hold every permission; API keys only the ones granted
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        match &self.credential {
            Credential::Session { .. } => Ok(()),
            Credential::ApiKey(key) if key.has_permission(permission) => Ok(()),
            Credential::ApiKey(_) => Err(ApiError::forbidden(format!(
                "API key lacks the '{}' permission",
                permission.as_str()
            ))),
        }
    }

    /// Token hash of the login session, rejecting API-key callers
    pub fn require_session(&self) -> Result<&str, ApiError> {
        match &self.credential {
            Credential::Session { token_hash } => Ok(token_hash),
            Credential::ApiKey(_) => Err(ApiError::forbidden(
                "This operation requires a signed-in session",
            )),
        }
    }

    pub fn api_key_id(&self) -> Option<&str> {
        match &self.credential {
            Credential::ApiKey(key) => Some(&key.id),
            Credential::Session { .. } => None,
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = presented_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Please sign in to continue."))?;
        authenticate(state, &token).await
    }
}

/// Caller if the request carries a valid credential
#[derive(Clone, Debug)]
pub struct MaybeCaller(pub Option<Caller>);

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = presented_token(&parts.headers) else {
            return Ok(Self(None));
        };

        match authenticate(state, &token).await {
            Ok(caller) => Ok(Self(Some(caller))),
            Err(err) if err.status == StatusCode::UNAUTHORIZED => Ok(Self(None)),
            Err(err) => Err(err),
        }
    }
}

/// Bearer token, else the session cookie
pub fn presented_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Resolve a token to a caller
pub async fn authenticate(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    if token.starts_with(SESSION_TOKEN_PREFIX) {
        authenticate_session(state, token).await
    } else if token.starts_with(API_KEY_PREFIX) {
        authenticate_api_key(state, token).await
    } else {
        Err(ApiError::unauthorized("Unrecognized credential"))
    }
}

async fn authenticate_session(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    let token_hash = secret::hash_secret(token);
    let session = state
        .store
        .find_session(&token_hash)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session not found"))?;

    if session.is_expired(Utc::now()) {
        state.store.delete_session(&token_hash).await?;
        tracing::debug!(user_id = session.user_id, "Expired session removed");
        return Err(ApiError::unauthorized("Session expired"));
    }

    let user = state
        .store
        .get_user(session.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session user no longer exists"))?;

    // An upsert with only the open id refreshes last_signed_in
    let user = state
        .store
        .upsert_user(&UserProfile {
            open_id: user.open_id,
            ..Default::default()
        })
        .await?;

    Ok(Caller {
        user,
        credential: Credential::Session { token_hash },
    })
}

async fn authenticate_api_key(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    let prefix = secret::display_prefix(token);
    let key = state
        .store
        .find_api_keys_by_prefix(&prefix)
        .await?
        .into_iter()
        .find(|key| secret::verify_secret(token, &key.key_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

    let now = Utc::now();
    if !key.is_usable(now) {
        tracing::info!(key_id = %key.id, user_id = key.user_id, "Rejected revoked or expired API key");
        return Err(ApiError::unauthorized("API key is revoked or expired"));
    }

    let user = state
        .store
        .get_user(key.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("API key owner no longer exists"))?;

    state.store.touch_api_key(&key.id, now).await?;

    Ok(Caller {
        user,
        credential: Credential::ApiKey(Box::new(key)),
    })
}

/// `Set-Cookie` value for a new session
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that clears the session
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
