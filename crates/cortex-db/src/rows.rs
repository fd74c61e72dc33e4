//! Row types and their conversion into domain types

use chrono::{DateTime, Utc};
use cortex_core::{ApiKey, Permission, PlanTier, Role, Session, UsageLog, User};

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    id: i64,
    open_id: String,
    name: Option<String>,
    email: Option<String>,
    login_method: Option<String>,
    role: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    subscription_plan: String,
    subscription_status: String,
    token_balance: i64,
    tokens_used_this_month: i64,
    hugging_face_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_signed_in: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let subscription_plan = PlanTier::from_id(&row.subscription_plan).unwrap_or_else(|| {
            tracing::warn!(
                user_id = row.id,
                plan = %row.subscription_plan,
                "Unknown plan stored for user, treating as free"
            );
            PlanTier::Free
        });

        Self {
            id: row.id,
            open_id: row.open_id,
            name: row.name,
            email: row.email,
            login_method: row.login_method,
            role: Role::from_id(&row.role),
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            subscription_plan,
            subscription_status: row.subscription_status,
            token_balance: row.token_balance,
            tokens_used_this_month: row.tokens_used_this_month,
            hugging_face_token: row.hugging_face_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_signed_in: row.last_signed_in,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ApiKeyRow {
    id: String,
    user_id: i64,
    name: String,
    key_hash: String,
    key_prefix: String,
    permissions: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        let permissions: Vec<Permission> = serde_json::from_str(&row.permissions).unwrap_or_else(|e| {
            tracing::warn!(key_id = %row.id, error = %e, "Unreadable permissions, granting none");
            Vec::new()
        });

        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            permissions,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            is_active: row.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct UsageLogRow {
    id: i64,
    user_id: i64,
    api_key_id: Option<String>,
    model: String,
    tokens_used: i64,
    endpoint: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UsageLogRow> for UsageLog {
    fn from(row: UsageLogRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            api_key_id: row.api_key_id,
            model: row.model,
            tokens_used: row.tokens_used,
            endpoint: row.endpoint,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SessionRow {
    token_hash: String,
    user_id: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            token_hash: row.token_hash,
            user_id: row.user_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
