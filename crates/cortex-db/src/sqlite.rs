//! SQLite Store
//!
//! Every balance mutation is one SQL statement, so concurrent requests for
//! the same user cannot interleave between a balance check and its write.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use cortex_core::{
    ApiKey, ApiKeyStore, CoreError, EventLedger, NewUsageLog, PriceStore, Result, Session,
    SessionStore, SubscriptionUpdate, UsageLog, UsageStore, User, UserId, UserProfile, UserStore,
};

use crate::rows::{ApiKeyRow, SessionRow, UsageLogRow, UserRow};

fn storage(err: sqlx::Error) -> CoreError {
    CoreError::Storage(err.to_string())
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (creating the file if needed) and apply migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(storage)?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage)?;

        // Each connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CoreError::Storage(format!("migration failed: {e}")))?;

        tracing::info!("SQLite store ready");
        Ok(Self { pool })
    }

    /// Underlying connection pool
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check the database answers
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_open_id(&self, open_id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE open_id = ?")
            .bind(open_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_subscription_id(&self, subscription_id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE stripe_subscription_id = ? LIMIT 1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE stripe_customer_id = ? LIMIT 1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(row.map(User::from))
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<User> {
        let now = Utc::now();
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (open_id, name, email, login_method, created_at, updated_at, last_signed_in)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (open_id) DO UPDATE SET
                name = COALESCE(excluded.name, users.name),
                email = COALESCE(excluded.email, users.email),
                login_method = COALESCE(excluded.login_method, users.login_method),
                updated_at = excluded.updated_at,
                last_signed_in = excluded.last_signed_in
             RETURNING *",
        )
        .bind(&profile.open_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.login_method)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.into())
    }

    async fn update_subscription(&self, id: UserId, update: &SubscriptionUpdate) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET
                stripe_customer_id = COALESCE(?, stripe_customer_id),
                stripe_subscription_id = COALESCE(?, stripe_subscription_id),
                subscription_plan = COALESCE(?, subscription_plan),
                subscription_status = COALESCE(?, subscription_status),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(update.customer_id.as_deref())
        .bind(update.subscription_id.as_deref())
        .bind(update.plan.map(|p| p.as_str()))
        .bind(update.status.as_deref())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_subscription_by_subscription_id(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE users SET
                stripe_customer_id = COALESCE(?, stripe_customer_id),
                stripe_subscription_id = COALESCE(?, stripe_subscription_id),
                subscription_plan = COALESCE(?, subscription_plan),
                subscription_status = COALESCE(?, subscription_status),
                updated_at = ?
             WHERE stripe_subscription_id = ?",
        )
        .bind(update.customer_id.as_deref())
        .bind(update.subscription_id.as_deref())
        .bind(update.plan.map(|p| p.as_str()))
        .bind(update.status.as_deref())
        .bind(Utc::now())
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn credit_tokens(&self, id: UserId, amount: i64) -> Result<Option<i64>> {
        sqlx::query_scalar(
            "UPDATE users SET token_balance = token_balance + ?, updated_at = ?
             WHERE id = ?
             RETURNING token_balance",
        )
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)
    }

    async fn try_debit_tokens(&self, id: UserId, amount: i64, minimum: i64) -> Result<Option<i64>> {
        sqlx::query_scalar(
            "UPDATE users SET
                token_balance = token_balance - ?,
                tokens_used_this_month = tokens_used_this_month + ?,
                updated_at = ?
             WHERE id = ? AND token_balance >= ?
             RETURNING token_balance",
        )
        .bind(amount)
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .bind(amount.max(minimum))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)
    }

    async fn refund_tokens(&self, id: UserId, amount: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET
                token_balance = token_balance + ?,
                tokens_used_this_month = MAX(tokens_used_this_month - ?, 0),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(amount)
        .bind(amount)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn reset_monthly_usage(&self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET tokens_used_this_month = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        let permissions = serde_json::to_string(&key.permissions)?;
        sqlx::query(
            "INSERT INTO api_keys
                (id, user_id, name, key_hash, key_prefix, permissions, created_at, expires_at, last_used_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.id)
        .bind(key.user_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(permissions)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.is_active)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>> {
        let rows: Vec<ApiKeyRow> =
            sqlx::query_as("SELECT * FROM api_keys WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        let rows: Vec<ApiKeyRow> = sqlx::query_as("SELECT * FROM api_keys WHERE key_prefix = ?")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn revoke_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ? AND user_id = ?")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn append_usage(&self, entry: &NewUsageLog) -> Result<UsageLog> {
        let row: UsageLogRow = sqlx::query_as(
            "INSERT INTO usage_logs (user_id, api_key_id, model, tokens_used, endpoint, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(entry.user_id)
        .bind(&entry.api_key_id)
        .bind(&entry.model)
        .bind(entry.tokens_used)
        .bind(&entry.endpoint)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.into())
    }

    async fn count_usage_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM usage_logs WHERE user_id = ? AND created_at >= ?")
            .bind(user_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&session.token_hash)
            .bind(session.user_id)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(Session::from))
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl EventLedger for SqliteStore {
    async fn claim_event(&self, event_id: &str, event_type: &str, retention: Duration) -> Result<bool> {
        let now = Utc::now();

        sqlx::query("DELETE FROM processed_events WHERE processed_at < ?")
            .bind(now - retention)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, event_type, processed_at) VALUES (?, ?, ?)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_event(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn get_price_id(&self, cache_key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT price_id FROM processor_prices WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }

    async fn put_price_id(&self, cache_key: &str, price_id: &str) -> Result<String> {
        sqlx::query(
            "INSERT INTO processor_prices (cache_key, price_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT (cache_key) DO NOTHING",
        )
        .bind(cache_key)
        .bind(price_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query_scalar("SELECT price_id FROM processor_prices WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)
    }
}
