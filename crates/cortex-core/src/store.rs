//! Storage Ports
//!
//! Persistence is split into small traits, one per table family, so callers
//! depend only on what they touch. `Store` bundles them for application state.
//!
//! Every method that mutates a balance is a single atomic operation in each
//! implementation: the in-memory store holds one write lock for the whole
//! read-modify-write, the SQLite store issues one conditional `UPDATE`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{
    ApiKey, NewUsageLog, Session, SubscriptionUpdate, UsageLog, User, UserId, UserProfile,
};

/// Users and their subscription/token state
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    async fn get_user_by_open_id(&self, open_id: &str) -> Result<Option<User>>;

    async fn find_user_by_subscription_id(&self, subscription_id: &str) -> Result<Option<User>>;

    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<User>>;

    /// Insert or refresh a user from identity claims; touches `last_signed_in`
    async fn upsert_user(&self, profile: &UserProfile) -> Result<User>;

    /// Apply a partial subscription update. Returns false if the user does not exist.
    async fn update_subscription(&self, id: UserId, update: &SubscriptionUpdate) -> Result<bool>;

    /// Apply a partial update to every user holding `subscription_id`. Returns rows touched.
    async fn update_subscription_by_subscription_id(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<u64>;

    /// Add tokens. Returns the new balance, or `None` if the user does not exist.
    async fn credit_tokens(&self, id: UserId, amount: i64) -> Result<Option<i64>>;

    /// Atomically subtract `amount` from the balance and add it to the monthly
    /// usage, only if the balance is at least `max(amount, minimum)`.
    /// Returns the new balance, or `None` when the balance is insufficient or
    /// the user does not exist.
    async fn try_debit_tokens(&self, id: UserId, amount: i64, minimum: i64) -> Result<Option<i64>>;

    /// Undo a debit whose call did not go through
    async fn refund_tokens(&self, id: UserId, amount: i64) -> Result<()>;

    /// Start a new billing cycle for the usage counter
    async fn reset_monthly_usage(&self, id: UserId) -> Result<()>;
}

/// API keys, always scoped by owner
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: &ApiKey) -> Result<()>;

    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>>;

    /// Candidate keys for lookup-then-verify authentication
    async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>>;

    /// Set `is_active = false`. Returns false if no key matched `(key_id, user_id)`.
    async fn revoke_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool>;

    /// Remove the row. Returns false if no key matched `(key_id, user_id)`.
    async fn delete_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool>;

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Append-only usage logs
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append_usage(&self, entry: &NewUsageLog) -> Result<UsageLog>;

    async fn count_usage_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<i64>;
}

/// Login sessions keyed by token hash
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>>;

    async fn delete_session(&self, token_hash: &str) -> Result<()>;
}

/// Processed webhook events, for at-most-once handling
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Record `event_id` if absent. Returns true when this call claimed it.
    /// Entries older than `retention` are purged first.
    async fn claim_event(&self, event_id: &str, event_type: &str, retention: Duration) -> Result<bool>;

    /// Forget a claim so a redelivery can be processed again
    async fn release_event(&self, event_id: &str) -> Result<()>;
}

/// Persisted payment-processor price ids
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_price_id(&self, cache_key: &str) -> Result<Option<String>>;

    /// Persist a price id unless one exists. Returns the id that is stored.
    async fn put_price_id(&self, cache_key: &str, price_id: &str) -> Result<String>;
}

/// Everything the application needs from persistence
pub trait Store: UserStore + ApiKeyStore + UsageStore + SessionStore + EventLedger + PriceStore {}

impl<T> Store for T where
    T: UserStore + ApiKeyStore + UsageStore + SessionStore + EventLedger + PriceStore
{
}

#[derive(Default)]
struct MemoryState {
    next_user_id: UserId,
    next_usage_id: i64,
    users: HashMap<UserId, User>,
    api_keys: HashMap<String, ApiKey>,
    usage: Vec<UsageLog>,
    sessions: HashMap<String, Session>,
    events: HashMap<String, DateTime<Utc>>,
    prices: HashMap<String, String>,
}

/// In-memory store (for development and tests)
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed user, keeping id allocation ahead of it
    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.next_user_id = state.next_user_id.max(user.id);
        state.users.insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_open_id(&self, open_id: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.open_id == open_id).cloned())
    }

    async fn find_user_by_subscription_id(&self, subscription_id: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.stripe_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<User> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        if let Some(user) = state.users.values_mut().find(|u| u.open_id == profile.open_id) {
            if profile.name.is_some() {
                user.name.clone_from(&profile.name);
            }
            if profile.email.is_some() {
                user.email.clone_from(&profile.email);
            }
            if profile.login_method.is_some() {
                user.login_method.clone_from(&profile.login_method);
            }
            user.last_signed_in = now;
            user.updated_at = now;
            return Ok(user.clone());
        }

        state.next_user_id += 1;
        let user = User::new(state.next_user_id, profile, now);
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_subscription(&self, id: UserId, update: &SubscriptionUpdate) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(&id).is_some_and(|user| {
            update.apply(user);
            user.updated_at = Utc::now();
            true
        }))
    }

    async fn update_subscription_by_subscription_id(
        &self,
        subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for user in state
            .users
            .values_mut()
            .filter(|u| u.stripe_subscription_id.as_deref() == Some(subscription_id))
        {
            update.apply(user);
            user.updated_at = Utc::now();
            touched += 1;
        }
        Ok(touched)
    }

    async fn credit_tokens(&self, id: UserId, amount: i64) -> Result<Option<i64>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.token_balance += amount;
            user.token_balance
        }))
    }

    async fn try_debit_tokens(&self, id: UserId, amount: i64, minimum: i64) -> Result<Option<i64>> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        if user.token_balance < amount.max(minimum) {
            return Ok(None);
        }
        user.token_balance -= amount;
        user.tokens_used_this_month += amount;
        Ok(Some(user.token_balance))
    }

    async fn refund_tokens(&self, id: UserId, amount: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&id) {
            user.token_balance += amount;
            user.tokens_used_this_month = (user.tokens_used_this_month - amount).max(0);
        }
        Ok(())
    }

    async fn reset_monthly_usage(&self, id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&id) {
            user.tokens_used_this_month = 0;
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_api_key(&self, key: &ApiKey) -> Result<()> {
        let mut state = self.state.write().await;
        state.api_keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<ApiKey> = state
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        let state = self.state.read().await;
        Ok(state
            .api_keys
            .values()
            .filter(|k| k.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn revoke_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(match state.api_keys.get_mut(key_id) {
            Some(key) if key.user_id == user_id => {
                key.is_active = false;
                true
            }
            _ => false,
        })
    }

    async fn delete_api_key(&self, user_id: UserId, key_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.api_keys.get(key_id).is_some_and(|k| k.user_id == user_id) {
            state.api_keys.remove(key_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(key) = state.api_keys.get_mut(key_id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn append_usage(&self, entry: &NewUsageLog) -> Result<UsageLog> {
        let mut state = self.state.write().await;
        state.next_usage_id += 1;
        let log = UsageLog {
            id: state.next_usage_id,
            user_id: entry.user_id,
            api_key_id: entry.api_key_id.clone(),
            model: entry.model.clone(),
            tokens_used: entry.tokens_used,
            endpoint: entry.endpoint.clone(),
            created_at: Utc::now(),
        };
        state.usage.push(log.clone());
        Ok(log)
    }

    async fn count_usage_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<i64> {
        let state = self.state.read().await;
        let count = state
            .usage
            .iter()
            .filter(|log| log.user_id == user_id && log.created_at >= since)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<Session>> {
        Ok(self.state.read().await.sessions.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.state.write().await.sessions.remove(token_hash);
        Ok(())
    }
}

#[async_trait]
impl EventLedger for MemoryStore {
    async fn claim_event(&self, event_id: &str, _event_type: &str, retention: Duration) -> Result<bool> {
        let now = Utc::now();
        let cutoff = now - retention;
        let mut state = self.state.write().await;
        let before = state.events.len();
        state.events.retain(|_, processed_at| *processed_at >= cutoff);
        let pruned = before - state.events.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired webhook events");
        }

        if state.events.contains_key(event_id) {
            return Ok(false);
        }
        state.events.insert(event_id.to_string(), now);
        Ok(true)
    }

    async fn release_event(&self, event_id: &str) -> Result<()> {
        self.state.write().await.events.remove(event_id);
        Ok(())
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn get_price_id(&self, cache_key: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.prices.get(cache_key).cloned())
    }

    async fn put_price_id(&self, cache_key: &str, price_id: &str) -> Result<String> {
        let mut state = self.state.write().await;
        let stored = state
            .prices
            .entry(cache_key.to_string())
            .or_insert_with(|| price_id.to_string())
            .clone();
        if stored != price_id {
            tracing::debug!(cache_key, kept = %stored, discarded = price_id, "Price id already registered");
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Permission, PlanTier, DEFAULT_TOKEN_BALANCE};

    fn profile(open_id: &str) -> UserProfile {
        UserProfile {
            open_id: open_id.into(),
            name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            login_method: Some("github".into()),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_open_id() {
        let store = MemoryStore::new();
        let first = store.upsert_user(&profile("oid-1")).await.unwrap();
        let second = store.upsert_user(&profile("oid-1")).await.unwrap();
        let other = store.upsert_user(&profile("oid-2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(second.token_balance, DEFAULT_TOKEN_BALANCE);
    }

    #[tokio::test]
    async fn test_conditional_debit() {
        let store = MemoryStore::new();
        let user = store.upsert_user(&profile("oid-1")).await.unwrap();

        let balance = store.try_debit_tokens(user.id, 400, 100).await.unwrap();
        assert_eq!(balance, Some(DEFAULT_TOKEN_BALANCE - 400));

        // More than the balance is refused and leaves state untouched
        let refused = store
            .try_debit_tokens(user.id, DEFAULT_TOKEN_BALANCE, 100)
            .await
            .unwrap();
        assert_eq!(refused, None);

        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.token_balance, DEFAULT_TOKEN_BALANCE - 400);
        assert_eq!(user.tokens_used_this_month, 400);

        store.refund_tokens(user.id, 400).await.unwrap();
        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.token_balance, DEFAULT_TOKEN_BALANCE);
        assert_eq!(user.tokens_used_this_month, 0);
    }

    #[tokio::test]
    async fn test_debit_respects_minimum() {
        let store = MemoryStore::new();
        let user = store.upsert_user(&profile("oid-1")).await.unwrap();
        store.credit_tokens(user.id, -(DEFAULT_TOKEN_BALANCE - 50)).await.unwrap();

        assert_eq!(store.try_debit_tokens(user.id, 10, 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscription_lookups() {
        let store = MemoryStore::new();
        let user = store.upsert_user(&profile("oid-1")).await.unwrap();
        store
            .update_subscription(
                user.id,
                &SubscriptionUpdate {
                    customer_id: Some("cus_1".into()),
                    subscription_id: Some("sub_1".into()),
                    plan: Some(PlanTier::Pro),
                    status: Some("active".into()),
                },
            )
            .await
            .unwrap();

        let by_sub = store.find_user_by_subscription_id("sub_1").await.unwrap().unwrap();
        let by_cus = store.find_user_by_customer_id("cus_1").await.unwrap().unwrap();
        assert_eq!(by_sub.id, user.id);
        assert_eq!(by_cus.subscription_plan, PlanTier::Pro);

        let touched = store
            .update_subscription_by_subscription_id("sub_missing", &SubscriptionUpdate::default())
            .await
            .unwrap();
        assert_eq!(touched, 0);
    }

    #[tokio::test]
    async fn test_api_keys_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let key = ApiKey {
            id: "key-1".into(),
            user_id: 1,
            name: "ci".into(),
            key_hash: "hash".into(),
            key_prefix: "oc_1234567".into(),
            permissions: vec![Permission::Read],
            created_at: now,
            expires_at: None,
            last_used_at: None,
            is_active: true,
        };
        store.insert_api_key(&key).await.unwrap();

        assert!(!store.revoke_api_key(2, "key-1").await.unwrap());
        assert!(!store.delete_api_key(2, "key-1").await.unwrap());
        assert!(store.revoke_api_key(1, "key-1").await.unwrap());

        let keys = store.list_api_keys(1).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].is_active);

        assert!(store.delete_api_key(1, "key-1").await.unwrap());
        assert!(store.list_api_keys(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_claims() {
        let store = MemoryStore::new();
        let retention = Duration::days(30);

        assert!(store.claim_event("evt_1", "invoice.paid", retention).await.unwrap());
        assert!(!store.claim_event("evt_1", "invoice.paid", retention).await.unwrap());

        store.release_event("evt_1").await.unwrap();
        assert!(store.claim_event("evt_1", "invoice.paid", retention).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_price_id_wins() {
        let store = MemoryStore::new();
        assert_eq!(store.put_price_id("pro-monthly", "price_a").await.unwrap(), "price_a");
        assert_eq!(store.put_price_id("pro-monthly", "price_b").await.unwrap(), "price_a");
        assert_eq!(
            store.get_price_id("pro-monthly").await.unwrap().as_deref(),
            Some("price_a")
        );
    }
}
