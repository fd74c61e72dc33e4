//! Domain Model
//!
//! Users with their subscription and token state, API keys, usage logs and
//! login sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Surrogate user key
pub type UserId = i64;

/// Tokens granted to a freshly created account
pub const DEFAULT_TOKEN_BALANCE: i64 = 10_000;

/// Subscription status of an account that never subscribed
pub const STATUS_INACTIVE: &str = "inactive";

/// Subscription status written when a subscription is deleted
pub const STATUS_CANCELED: &str = "canceled";

/// Subscription status written when checkout completes
pub const STATUS_ACTIVE: &str = "active";

/// Account role
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub fn from_id(s: &str) -> Self {
        if s.eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::User
        }
    }
}

/// Subscription plan tiers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Business,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [Self; 4] = [Self::Free, Self::Pro, Self::Business, Self::Enterprise];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse a catalog plan id. Unknown ids yield `None`.
    pub fn from_id(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account with its subscription and token state
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,

    /// External auth identifier, unique per user
    pub open_id: String,

    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<String>,
    pub role: Role,

    /// Stripe customer (`cus_...`)
    pub stripe_customer_id: Option<String>,

    /// Stripe subscription (`sub_...`)
    pub stripe_subscription_id: Option<String>,

    pub subscription_plan: PlanTier,

    /// Mirrors the Stripe subscription status string
    pub subscription_status: String,

    pub token_balance: i64,

    /// Monotonic within a billing cycle
    pub tokens_used_this_month: i64,

    /// Never sent to clients
    #[serde(skip_serializing, default)]
    pub hugging_face_token: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_signed_in: DateTime<Utc>,
}

impl User {
    /// Create a fresh account on the free plan
    pub fn new(id: UserId, profile: &UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            open_id: profile.open_id.clone(),
            name: profile.name.clone(),
            email: profile.email.clone(),
            login_method: profile.login_method.clone(),
            role: Role::User,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            subscription_plan: PlanTier::Free,
            subscription_status: STATUS_INACTIVE.to_string(),
            token_balance: DEFAULT_TOKEN_BALANCE,
            tokens_used_this_month: 0,
            hugging_face_token: None,
            created_at: now,
            updated_at: now,
            last_signed_in: now,
        }
    }

    /// Name used to greet the user in e-mails
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "there".to_string())
    }
}

/// Identity claims from the auth provider, used to upsert a user
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub open_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub login_method: Option<String>,
}

/// Partial update of a user's subscription columns. `None` leaves a column unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub plan: Option<PlanTier>,
    pub status: Option<String>,
}

impl SubscriptionUpdate {
    pub fn apply(&self, user: &mut User) {
        if let Some(customer_id) = &self.customer_id {
            user.stripe_customer_id = Some(customer_id.clone());
        }
        if let Some(subscription_id) = &self.subscription_id {
            user.stripe_subscription_id = Some(subscription_id.clone());
        }
        if let Some(plan) = self.plan {
            user.subscription_plan = plan;
        }
        if let Some(status) = &self.status {
            user.subscription_status.clone_from(status);
        }
    }
}

/// API key permission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Inference,
}

impl Permission {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Inference => "inference",
        }
    }
}

/// A user-generated API key. Only the hash of the secret is kept.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub user_id: UserId,
    pub name: String,

    /// SHA-256 of the secret, never sent to clients
    #[serde(skip_serializing, default)]
    pub key_hash: String,

    /// Leading characters of the secret, safe to display
    pub key_prefix: String,

    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Active and not expired
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// One recorded API call
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLog {
    pub id: i64,
    pub user_id: UserId,
    pub api_key_id: Option<String>,
    pub model: String,
    pub tokens_used: i64,
    pub endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Usage log row before it is persisted
#[derive(Clone, Debug)]
pub struct NewUsageLog {
    pub user_id: UserId,
    pub api_key_id: Option<String>,
    pub model: String,
    pub tokens_used: i64,
    pub endpoint: Option<String>,
}

/// A login session, looked up by the hash of its bearer token
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
