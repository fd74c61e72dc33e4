//! Server Configuration

use std::str::FromStr;

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default database location; `memory` selects the in-memory store
pub const DEFAULT_DATABASE_URL: &str = "sqlite://omnicortex.db?mode=rwc";

/// Origin used for redirect URLs when the request carries none
pub const DEFAULT_APP_ORIGIN: &str = "http://localhost:3000";

/// Application settings read from the environment
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub app_origin: String,

    /// Shared secret the identity provider presents to `auth.createSession`
    pub auth_issuer_secret: Option<String>,

    pub session_ttl_hours: i64,
    pub webhook_retention_days: i64,

    /// A debit crossing below this balance triggers a credits-low e-mail
    pub low_balance_threshold: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            app_origin: DEFAULT_APP_ORIGIN.into(),
            auth_issuer_secret: None,
            session_ttl_hours: 720,
            webhook_retention_days: 30,
            low_balance_threshold: 1_000,
        }
    }
}

impl AppConfig {
    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env_string("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: env_string("DATABASE_URL").unwrap_or(defaults.database_url),
            app_origin: env_string("APP_ORIGIN")
                .map(|origin| origin.trim_end_matches('/').to_string())
                .unwrap_or(defaults.app_origin),
            auth_issuer_secret: env_string("AUTH_ISSUER_SECRET"),
            session_ttl_hours: env_parse("SESSION_TTL_HOURS", defaults.session_ttl_hours),
            webhook_retention_days: env_parse(
                "WEBHOOK_EVENT_RETENTION_DAYS",
                defaults.webhook_retention_days,
            ),
            low_balance_threshold: env_parse("LOW_BALANCE_THRESHOLD", defaults.low_balance_threshold),
        }
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.session_ttl_hours, 720);
        assert_eq!(config.webhook_retention_days, 30);
        assert_eq!(config.low_balance_threshold, 1_000);
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_memory_store_selection() {
        let config = AppConfig {
            database_url: "MEMORY".into(),
            ..Default::default()
        };
        assert!(config.uses_memory_store());
    }
}
