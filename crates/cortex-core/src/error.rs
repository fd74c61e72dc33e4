//! Error Types

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input, rejected before any state is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough tokens to cover a reservation
    #[error("Insufficient token balance: {required} required, {available} available")]
    InsufficientBalance { required: i64, available: i64 },

    /// Caller is not authenticated or the credential is unusable
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but lacks a permission
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Upstream service (model hub) failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::NotFound(msg) => msg.clone(),
            Self::InsufficientBalance { required, available } => format!(
                "Insufficient token balance ({available} available, {required} required). \
                 Please upgrade your plan or purchase more tokens."
            ),
            Self::Unauthorized(_) => "Please sign in to continue.".into(),
            Self::Forbidden(msg) => format!("Not allowed: {msg}"),
            Self::Upstream(msg) => format!("The model service returned an error: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
