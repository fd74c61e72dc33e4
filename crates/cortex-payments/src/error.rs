//! Payment Error Types

use cortex_core::CoreError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Unknown plan or credit pack
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request cannot be charged (e.g. the free plan)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// E-mail delivery failed
    #[error("Email error: {0}")]
    Email(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stripe(_) | Self::Storage(_) | Self::Email(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Stripe(_) => "Payment processing failed. Please try again.".into(),
            Self::NotFound(msg) | Self::Validation(msg) => msg.clone(),
            Self::Config(_) => "Payments are not configured.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}

impl From<CoreError> for PaymentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Config(msg) => Self::Config(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<stripe::StripeError> for PaymentError {
    fn from(err: stripe::StripeError) -> Self {
        Self::Stripe(err.to_string())
    }
}
