//! API Result Envelope
//!
//! Every procedure answers `{"ok": true, "data": ...}` or
//! `{"ok": false, "error": {"code": ..., "message": ...}}` with a matching
//! HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cortex_core::CoreError;
use cortex_payments::PaymentError;
use serde::Serialize;
use serde_json::json;

/// Handler result
pub type ApiResult<T> = Result<Rpc<T>, ApiError>;

/// Successful procedure output
#[derive(Debug)]
pub struct Rpc<T>(pub T);

#[derive(Serialize)]
struct Success<'a, T> {
    ok: bool,
    data: &'a T,
}

impl<T: Serialize> IntoResponse for Rpc<T> {
    fn into_response(self) -> Response {
        Json(Success {
            ok: true,
            data: &self.0,
        })
        .into_response()
    }
}

/// Failed procedure output
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, "precondition_failed", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "An unexpected error occurred.",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "ok": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::bad_request(msg),
            CoreError::NotFound(msg) => Self::not_found(msg),
            CoreError::Unauthorized(msg) => Self::unauthorized(msg),
            CoreError::Forbidden(msg) => Self::forbidden(msg),
            CoreError::InsufficientBalance { .. } => Self::precondition_failed(err.user_message()),
            CoreError::Upstream(ref msg) => {
                tracing::warn!(error = %msg, "Upstream call failed");
                Self::bad_gateway(err.user_message())
            }
            CoreError::Json(e) => Self::bad_request(e.to_string()),
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal()
            }
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound(msg) => Self::not_found(msg),
            PaymentError::Validation(msg) => Self::bad_request(msg),
            PaymentError::Config(_) => Self::service_unavailable(err.user_message()),
            PaymentError::Stripe(ref msg) => {
                tracing::error!(error = %msg, "Stripe call failed");
                Self::bad_gateway(err.user_message())
            }
            other => {
                tracing::error!(error = %other, "Payment request failed");
                Self::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_statuses() {
        let cases = [
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (CoreError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                CoreError::InsufficientBalance {
                    required: 100,
                    available: 50,
                },
                StatusCode::PRECONDITION_FAILED,
            ),
            (CoreError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (CoreError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_payment_error_statuses() {
        assert_eq!(
            ApiError::from(PaymentError::Config("missing".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(PaymentError::Stripe("boom".into())).code,
            "bad_gateway"
        );
        assert_eq!(
            ApiError::from(PaymentError::NotFound("Plan not found".into())).message,
            "Plan not found"
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = ApiError::from(CoreError::Storage("disk I/O error at /var/db".into()));
        assert_eq!(err.code, "internal");
        assert!(!err.message.contains("/var/db"));
    }
}
