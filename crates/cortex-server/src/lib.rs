//! # cortex-server
//!
//! Axum HTTP surface of the OmniCortex backend: the procedure router,
//! request authentication, and the Stripe webhook endpoint.

pub mod auth;
pub mod config;
pub mod error;
pub mod input;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult, Rpc};
pub use routes::router;
pub use state::AppState;
