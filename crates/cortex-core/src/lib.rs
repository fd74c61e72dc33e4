//! # cortex-core
//!
//! Domain model and storage ports for the OmniCortex backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        cortex-server                          │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │    Store    │  │  PaymentGateway  │  │    ModelHub     │  │
//! │  │   (ports)   │  │ (cortex-payments)│  │    (Strategy)   │  │
//! │  └─────────────┘  └──────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `Store` traits are implemented in memory here and on SQLite in
//! `cortex-db`. The `ModelHub` trait is implemented for Hugging Face in
//! `cortex-runtime`.

pub mod error;
pub mod model;
pub mod provider;
pub mod secret;
pub mod store;

pub use error::{CoreError, Result};
pub use model::{
    ApiKey, NewUsageLog, Permission, PlanTier, Role, Session, SubscriptionUpdate, UsageLog, User,
    UserId, UserProfile,
};
pub use provider::ModelHub;
pub use store::{
    ApiKeyStore, EventLedger, MemoryStore, PriceStore, SessionStore, Store, UsageStore, UserStore,
};
