//! # cortex-db
//!
//! SQLite implementation of the `cortex-core` storage ports.
//!
//! ```rust,ignore
//! use cortex_db::SqliteStore;
//!
//! let store = SqliteStore::connect("sqlite://omnicortex.db?mode=rwc").await?;
//! let user = store.upsert_user(&profile).await?;
//! ```
//!
//! The schema lives in `migrations/` and is applied on connect.

mod rows;
mod sqlite;

pub use sqlite::SqliteStore;
