//! # cortex-runtime
//!
//! Model-hub integrations for the OmniCortex backend.
//!
//! ## Hubs
//!
//! - **Hugging Face**: hub listings, account info and hosted inference
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cortex_runtime::HuggingFaceClient;
//!
//! let hub: Arc<dyn ModelHub> = Arc::new(HuggingFaceClient::from_env()?);
//! let models = hub.list_models(&HubQuery::top_downloads(20)).await?;
//! ```

pub mod huggingface;

pub use huggingface::{HuggingFaceClient, HuggingFaceConfig};

// Re-export core types for convenience
pub use cortex_core::provider::{HubQuery, ModelHub, TextGenerationOptions};
