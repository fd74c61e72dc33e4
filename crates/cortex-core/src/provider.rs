//! Model Hub Strategy Pattern
//!
//! Defines a common interface for model-hosting backends so the API surface
//! can proxy listings and inference without depending on a concrete client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cortex_core::provider::{HubQuery, ModelHub};
//!
//! let hub = HuggingFaceClient::from_env();
//! let models = hub.list_models(&HubQuery::top_downloads(20)).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sort key for hub listings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HubSort {
    Downloads,
    Likes,
    LastModified,
}

impl HubSort {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloads => "downloads",
            Self::Likes => "likes",
            Self::LastModified => "lastModified",
        }
    }
}

/// Sort direction for hub listings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Filters for model and dataset listings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HubQuery {
    pub author: Option<String>,
    pub search: Option<String>,
    pub filter: Option<String>,
    pub sort: Option<HubSort>,
    pub direction: Option<SortDirection>,
    pub limit: Option<u32>,
}

impl HubQuery {
    /// Most downloaded first
    pub fn top_downloads(limit: u32) -> Self {
        Self {
            sort: Some(HubSort::Downloads),
            direction: Some(SortDirection::Desc),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Query-string pairs in hub API form
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(author) = &self.author {
            params.push(("author", author.clone()));
        }
        if let Some(search) = &self.search {
            params.push(("search", search.clone()));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter", filter.clone()));
        }
        if let Some(sort) = self.sort {
            params.push(("sort", sort.as_str().to_string()));
        }
        if let Some(direction) = self.direction {
            let value = match direction {
                SortDirection::Desc => "-1",
                SortDirection::Asc => "1",
            };
            params.push(("direction", value.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

/// A model listed on the hub
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubModel {
    pub id: String,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub gated: serde_json::Value,
    #[serde(default)]
    pub pipeline_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub library_name: Option<String>,
}

/// A dataset listed on the hub
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubDataset {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub gated: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub likes: u64,
}

/// Organization membership of the hub account
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubOrganization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The account behind the configured hub token
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubAccount {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub is_pro: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub orgs: Vec<HubOrganization>,
}

/// Sampling parameters for text generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextGenerationOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
}

impl Default for TextGenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 50,
            repetition_penalty: 1.1,
            do_sample: true,
        }
    }
}

/// Strategy trait for model-hosting backends
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Account that owns the configured token
    async fn whoami(&self) -> Result<HubAccount>;

    async fn list_models(&self, query: &HubQuery) -> Result<Vec<HubModel>>;

    async fn list_datasets(&self, query: &HubQuery) -> Result<Vec<HubDataset>>;

    /// Raw inference call; `inputs` is passed through untouched
    async fn inference(&self, model_id: &str, inputs: &serde_json::Value) -> Result<serde_json::Value>;

    async fn generate_text(
        &self,
        model_id: &str,
        prompt: &str,
        options: &TextGenerationOptions,
    ) -> Result<serde_json::Value>;

    /// Check if the hub is reachable with the configured credentials
    async fn health_check(&self) -> Result<bool> {
        Ok(self.whoami().await.is_ok())
    }
}
