//! Hugging Face Model Hub
//!
//! Implementation of `ModelHub` over the Hugging Face REST APIs: hub listings
//! from `huggingface.co/api`, inference from the hosted inference endpoint.

use std::time::Duration;

use async_trait::async_trait;
use cortex_core::{
    error::{CoreError, Result},
    provider::{HubAccount, HubDataset, HubModel, HubQuery, ModelHub, TextGenerationOptions},
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Hub REST API base
pub const HUB_API_BASE: &str = "https://huggingface.co/api";

/// Hosted inference base
pub const INFERENCE_API_BASE: &str = "https://api-inference.huggingface.co/models";

/// Hugging Face client configuration
#[derive(Clone, Debug)]
pub struct HuggingFaceConfig {
    /// Bearer token; anonymous requests when absent
    pub api_token: Option<String>,

    pub api_base: String,

    pub inference_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: HUB_API_BASE.into(),
            inference_base: INFERENCE_API_BASE.into(),
            timeout_secs: 120,
        }
    }
}

impl HuggingFaceConfig {
    pub fn from_env() -> Self {
        let api_token = std::env::var("HUGGINGFACE_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let api_base = std::env::var("HUGGINGFACE_API_BASE").unwrap_or_else(|_| HUB_API_BASE.into());
        let inference_base = std::env::var("HUGGINGFACE_INFERENCE_BASE")
            .unwrap_or_else(|_| INFERENCE_API_BASE.into());

        Self {
            api_token,
            api_base,
            inference_base,
            ..Default::default()
        }
    }
}

/// Hugging Face hub client
pub struct HuggingFaceClient {
    http: reqwest::Client,
    config: HuggingFaceConfig,
}

impl HuggingFaceClient {
    /// Create from configuration
    pub fn from_config(config: HuggingFaceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::Config(format!("HTTP client: {e}")))?;

        if config.api_token.is_none() {
            tracing::warn!("HUGGINGFACE_API_TOKEN not set, hub requests are anonymous");
        }

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(HuggingFaceConfig::from_env())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, what, "Hugging Face request failed");
            return Err(CoreError::Upstream(format!(
                "Hugging Face {what} error: {} - {}",
                status.as_u16(),
                truncate(&body, 500)
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::Upstream(format!("Hugging Face {what} returned invalid JSON: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.config.api_base);
        let response = self
            .authorize(self.http.get(&url).query(params))
            .send()
            .await
            .map_err(|e| CoreError::Upstream(format!("Hugging Face request failed: {e}")))?;

        Self::read_json(response, "API").await
    }

    /// POST to the inference endpoint, holding the request while a cold model loads
    async fn post_inference(&self, model_id: &str, body: &Value) -> Result<Value> {
        let url = inference_url(&self.config.inference_base, model_id)?;
        let response = self
            .authorize(self.http.post(&url).json(body))
            .header("x-wait-for-model", "true")
            .send()
            .await
            .map_err(|e| CoreError::Upstream(format!("Inference request failed: {e}")))?;

        tracing::debug!(model = %model_id, status = %response.status(), "Inference response");
        Self::read_json(response, "inference").await
    }
}

/// Inference URL for `model_id`; rejects ids that would escape the models path
fn inference_url(base: &str, model_id: &str) -> Result<String> {
    let valid = !model_id.is_empty()
        && !model_id.starts_with('/')
        && !model_id.split('/').any(|segment| segment.is_empty() || segment == "..")
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));

    if valid {
        Ok(format!("{base}/{model_id}"))
    } else {
        Err(CoreError::Validation(format!("Invalid model id: {model_id}")))
    }
}

/// Request body for text generation
fn generation_payload(prompt: &str, options: &TextGenerationOptions) -> Value {
    json!({
        "inputs": prompt,
        "parameters": {
            "max_new_tokens": options.max_new_tokens,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "top_k": options.top_k,
            "repetition_penalty": options.repetition_penalty,
            "do_sample": options.do_sample,
        }
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl ModelHub for HuggingFaceClient {
    async fn whoami(&self) -> Result<HubAccount> {
        self.get_json("/whoami-v2", &[]).await
    }

    async fn list_models(&self, query: &HubQuery) -> Result<Vec<HubModel>> {
        self.get_json("/models", &query.to_params()).await
    }

    async fn list_datasets(&self, query: &HubQuery) -> Result<Vec<HubDataset>> {
        self.get_json("/datasets", &query.to_params()).await
    }

    async fn inference(&self, model_id: &str, inputs: &Value) -> Result<Value> {
        self.post_inference(model_id, &json!({ "inputs": inputs }))
            .await
    }

    async fn generate_text(
        &self,
        model_id: &str,
        prompt: &str,
        options: &TextGenerationOptions,
    ) -> Result<Value> {
        self.post_inference(model_id, &generation_payload(prompt, options))
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        match self.whoami().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Hugging Face health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HuggingFaceConfig::default();
        assert_eq!(config.api_base, "https://huggingface.co/api");
        assert_eq!(config.inference_base, "https://api-inference.huggingface.co/models");
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_generation_payload_carries_parameters() {
        let options = TextGenerationOptions {
            max_new_tokens: 64,
            ..Default::default()
        };
        let payload = generation_payload("Hello", &options);

        assert_eq!(payload["inputs"], "Hello");
        assert_eq!(payload["parameters"]["max_new_tokens"], 64);
        assert_eq!(payload["parameters"]["top_k"], 50);
        assert_eq!(payload["parameters"]["do_sample"], true);
    }

    #[test]
    fn test_inference_url_validation() {
        assert_eq!(
            inference_url(INFERENCE_API_BASE, "gpt2").unwrap(),
            "https://api-inference.huggingface.co/models/gpt2"
        );
        assert!(inference_url(INFERENCE_API_BASE, "meta-llama/Llama-3.1-8B").is_ok());
        assert!(inference_url(INFERENCE_API_BASE, "../whoami-v2").is_err());
        assert!(inference_url(INFERENCE_API_BASE, "org//model").is_err());
        assert!(inference_url(INFERENCE_API_BASE, "model?x=1").is_err());
        assert!(inference_url(INFERENCE_API_BASE, "").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_upstream_error() {
        let client = HuggingFaceClient::from_config(HuggingFaceConfig {
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let err = client.list_models(&HubQuery::top_downloads(5)).await.unwrap_err();
        assert!(matches!(err, CoreError::Upstream(_)));
        assert!(!client.health_check().await.unwrap());
    }
}
