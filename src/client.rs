//! Typed client for the Ollama HTTP API
//!
//! Replaces text scraping of CLI output with the service's structured
//! endpoints. Every call uses a short per-request timeout; a transport
//! failure maps to `ServiceUnavailable` so callers can degrade instead
//! of crashing.

use crate::error::{ManagerError, ManagerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prompt used for the inference smoke test; kept tiny on purpose
const SMOKE_TEST_PROMPT: &str = "Say OK";
const SMOKE_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An installed model as reported by `GET /api/tags`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// A model currently loaded into memory, from `GET /api/ps`
#[derive(Debug, Clone, Deserialize)]
pub struct LoadedModel {
    pub name: String,
    #[serde(default)]
    pub size_vram: u64,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<LoadedModel>,
}

/// HTTP client for one Ollama endpoint
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client with a per-call timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ManagerResult<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManagerError::service_unavailable(&base_url, e))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Readiness probe: success is an HTTP 200 on the tags endpoint
    pub async fn ping(&self) -> ManagerResult<()> {
        let url = self.url("/api/tags");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ManagerError::service_unavailable(
                &url,
                format!("status {}", response.status()),
            ))
        }
    }

    /// List installed models
    pub async fn list_models(&self) -> ManagerResult<Vec<ModelInfo>> {
        let url = self.url("/api/tags");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        let response = check_status(response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        Ok(tags.models)
    }

    /// List models currently loaded into memory
    pub async fn loaded_models(&self) -> ManagerResult<Vec<LoadedModel>> {
        let url = self.url("/api/ps");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        let response = check_status(response).await?;
        let ps: PsResponse = response
            .json()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        Ok(ps.models)
    }

    /// Remove an installed model
    pub async fn delete_model(&self, model_id: &str) -> ManagerResult<()> {
        let url = self.url("/api/delete");
        let response = self
            .http
            .delete(&url)
            .json(&serde_json::json!({ "model": model_id }))
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        check_status(response).await?;
        Ok(())
    }

    /// Inference smoke test with a fixed tiny prompt
    ///
    /// Uses its own timeout since generation is slower than metadata calls.
    pub async fn smoke_test(&self, model_id: &str) -> ManagerResult<()> {
        let url = self.url("/api/generate");
        let response = self
            .http
            .post(&url)
            .timeout(SMOKE_TEST_TIMEOUT)
            .json(&serde_json::json!({
                "model": model_id,
                "prompt": SMOKE_TEST_PROMPT,
                "stream": false,
            }))
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        check_status(response).await?;
        Ok(())
    }

    /// Ask the service to unload a model by generating with zero keep-alive
    pub async fn unload_model(&self, model_id: &str) -> ManagerResult<()> {
        let url = self.url("/api/generate");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "model": model_id,
                "keep_alive": 0,
            }))
            .send()
            .await
            .map_err(|e| ManagerError::service_unavailable(&url, e))?;

        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> ManagerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ManagerError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Match a declared model identifier against a listed model name
///
/// The service lists fully tagged names; a declared id without a tag
/// matches its `:latest` form.
pub fn model_matches(declared: &str, listed: &str) -> bool {
    if declared == listed {
        return true;
    }
    if !declared.contains(':') {
        return listed == format!("{declared}:latest");
    }
    false
}
