//! Model registry: query layer over the service's model listing

use crate::client::{ModelInfo, OllamaClient, model_matches};
use crate::error::ManagerResult;
use async_trait::async_trait;

/// Query seam for installed models
///
/// The installer verifies through this trait so tests can substitute a
/// catalog without a live service.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// List installed models; fails with `ServiceUnavailable` when the
    /// service is unreachable (callers treat the count as unknown)
    async fn list(&self) -> ManagerResult<Vec<ModelInfo>>;

    /// Whether a declared model identifier is currently installed
    async fn exists(&self, model_id: &str) -> ManagerResult<bool> {
        let models = self.list().await?;
        Ok(models.iter().any(|m| model_matches(model_id, &m.name)))
    }

    /// Post-install existence check; an unreachable service counts as
    /// unverified, not as a crash
    async fn verify(&self, model_id: &str) -> bool {
        self.exists(model_id).await.unwrap_or(false)
    }
}

/// Catalog backed by the live Ollama API
pub struct OllamaRegistry {
    client: OllamaClient,
}

impl OllamaRegistry {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelCatalog for OllamaRegistry {
    async fn list(&self) -> ManagerResult<Vec<ModelInfo>> {
        self.client.list_models().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// In-memory catalog for tests
    pub struct MockCatalog {
        pub models: Arc<RwLock<Vec<String>>>,
        pub unavailable: Arc<RwLock<bool>>,
    }

    impl MockCatalog {
        pub fn new(models: Vec<&str>) -> Self {
            Self {
                models: Arc::new(RwLock::new(
                    models.into_iter().map(String::from).collect(),
                )),
                unavailable: Arc::new(RwLock::new(false)),
            }
        }

        pub async fn insert(&self, model_id: &str) {
            self.models.write().await.push(model_id.to_string());
        }

        pub async fn set_unavailable(&self, value: bool) {
            *self.unavailable.write().await = value;
        }
    }

    #[async_trait]
    impl ModelCatalog for MockCatalog {
        async fn list(&self) -> ManagerResult<Vec<ModelInfo>> {
            if *self.unavailable.read().await {
                return Err(crate::error::ManagerError::service_unavailable(
                    "mock",
                    "down",
                ));
            }
            Ok(self
                .models
                .read()
                .await
                .iter()
                .map(|name| ModelInfo {
                    name: name.clone(),
                    size: 0,
                    modified_at: None,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockCatalog;
    use super::*;

    #[tokio::test]
    async fn test_exists_matches_tagged_and_latest() {
        let catalog = MockCatalog::new(vec!["llama3:latest", "phi3:mini"]);
        assert!(catalog.exists("llama3").await.unwrap());
        assert!(catalog.exists("phi3:mini").await.unwrap());
        assert!(!catalog.exists("mistral:7b").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_unreachable_is_false() {
        let catalog = MockCatalog::new(vec!["llama3:latest"]);
        catalog.set_unavailable(true).await;
        assert!(!catalog.verify("llama3").await);
    }
}
