//! Ollama client for embeddings and completion. Wraps ollama-rs behind the
//! [`Embedder`] and [`Generator`] traits.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;

use crate::backend::{BackendError, Embedder, Generator};
use crate::config::OllamaConfig;

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_MODEL: &str = "mistral:latest";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    model: String,
    embed_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            model: DEFAULT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    /// Create from the `[ollama]` config section.
    pub fn from_config(config: &OllamaConfig) -> Result<Self, OllamaError> {
        Ok(Self::from_url(&config.url)?
            .with_model(config.model.clone())
            .with_embed_model(config.embed_model.clone()))
    }

    /// Set the generation model (e.g. `mistral:latest`, `llama3`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    async fn local_model_names(&self) -> Result<Vec<String>, OllamaError> {
        let models = self.inner.list_local_models().await?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model(&self) -> &str {
        &self.embed_model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(OllamaError::Request)?;
        Ok(res.embeddings)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.local_model_names().await?;
        Ok(())
    }
}

#[async_trait]
impl Generator for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let req = GenerationRequest::new(self.model.clone(), prompt.to_string());
        let res = self.inner.generate(req).await.map_err(OllamaError::Request)?;
        Ok(res.response)
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.local_model_names().await?)
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
}

impl From<OllamaError> for BackendError {
    fn from(e: OllamaError) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let config = OllamaConfig {
            model: "llama3".into(),
            embed_model: "all-minilm".into(),
            ..OllamaConfig::default()
        };
        let client = OllamaClient::from_config(&config).unwrap();
        assert_eq!(Generator::model(&client), "llama3");
        assert_eq!(Embedder::model(&client), "all-minilm");
    }

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            OllamaClient::from_url("not a url"),
            Err(OllamaError::ParseUrl(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Port 9 (discard) is closed on test machines.
        let client = OllamaClient::from_url("http://127.0.0.1:9").unwrap();
        let err = Generator::list_models(&client).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
