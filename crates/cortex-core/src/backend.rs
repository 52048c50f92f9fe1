//! Seams to the model server: text embedding and text generation.
//!
//! The pipeline only talks to these traits. [`crate::ollama::OllamaClient`] implements
//! both; tests plug in deterministic fakes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, part of the ingestion fingerprint.
    fn model(&self) -> &str;

    /// Embed multiple strings in one call. Returns one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Embed a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BackendError::InvalidResponse("empty embedding".to_string()))
    }

    /// Cheap liveness probe. Must not change any state.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Generates text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Models the backend can serve. Doubles as the liveness probe.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("upstream call timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response from model backend: {0}")]
    InvalidResponse(String),
}

/// Bound an upstream call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}
