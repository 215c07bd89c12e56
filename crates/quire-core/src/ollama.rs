//! Ollama client for embeddings and completion. Wraps ollama-rs behind the service traits.

use std::error::Error as _;

use async_trait::async_trait;
use ollama_rs::error::OllamaError;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;

use crate::answer::GenerativeService;
use crate::embed::{Embedding, EmbeddingService};
use crate::remote::{http_failure, ServiceError, ServiceFailure};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CHAT_MODEL: &str = "llama3.2";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around a local or remote Ollama server.
#[derive(Debug, Clone, Default)]
pub struct OllamaClient {
    inner: Ollama,
}

impl OllamaClient {
    /// Create from URL string. Default: http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, url::ParseError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl EmbeddingService for OllamaClient {
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Embedding>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            model.to_string(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(request_failed)?;
        Ok(res.embeddings)
    }
}

#[async_trait]
impl GenerativeService for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<String, ServiceError> {
        let req = GenerationRequest::new(model.to_string(), prompt.to_string())
            .options(ModelOptions::default().temperature(temperature));
        let res = self.inner.generate(req).await.map_err(request_failed)?;
        Ok(res.response)
    }
}

/// Classify by the error's cause. Transport failures keep their HTTP meaning; an error
/// the server answered with (unknown model, bad options) is a rejection and is not retried.
fn request_failed(e: OllamaError) -> ServiceError {
    let kind = match e.source() {
        Some(cause) => {
            if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
                http_failure(http)
            } else if cause.is::<serde_json::Error>() {
                ServiceFailure::BadResponse
            } else {
                ServiceFailure::Rejected
            }
        }
        None => ServiceFailure::Rejected,
    };
    ServiceError::new(kind, format!("Ollama request failed: {e}"))
}
