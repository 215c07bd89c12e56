//! Embedding of passages and questions through a remote embedding service.
//!
//! [`EmbeddingService`] is the remote interface; [`Embedder`] wraps one with a model name,
//! batching, a per-call timeout and bounded retries for transient failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::remote::{with_timeout, RetryPolicy, ServiceError, ServiceFailure};

/// One vector per passage or question.
pub type Embedding = Vec<f32>;

/// Default number of texts sent in one embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A remote service that turns texts into vectors with the named model.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Returns one vector per input text, in input order.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Embedding>, ServiceError>;
}

/// Embeds texts with a fixed model. Cheap to clone.
#[derive(Clone)]
pub struct Embedder {
    service: Arc<dyn EmbeddingService>,
    model: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl Embedder {
    pub fn new(service: Arc<dyn EmbeddingService>, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
            timeout: None,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Time limit for each request (each attempt of each batch).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed many texts. Returns one vector per input, all of the same dimension.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors: Vec<Embedding> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.embed_batch(batch).await?;
            if let (Some(first), Some(next)) = (vectors.first(), batch_vectors.first()) {
                if first.len() != next.len() {
                    return Err(self.error(
                        1,
                        ServiceError::new(
                            ServiceFailure::BadResponse,
                            format!(
                                "dimension changed between batches: {} then {}",
                                first.len(),
                                next.len()
                            ),
                        ),
                    ));
                }
            }
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    /// Embed a single text (e.g. a question).
    pub async fn embed_one(&self, text: &str) -> Result<Embedding, EmbedError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            self.error(
                1,
                ServiceError::new(ServiceFailure::BadResponse, "no vector returned"),
            )
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        let mut attempt = 0;
        loop {
            debug!(model = %self.model, batch_size = batch.len(), attempt, "embedding batch");
            let result = with_timeout(self.timeout, self.service.embed(batch, &self.model))
                .await
                .and_then(|vectors| check_batch(batch.len(), vectors));
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.kind.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(model = %self.model, error = %e, ?delay, "embedding failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.error(attempt + 1, e)),
            }
        }
    }

    fn error(&self, attempts: u32, source: ServiceError) -> EmbedError {
        EmbedError {
            model: self.model.clone(),
            attempts,
            source,
        }
    }
}

/// A response must hold one vector per input, all non-empty and equally long.
fn check_batch(expected: usize, vectors: Vec<Embedding>) -> Result<Vec<Embedding>, ServiceError> {
    if vectors.len() != expected {
        return Err(ServiceError::new(
            ServiceFailure::BadResponse,
            format!("expected {expected} vectors, got {}", vectors.len()),
        ));
    }
    let dimension = vectors.first().map_or(0, Vec::len);
    if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
        return Err(ServiceError::new(
            ServiceFailure::BadResponse,
            "vectors are empty or differ in dimension",
        ));
    }
    Ok(vectors)
}

#[derive(Debug, thiserror::Error)]
#[error("embedding with {model} failed after {attempts} attempt(s): {source}")]
pub struct EmbedError {
    pub model: String,
    pub attempts: u32,
    pub source: ServiceError,
}

impl EmbedError {
    pub fn kind(&self) -> ServiceFailure {
        self.source.kind
    }

    pub fn is_timeout(&self) -> bool {
        self.source.is_timeout()
    }
}
