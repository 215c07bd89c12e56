//! Ingest pipeline: extract → chunk → embed → index → save.
//! Query pipeline: load index → retrieve → synthesize.
//!
//! The two flows share nothing but the index location on disk. Each query loads the index
//! fresh, and no lock is held while remote calls are in flight.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::answer::{Answer, AnswerSynthesizer, GenerativeService, PromptTemplate};
use crate::chunks::{chunk_documents, ChunkOptions, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::config::{api_key, Config, ConfigError, Provider};
use crate::documents::{extract, Document, ExtractError, RawDocument};
use crate::embed::{Embedder, EmbeddingService};
use crate::error::{Error, ErrorKind, ErrorReport};
use crate::gemini::GeminiClient;
use crate::ollama::OllamaClient;
use crate::remote::RetryPolicy;
use crate::retrieve::retrieve;
use crate::store::{IndexLocation, Metric, VectorIndex, DEFAULT_TOP_K};

/// Step of a flow; failures report the step they happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Persisting,
    LoadingIndex,
    Retrieving,
    Synthesizing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Extracting => "extracting",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Persisting => "persisting",
            Stage::LoadingIndex => "loading index",
            Stage::Retrieving => "retrieving",
            Stage::Synthesizing => "synthesizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub passages: usize,
    pub dimension: usize,
    pub location: PathBuf,
}

/// Chunking, embedding, retrieval and synthesis settings for both flows. Cheap to clone,
/// so concurrent requests can each hold their own copy.
#[derive(Clone)]
pub struct Pipeline {
    embedder: Embedder,
    synthesizer: AnswerSynthesizer,
    chunk_size: usize,
    overlap: usize,
    top_k: usize,
    metric: Metric,
}

impl Pipeline {
    pub fn new(embedder: Embedder, synthesizer: AnswerSynthesizer) -> Self {
        Self {
            embedder,
            synthesizer,
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            top_k: DEFAULT_TOP_K,
            metric: Metric::default(),
        }
    }

    /// Build the services and pipeline described by `config`. API keys are read from the
    /// environment here and nowhere else.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let emb = &config.embedding;
        let embedding_service: Arc<dyn EmbeddingService> = match emb.provider {
            Provider::Gemini => Arc::new(gemini_client(&emb.api_key_env, emb.base_url.as_deref())?),
            Provider::Ollama => Arc::new(ollama_client(emb.base_url.as_deref())?),
        };
        let embedder = Embedder::new(embedding_service, emb.model())
            .with_timeout(Duration::from_secs(emb.timeout_secs))
            .with_retry(RetryPolicy {
                max_retries: emb.max_retries,
                ..RetryPolicy::default()
            })
            .with_batch_size(emb.batch_size);

        let gen = &config.generation;
        let generative_service: Arc<dyn GenerativeService> = match gen.provider {
            Provider::Gemini => Arc::new(gemini_client(&gen.api_key_env, gen.base_url.as_deref())?),
            Provider::Ollama => Arc::new(ollama_client(gen.base_url.as_deref())?),
        };
        let synthesizer = AnswerSynthesizer::new(generative_service, gen.model())
            .with_template(PromptTemplate::new(config.prompt.template.clone())?)
            .with_temperature(gen.temperature)
            .with_timeout(Duration::from_secs(gen.timeout_secs))
            .with_max_context_chars(config.retrieval.max_context_chars);

        Ok(Self::new(embedder, synthesizer)
            .with_chunking(config.chunking.chunk_size, config.chunking.overlap)
            .with_top_k(config.retrieval.top_k)
            .with_metric(config.retrieval.metric))
    }

    /// Chunking parameters; checked when an ingest starts.
    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Similarity metric for newly built indexes. Queries use the metric stored in the index.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Replace the index at `location` with one built from `documents`.
    ///
    /// All or nothing: if any document fails to extract, or any later step fails, the
    /// index previously saved at `location` is left as it was.
    pub async fn ingest(
        &self,
        documents: Vec<RawDocument>,
        location: &IndexLocation,
    ) -> Result<IngestReport, PipelineError> {
        let options =
            ChunkOptions::new(self.chunk_size, self.overlap).map_err(fail(Stage::Validating))?;
        let document_count = documents.len();
        info!(
            documents = document_count,
            location = %location.path().display(),
            "ingest started"
        );

        let documents = extract_all(documents)
            .await
            .map_err(fail(Stage::Extracting))?;
        if documents.iter().all(|d| d.text.is_empty()) {
            return Err(fail(Stage::Extracting)(ExtractError::NoText));
        }

        let passages = chunk_documents(&documents, &options);
        drop(documents);
        info!(
            passages = passages.len(),
            chunk_size = options.chunk_size(),
            overlap = options.overlap(),
            "chunked documents"
        );

        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_many(&texts)
            .await
            .map_err(fail(Stage::Embedding))?;

        let index =
            VectorIndex::build(passages, vectors, self.metric).map_err(fail(Stage::Indexing))?;
        index.save(location).map_err(fail(Stage::Persisting))?;

        let report = IngestReport {
            documents: document_count,
            passages: index.len(),
            dimension: index.dimension(),
            location: location.path().to_path_buf(),
        };
        info!(
            passages = report.passages,
            dimension = report.dimension,
            "ingest finished"
        );
        Ok(report)
    }

    /// Answer `question` from the index saved at `location`.
    pub async fn query(
        &self,
        question: &str,
        location: &IndexLocation,
    ) -> Result<Answer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(fail(Stage::Validating)(Error::EmptyQuestion));
        }

        let index = VectorIndex::load(location).map_err(fail(Stage::LoadingIndex))?;
        let passages = retrieve(&index, &self.embedder, question, self.top_k)
            .await
            .map_err(fail(Stage::Retrieving))?;
        info!(passages = passages.len(), "retrieved context");

        let answer = self
            .synthesizer
            .synthesize(&passages, question)
            .await
            .map_err(fail(Stage::Synthesizing))?;
        info!(answer_chars = answer.text.len(), "answered question");
        Ok(answer)
    }
}

/// Extract every document, stopping at the first failure. PDF parsing is blocking work,
/// so it runs off the async threads.
async fn extract_all(documents: Vec<RawDocument>) -> Result<Vec<Document>, ExtractError> {
    let mut extracted = Vec::with_capacity(documents.len());
    for raw in documents {
        let name = raw.name.clone();
        let doc = tokio::task::spawn_blocking(move || extract(raw))
            .await
            .map_err(|e| ExtractError::Aborted {
                name,
                message: e.to_string(),
            })??;
        extracted.push(doc);
    }
    Ok(extracted)
}

fn gemini_client(api_key_env: &str, base_url: Option<&str>) -> Result<GeminiClient, ConfigError> {
    let client = GeminiClient::new(api_key(api_key_env)?);
    Ok(match base_url {
        Some(url) => client.with_base_url(url),
        None => client,
    })
}

fn ollama_client(base_url: Option<&str>) -> Result<OllamaClient, ConfigError> {
    match base_url {
        Some(url) => Ok(OllamaClient::from_url(url)?),
        None => Ok(OllamaClient::default()),
    }
}

/// Wrap a stage failure, logging it once where it is caught.
fn fail<E: Into<Error>>(stage: Stage) -> impl Fn(E) -> PipelineError {
    move |e| {
        let source = e.into();
        error!(%stage, kind = %source.kind(), error = %source, "pipeline stage failed");
        PipelineError { stage, source }
    }
}

/// A failed ingest or query, with the stage it failed in.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub source: Error,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Structured failure; the message names the stage.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            message: self.to_string(),
            ..self.source.report()
        }
    }
}
