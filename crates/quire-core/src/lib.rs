//! All pipeline logic independent of how it is run (CLI or a server).
//!
//! Ingest: documents are extracted, concatenated, split into overlapping passages,
//! embedded and saved as a vector index at a named location. Query: the question is
//! embedded, the closest passages are retrieved and handed with the question to a
//! generative model (see [pipeline]).

pub mod answer;
pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embed;
pub mod error;
pub mod gemini;
pub mod ollama;
pub mod pipeline;
pub mod remote;
pub mod retrieve;
pub mod store;
pub mod watcher;

pub use answer::{
    Answer, AnswerSynthesizer, GenerativeService, PromptTemplate, SynthesisError,
    DEFAULT_PROMPT_TEMPLATE,
};
pub use app_data::{app_data_dir, default_index_location};
pub use chunks::{chunk_documents, split, ChunkError, ChunkOptions, Passage};
pub use config::{load_config, load_config_from, save_config, Config, ConfigError, Provider};
pub use documents::{extract, read_document, scan_documents, Document, ExtractError, RawDocument};
pub use embed::{EmbedError, Embedder, Embedding, EmbeddingService};
pub use error::{Error, ErrorKind, ErrorReport};
pub use pipeline::{IngestReport, Pipeline, PipelineError, Stage};
pub use remote::{RetryPolicy, ServiceError, ServiceFailure};
pub use retrieve::{retrieve, RetrieveError};
pub use store::{IndexError, IndexLocation, Metric, SearchHit, VectorIndex};
pub use watcher::{watch_documents, WatchError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "quire-core ready"
}
