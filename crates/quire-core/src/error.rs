//! Crate-wide error, grouping the module errors under the kinds reported to users.

use std::fmt;

use serde::Serialize;

use crate::answer::{SynthesisError, TemplateError};
use crate::chunks::ChunkError;
use crate::config::ConfigError;
use crate::documents::ExtractError;
use crate::embed::EmbedError;
use crate::retrieve::RetrieveError;
use crate::store::IndexError;

/// What went wrong, as reported in structured failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Extraction,
    Configuration,
    EmbeddingService,
    SynthesisService,
    DimensionMismatch,
    IndexNotFound,
    CorruptIndex,
    DeserializationTrust,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Extraction => "extraction_error",
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::EmbeddingService => "embedding_service_error",
            ErrorKind::SynthesisService => "synthesis_service_error",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::IndexNotFound => "index_not_found",
            ErrorKind::CorruptIndex => "corrupt_index",
            ErrorKind::DeserializationTrust => "deserialization_trust_error",
            ErrorKind::Storage => "storage_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("question must not be empty")]
    EmptyQuestion,
}

impl From<RetrieveError> for Error {
    fn from(e: RetrieveError) -> Self {
        match e {
            RetrieveError::Embed(e) => Error::Embed(e),
            RetrieveError::Index(e) => Error::Index(e),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Extract(_) => ErrorKind::Extraction,
            Error::Chunk(_) | Error::Config(_) | Error::Template(_) | Error::EmptyQuestion => {
                ErrorKind::Configuration
            }
            Error::Embed(_) => ErrorKind::EmbeddingService,
            Error::Synthesis(_) => ErrorKind::SynthesisService,
            Error::Index(e) => match e {
                IndexError::CountMismatch { .. } | IndexError::DimensionMismatch { .. } => {
                    ErrorKind::DimensionMismatch
                }
                IndexError::NotFound(_) => ErrorKind::IndexNotFound,
                IndexError::Untrusted(_) => ErrorKind::DeserializationTrust,
                IndexError::Corrupt { .. } => ErrorKind::CorruptIndex,
                IndexError::Read(..) | IndexError::Write(..) | IndexError::Encode(_) => {
                    ErrorKind::Storage
                }
            },
        }
    }

    /// True when a remote call ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Embed(e) => e.is_timeout(),
            Error::Synthesis(e) => e.is_timeout(),
            _ => false,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let document = match self {
            Error::Extract(e) => e.document().map(str::to_string),
            _ => None,
        };
        ErrorReport {
            error_kind: self.kind().as_str().to_string(),
            message: self.to_string(),
            document,
            timeout: self.is_timeout(),
        }
    }
}

/// A failure as shown to callers: `{ "error_kind": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timeout: bool,
}
