//! Vector index over passages: parallel arrays of vectors and passages, brute-force
//! k-nearest-neighbour search, and save/load to a named directory on disk.
//!
//! An index is built once per ingest and replaces whatever was saved at its location.
//! Saving goes through a temp file and a rename, so readers never see half an index.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunks::Passage;
use crate::embed::Embedding;

/// Default number of passages returned by a search.
pub const DEFAULT_TOP_K: usize = 4;
/// File holding the index inside its location directory.
pub const INDEX_FILENAME: &str = "index.json";

const FORMAT_VERSION: u32 = 1;

/// Where an index is saved, and whether the caller accepts loading whatever is there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    path: PathBuf,
    trusted: bool,
}

impl IndexLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            trusted: false,
        }
    }

    /// Acknowledge that the content at this location may be loaded. Without this,
    /// [`VectorIndex::load`] refuses to deserialize anything.
    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn index_file(&self) -> PathBuf {
        self.path.join(INDEX_FILENAME)
    }
}

/// Similarity used for both building and searching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Vectors are normalized to unit length; score is the dot product (1 = same direction).
    #[default]
    Cosine,
    /// Score is the negated squared euclidean distance (0 = identical).
    L2,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

/// A passage returned by a search, with its similarity score (higher is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub passage: Passage,
    pub score: f32,
}

/// Passages and their vectors, searchable by similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    metric: Metric,
    dimension: usize,
    /// Stored as given for L2, unit length for cosine.
    vectors: Vec<Embedding>,
    passages: Vec<Passage>,
}

impl VectorIndex {
    /// Build an index from passages and one vector per passage, all of one dimension.
    pub fn build(
        passages: Vec<Passage>,
        vectors: Vec<Embedding>,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        if passages.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                passages: passages.len(),
                vectors: vectors.len(),
            });
        }
        let dimension = vectors.first().map_or(0, Vec::len);
        if let Some(v) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                found: v.len(),
            });
        }
        let vectors = match metric {
            Metric::Cosine => vectors.iter().map(|v| normalize(v)).collect(),
            Metric::L2 => vectors,
        };
        debug!(count = passages.len(), dimension, metric = metric.as_str(), "built index");
        Ok(Self {
            metric,
            dimension,
            vectors,
            passages,
        })
    }

    /// The `k` passages closest to `query`, best first. Ties keep build order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.passages.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        let query = match self.metric {
            Metric::Cosine => normalize(query),
            Metric::L2 => query.to_vec(),
        };
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let score = match self.metric {
                    Metric::Cosine => dot(&query, v),
                    Metric::L2 => -squared_distance(&query, v),
                };
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();
        // sort_by is stable, so equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| SearchHit {
                passage: self.passages[i].clone(),
                score,
            })
            .collect())
    }

    /// Write the whole index to `location`, replacing anything saved there before.
    pub fn save(&self, location: &IndexLocation) -> Result<(), IndexError> {
        let dir = location.path();
        std::fs::create_dir_all(dir).map_err(|e| IndexError::Write(dir.to_path_buf(), e))?;
        let target = location.index_file();

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| IndexError::Write(dir.to_path_buf(), e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &self.as_file()).map_err(IndexError::Encode)?;
            writer
                .flush()
                .map_err(|e| IndexError::Write(target.clone(), e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| IndexError::Write(target.clone(), e))?;
        tmp.persist(&target)
            .map_err(|e| IndexError::Write(target.clone(), e.error))?;

        info!(
            location = %dir.display(),
            count = self.passages.len(),
            dimension = self.dimension,
            "saved index"
        );
        Ok(())
    }

    /// Read the index saved at `location`. The location must be marked trusted.
    pub fn load(location: &IndexLocation) -> Result<Self, IndexError> {
        let path = location.index_file();
        if !path.is_file() {
            return Err(IndexError::NotFound(location.path().to_path_buf()));
        }
        if !location.is_trusted() {
            return Err(IndexError::Untrusted(location.path().to_path_buf()));
        }
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IndexError::NotFound(location.path().to_path_buf()),
            _ => IndexError::Read(path.clone(), e),
        })?;
        let stored: StoredIndex =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| IndexError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let index = stored.validate().map_err(|reason| IndexError::Corrupt {
            path: path.clone(),
            reason,
        })?;
        debug!(location = %location.path().display(), count = index.len(), "loaded index");
        Ok(index)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Length of every vector in the index (0 when empty).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Number of indexed passages.
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    fn as_file(&self) -> StoredIndexRef<'_> {
        StoredIndexRef {
            format_version: FORMAT_VERSION,
            metric: self.metric,
            dimension: self.dimension,
            count: self.passages.len(),
            vectors: &self.vectors,
            passages: &self.passages,
        }
    }
}

#[derive(Serialize)]
struct StoredIndexRef<'a> {
    format_version: u32,
    metric: Metric,
    dimension: usize,
    count: usize,
    vectors: &'a [Embedding],
    passages: &'a [Passage],
}

#[derive(Deserialize)]
struct StoredIndex {
    format_version: u32,
    metric: Metric,
    dimension: usize,
    count: usize,
    vectors: Vec<Embedding>,
    passages: Vec<Passage>,
}

impl StoredIndex {
    fn validate(self) -> Result<VectorIndex, String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!("unsupported format version {}", self.format_version));
        }
        if self.vectors.len() != self.count || self.passages.len() != self.count {
            return Err(format!(
                "declares {} entries but holds {} vectors and {} passages",
                self.count,
                self.vectors.len(),
                self.passages.len()
            ));
        }
        if self.vectors.iter().any(|v| v.len() != self.dimension) {
            return Err(format!("vector with dimension other than {}", self.dimension));
        }
        Ok(VectorIndex {
            metric: self.metric,
            dimension: self.dimension,
            vectors: self.vectors,
            passages: self.passages,
        })
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("cannot index {passages} passages with {vectors} vectors")]
    CountMismatch { passages: usize, vectors: usize },
    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("no index at {0}; ingest documents first")]
    NotFound(PathBuf),
    #[error("refusing to load index at {0}: loading must be explicitly allowed for this location")]
    Untrusted(PathBuf),
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to encode index: {0}")]
    Encode(serde_json::Error),
}
