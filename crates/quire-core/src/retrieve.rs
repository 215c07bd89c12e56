//! Single-stage dense retrieval: embed the question, search the index.

use tracing::debug;

use crate::chunks::Passage;
use crate::embed::{EmbedError, Embedder};
use crate::store::{IndexError, VectorIndex};

/// The `k` passages closest to `question`, best first.
pub async fn retrieve(
    index: &VectorIndex,
    embedder: &Embedder,
    question: &str,
    k: usize,
) -> Result<Vec<Passage>, RetrieveError> {
    let query = embedder.embed_one(question).await?;
    let hits = index.search(&query, k)?;
    debug!(
        k,
        returned = hits.len(),
        best_score = hits.first().map(|h| h.score),
        "retrieved passages"
    );
    Ok(hits.into_iter().map(|h| h.passage).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
}
