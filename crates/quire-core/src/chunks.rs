//! Splits extracted text into overlapping passages for embedding and search.
//! Prefers paragraph boundaries; falls back to line, sentence and word breaks, then a hard character cut.
//!
//! Sizes are counted in chars, not bytes. Every passage after the first starts exactly
//! `overlap` chars before the end of the previous one, so dropping that prefix from each
//! later passage and concatenating gives back the input text.

use serde::{Deserialize, Serialize};

use crate::documents::Document;

/// Default maximum characters per passage.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
/// Default number of characters shared by adjacent passages.
pub const DEFAULT_OVERLAP: usize = 1_000;

/// Cut candidates, most preferred first. The separator stays with the passage before the cut.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "? ", "! ", " "];

/// A contiguous piece of the ingested text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    /// Index of this passage within its ingest call (0, 1, 2, …).
    pub sequence_index: usize,
    /// Name of the document the passage starts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// Validated chunking parameters: `0 <= overlap < chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkOptions {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkError::InvalidOverlap {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Split `text` into passages of at most `chunk_size` chars sharing `overlap` chars.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Passage>, ChunkError> {
    let options = ChunkOptions::new(chunk_size, overlap)?;
    Ok(chunk_text(text, &options))
}

/// Split already-validated input. Empty text gives no passages.
pub fn chunk_text(text: &str, options: &ChunkOptions) -> Vec<Passage> {
    let chars: Vec<char> = text.chars().collect();
    windows(&chars, options)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Passage {
            content: chars[start..end].iter().collect(),
            sequence_index: i,
            source_id: None,
        })
        .collect()
}

/// Chunk all documents as one text. Their contents are joined back to back, so a passage
/// may span two documents; `source_id` names the document the passage starts in.
pub fn chunk_documents(documents: &[Document], options: &ChunkOptions) -> Vec<Passage> {
    let mut text = String::new();
    // (char offset where the document starts, document name), non-empty documents only
    let mut starts: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for doc in documents {
        let len = doc.text.chars().count();
        if len > 0 {
            starts.push((offset, doc.name.as_str()));
            offset += len;
            text.push_str(&doc.text);
        }
    }

    let chars: Vec<char> = text.chars().collect();
    windows(&chars, options)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let owner = starts.partition_point(|(s, _)| *s <= start);
            Passage {
                content: chars[start..end].iter().collect(),
                sequence_index: i,
                source_id: owner
                    .checked_sub(1)
                    .map(|idx| starts[idx].1.to_string()),
            }
        })
        .collect()
}

/// Char ranges `[start, end)` of each passage.
fn windows(chars: &[char], options: &ChunkOptions) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut ranges = Vec::new();
    if len == 0 {
        return ranges;
    }
    let mut start = 0;
    loop {
        let limit = start + options.chunk_size;
        if limit >= len {
            ranges.push((start, len));
            break;
        }
        let end = cut_point(chars, start, limit, options);
        ranges.push((start, end));
        start = end - options.overlap;
    }
    ranges
}

/// Where to end the window `[start, limit)`. The result is always above
/// `start + overlap`, so the next window starts after this one.
fn cut_point(chars: &[char], start: usize, limit: usize, options: &ChunkOptions) -> usize {
    let floor = start + (options.overlap + 1).max(options.chunk_size / 2);
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let mut pos = limit;
        while pos >= floor && pos >= start + sep.len() {
            if chars[pos - sep.len()..pos] == sep[..] {
                return pos;
            }
            pos -= 1;
        }
    }
    limit
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    InvalidOverlap { chunk_size: usize, overlap: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, text: &str) -> Document {
        Document {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_text_has_no_passages() {
        assert!(split("", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_one_passage() {
        let p = split("One paragraph.", 100, 10).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].content, "One paragraph.");
        assert_eq!(p[0].sequence_index, 0);
    }

    #[test]
    fn text_of_exactly_chunk_size_is_one_passage() {
        let text = "x".repeat(50);
        assert_eq!(split(&text, 50, 5).unwrap().len(), 1);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(
            split("abc", 100, 150),
            Err(ChunkError::InvalidOverlap {
                chunk_size: 100,
                overlap: 150
            })
        ));
        assert!(split("abc", 100, 100).is_err());
        assert!(matches!(split("abc", 0, 0), Err(ChunkError::ZeroChunkSize)));
    }

    #[test]
    fn hard_cut_without_separators() {
        let text = "a".repeat(250);
        let p = split(&text, 100, 20).unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p[0].content.len(), 100);
        assert_eq!(p[1].content.len(), 100);
        // 0..100, 80..180, 160..250
        assert_eq!(p[2].content.len(), 90);
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let p = split(&text, 100, 0).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].content, format!("{}\n\n", "a".repeat(70)));
        assert_eq!(p[1].content, "b".repeat(70));
    }

    #[test]
    fn prefers_word_boundary_over_hard_cut() {
        let words = "lorem ipsum dolor sit amet ".repeat(10);
        let p = split(&words, 40, 5).unwrap();
        for pair in p.windows(2) {
            assert!(pair[0].content.ends_with(' ') || pair[0].content.len() == 40);
        }
    }

    #[test]
    fn adjacent_passages_share_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let p = split(&text, 120, 30).unwrap();
        assert!(p.len() > 1);
        for pair in p.windows(2) {
            let a: Vec<char> = pair[0].content.chars().collect();
            let b: Vec<char> = pair[1].content.chars().collect();
            assert_eq!(a[a.len() - 30..], b[..30]);
        }
    }

    #[test]
    fn counts_chars_not_bytes() {
        let text = "é".repeat(30);
        let p = split(&text, 10, 2).unwrap();
        assert!(p.iter().all(|x| x.content.chars().count() <= 10));
        assert_eq!(p[0].content.chars().count(), 10);
    }

    #[test]
    fn documents_are_concatenated_before_splitting() {
        let docs = vec![doc("a.txt", "first "), doc("empty.txt", ""), doc("b.txt", "second")];
        let p = chunk_documents(&docs, &ChunkOptions::default());
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].content, "first second");
        assert_eq!(p[0].source_id.as_deref(), Some("a.txt"));
    }

    #[test]
    fn source_id_is_document_where_passage_starts() {
        let docs = vec![doc("a.txt", &"a".repeat(100)), doc("b.txt", &"b".repeat(100))];
        let options = ChunkOptions::new(60, 10).unwrap();
        let p = chunk_documents(&docs, &options);
        assert_eq!(p.first().unwrap().source_id.as_deref(), Some("a.txt"));
        assert_eq!(p.last().unwrap().source_id.as_deref(), Some("b.txt"));
        let spanning = p
            .iter()
            .find(|x| x.content.contains('a') && x.content.contains('b'))
            .unwrap();
        assert_eq!(spanning.source_id.as_deref(), Some("a.txt"));
    }
}
