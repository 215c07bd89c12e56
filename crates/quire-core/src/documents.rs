//! Turning uploaded documents into plain text.
//!
//! PDFs go through pdf-extract; anything else must already be UTF-8 text.
//! Only the extracted text is kept, and only until it has been chunked.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// File extensions picked up when scanning a directory.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "txt", "md", "markdown"];

/// An uploaded document: file name and raw bytes.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Text extracted from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub name: String,
    pub text: String,
}

/// Extract the text of a single document.
pub fn extract(raw: RawDocument) -> Result<Document, ExtractError> {
    let RawDocument { name, bytes } = raw;
    let text = if is_pdf(&name, &bytes) {
        debug!(document = %name, bytes = bytes.len(), "extracting pdf text");
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf {
            name: name.clone(),
            message: e.to_string(),
        })?
    } else {
        String::from_utf8(bytes).map_err(|e| ExtractError::NotUtf8 {
            name: name.clone(),
            source: e.utf8_error(),
        })?
    };
    Ok(Document { name, text })
}

fn is_pdf(name: &str, bytes: &[u8]) -> bool {
    let by_name = Path::new(name)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    by_name || bytes.starts_with(b"%PDF-")
}

/// Read a file from disk as an uploaded document named after the file.
pub fn read_document(path: &Path) -> Result<RawDocument, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Read(path.to_path_buf(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(RawDocument::new(name, bytes))
}

/// Scans `root` for supported documents. Hidden entries are skipped; paths come back sorted
/// so repeated ingests of the same folder chunk the text in the same order.
pub fn scan_documents(root: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    if !root.is_dir() {
        return Err(ExtractError::NotADirectory(root.to_path_buf()));
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| ExtractError::Walk(e.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_file() && is_supported(path) {
            paths.push(path.to_path_buf());
        }
    }
    Ok(paths)
}

/// True for a path [`scan_documents`] would pick up under `root`: a supported
/// extension and no hidden component below the root.
pub(crate) fn is_document_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let hidden = relative
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')));
    !hidden && is_supported(path)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{name}: not valid UTF-8 text: {source}")]
    NotUtf8 {
        name: String,
        source: std::str::Utf8Error,
    },
    #[error("{name}: could not extract PDF text: {message}")]
    Pdf { name: String, message: String },
    #[error("{name}: extraction aborted: {message}")]
    Aborted { name: String, message: String },
    #[error("no text could be extracted from the uploaded documents")]
    NoText,
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

impl ExtractError {
    /// Name of the offending document, when the failure belongs to one.
    pub fn document(&self) -> Option<&str> {
        match self {
            ExtractError::NotUtf8 { name, .. }
            | ExtractError::Pdf { name, .. }
            | ExtractError::Aborted { name, .. } => Some(name),
            ExtractError::Read(path, _) => path.file_name().and_then(|n| n.to_str()),
            _ => None,
        }
    }
}
