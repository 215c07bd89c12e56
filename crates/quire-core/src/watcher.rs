//! File watcher for a documents directory. Re-scans when files change.
//!
//! Every change hands the full list of documents to the callback; callers rebuild the
//! whole index from it, since indexes are never updated in place.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tracing::{debug, warn};

use crate::documents::{is_document_path, scan_documents, ExtractError};

/// Watches `root` and calls `on_change` with the current documents whenever a document
/// under it changes (debounced). Changes to other files, hidden entries, and anything
/// under an `ignore` path (e.g. an index saved inside `root`) do not count. Blocks until
/// the watcher is stopped (e.g. Ctrl+C). Returns Ok when stopped, Err on setup failure.
pub fn watch_documents(
    root: &Path,
    debounce: Duration,
    ignore: &[PathBuf],
    on_change: impl Fn(Result<Vec<PathBuf>, ExtractError>) + Send + 'static,
) -> Result<(), WatchError> {
    if !root.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }
    let root = root.canonicalize().map_err(WatchError::Canonicalize)?;
    let root_for_callback = root.clone();
    let ignored: Vec<PathBuf> = ignore
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let changed = events
                .iter()
                .filter(|e| is_watched(&root_for_callback, &ignored, &e.path))
                .count();
            if changed == 0 {
                debug!(events = events.len(), "ignoring changes outside the documents");
                return;
            }
            debug!(changed, "documents changed");
            on_change(scan_documents(&root_for_callback));
        }
        Err(e) => warn!(error = %e, "watcher error"),
    })
    .map_err(|e| WatchError::Notify(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Watch(e.to_string()))?;

    let (_tx, rx) = mpsc::channel::<()>();
    rx.recv().ok();
    Ok(())
}

fn is_watched(root: &Path, ignored: &[PathBuf], path: &Path) -> bool {
    !ignored.iter().any(|i| path.starts_with(i)) && is_document_path(root, path)
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}
