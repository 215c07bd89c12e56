//! Where quire stores its own data (config and the default index location).

use std::path::PathBuf;

/// Directory name of the index when no location is configured.
pub const DEFAULT_INDEX_DIR: &str = "faiss_index";

/// Returns the directory where quire stores config, the default index, and other app data.
/// On Linux: `~/.local/share/quire/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Quire", "quire")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Index location used when neither the config nor the caller names one.
pub fn default_index_location() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(DEFAULT_INDEX_DIR))
}
