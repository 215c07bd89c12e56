//! Persisted config (models, chunking, prompt, index location) in the app data directory.
//!
//! Credentials never live in the file: each service section names the environment
//! variable holding its API key, read once when the pipeline is built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::answer::{DEFAULT_PROMPT_TEMPLATE, DEFAULT_TEMPERATURE};
use crate::app_data;
use crate::chunks::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::embed::DEFAULT_BATCH_SIZE;
use crate::store::{Metric, DEFAULT_TOP_K};
use crate::{gemini, ollama};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
    pub index: IndexConfig,
}

/// Which remote service backs a stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    /// Provider default when unset.
    pub model: Option<String>,
    /// Provider default when unset.
    pub base_url: Option<String>,
    /// Environment variable holding the API key (Gemini only).
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            base_url: None,
            api_key_env: gemini::DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 60,
            max_retries: 3,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EmbeddingConfig {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.provider {
            Provider::Gemini => gemini::DEFAULT_EMBED_MODEL,
            Provider::Ollama => ollama::DEFAULT_EMBED_MODEL,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            base_url: None,
            api_key_env: gemini::DEFAULT_API_KEY_ENV.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.provider {
            Provider::Gemini => gemini::DEFAULT_CHAT_MODEL,
            Provider::Ollama => ollama::DEFAULT_CHAT_MODEL,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub metric: Metric,
    /// Cap on the prompt context, in chars. Unlimited when unset.
    pub max_context_chars: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            metric: Metric::default(),
            max_context_chars: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Must contain `{context}` and `{question}`.
    pub template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the index. Defaults to `faiss_index` in the app data directory.
    pub location: Option<PathBuf>,
}

impl Config {
    /// Configured index location, or the default one in the app data directory.
    pub fn index_location(&self) -> Result<PathBuf, ConfigError> {
        match &self.index.location {
            Some(path) => Ok(path.clone()),
            None => app_data::default_index_location().ok_or(ConfigError::NoDataDir),
        }
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    let path = data_dir.join(CONFIG_FILENAME);
    if !path.is_file() {
        return Config::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable config");
            Config::default()
        }
    }
}

/// Load config from an explicit file. Unlike [`load_config`], errors are returned.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&s).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<PathBuf, ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    let path = data_dir.join(CONFIG_FILENAME);
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)?;
    Ok(path)
}

/// Read an API key from the named environment variable.
pub fn api_key(env_var: &str) -> Result<String, ConfigError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingApiKey(env_var.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("API key not set: environment variable {0} is empty or missing")]
    MissingApiKey(String),
    #[error("invalid service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.chunking.chunk_size, 10_000);
        assert_eq!(config.chunking.overlap, 1_000);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.model(), "models/embedding-001");
        assert_eq!(config.generation.model(), "gemini-1.0-pro");
        assert!((config.generation.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            provider = "ollama"

            [retrieval]
            top_k = 8
            metric = "l2"

            [index]
            location = "/tmp/quire-index"
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.provider, Provider::Ollama);
        assert_eq!(config.embedding.model(), "nomic-embed-text");
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.generation.provider, Provider::Gemini);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.metric, Metric::L2);
        assert_eq!(
            config.index_location().unwrap(),
            PathBuf::from("/tmp/quire-index")
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = Config::default();
        config.prompt.template = "{context}\n\n{question}".to_string();
        config.retrieval.max_context_chars = Some(20_000);
        let s = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<Config>(&s).unwrap(), config);
    }

    #[test]
    fn explicit_file_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(load_config_from(&path), Err(ConfigError::Read(..))));
        std::fs::write(&path, "[chunking]\nchunk_size = \"big\"").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn missing_api_key_names_the_variable() {
        let err = api_key("QUIRE_TEST_KEY_THAT_IS_NOT_SET").unwrap_err();
        assert!(err.to_string().contains("QUIRE_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
