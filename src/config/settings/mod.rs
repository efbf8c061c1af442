#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::vector::{StoreBackendKind, StoreConfig};
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::indexer::IndexingConfig;
use crate::query::RetrievalConfig;

const CONFIG_DIR_NAME: &str = ".ultimate-advisor";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    /// Folder scanned by `load` when no directory is given. Relative paths resolve
    /// against the base directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_folder: Option<PathBuf>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub chat_model: String,
    pub batch_size: u32,
    /// Used only when the live dimension probe fails
    pub embedding_dimension: u32,
    pub request_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text:latest".to_string(),
            chat_model: "llama3.2:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid request timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidRequestTimeout(u64),
    #[error("Invalid table name: {0:?} (letters, digits and underscores, not starting with a digit)")]
    InvalidTableName(String),
    #[error("Invalid connection pool size: {0} (must be between 1 and 100)")]
    InvalidPoolSize(u32),
    #[error("Invalid chunk size: {0} (must be between 16 and 8192 tokens)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    InvalidChunkOverlap(usize, usize),
    #[error("Chunk separators cannot be empty")]
    EmptySeparator,
    #[error("Invalid similarity cutoff: {0} (must be between 0.0 and 1.0)")]
    InvalidSimilarityCutoff(f32),
    #[error("Invalid over-fetch factor: {0} (must be between 1 and 10)")]
    InvalidOverFetchFactor(usize),
    #[error("Invalid candidate cap: {0} (must be between 1 and 200)")]
    InvalidMaxCandidates(usize),
    #[error("Invalid context window: {0} tokens (must be at least 256)")]
    InvalidContextWindow(usize),
    #[error("Invalid verification attempts: {0} (must be between 1 and 20)")]
    InvalidVerifyAttempts(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Defaults rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            ollama: OllamaConfig::default(),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            indexing: IndexingConfig::default(),
            data_folder: None,
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// `~/.ultimate-advisor`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.store.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.indexing.validate()?;
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// SQLite database holding query history
    #[inline]
    pub fn history_database_path(&self) -> PathBuf {
        self.get_base_dir().join("history.db")
    }

    /// Directory of the embedded LanceDB store
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn data_folder_path(&self) -> PathBuf {
        match &self.data_folder {
            Some(folder) if folder.is_absolute() => folder.clone(),
            Some(folder) => self.get_base_dir().join(folder),
            None => self.get_base_dir().join("data"),
        }
    }

    #[inline]
    pub fn log_dir_path(&self) -> PathBuf {
        self.get_base_dir().join("logs")
    }

    #[inline]
    pub fn backend_kind(&self) -> StoreBackendKind {
        self.store.backend
    }
}

const PROTOCOLS: [&str; 2] = ["http", "https"];
const BATCH_SIZES: std::ops::RangeInclusive<u32> = 1..=1000;
const EMBEDDING_DIMENSIONS: std::ops::RangeInclusive<u32> = 1..=8192;
const REQUEST_TIMEOUTS: std::ops::RangeInclusive<u64> = 1..=3600;

fn check_protocol(protocol: &str) -> Result<(), ConfigError> {
    if PROTOCOLS.contains(&protocol) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProtocol(protocol.to_string()))
    }
}

fn check_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        Err(ConfigError::InvalidPort(port))
    } else {
        Ok(())
    }
}

fn check_model(model: &str) -> Result<(), ConfigError> {
    if model.trim().is_empty() {
        Err(ConfigError::InvalidModel(model.to_string()))
    } else {
        Ok(())
    }
}

fn check_batch_size(batch_size: u32) -> Result<(), ConfigError> {
    if BATCH_SIZES.contains(&batch_size) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBatchSize(batch_size))
    }
}

fn check_dimension(dimension: u32) -> Result<(), ConfigError> {
    if EMBEDDING_DIMENSIONS.contains(&dimension) {
        Ok(())
    } else {
        Err(ConfigError::InvalidEmbeddingDimension(dimension))
    }
}

fn build_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    let raw = format!("{protocol}://{host}:{port}");
    Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(raw))
}

impl OllamaConfig {
    /// Setters below apply the same rules one field at a time
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_protocol(&self.protocol)?;
        self.ollama_url()?;
        check_port(self.port)?;
        check_model(&self.embedding_model)?;
        check_model(&self.chat_model)?;
        check_batch_size(self.batch_size)?;
        check_dimension(self.embedding_dimension)?;
        if !REQUEST_TIMEOUTS.contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidRequestTimeout(
                self.request_timeout_secs,
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        build_url(&self.protocol, &self.host, self.port)
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        check_protocol(&protocol)?;
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        build_url(&self.protocol, &host, self.port)?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        check_port(port)?;
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        check_model(&model)?;
        self.embedding_model = model;
        Ok(())
    }

    #[inline]
    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        check_model(&model)?;
        self.chat_model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        check_batch_size(batch_size)?;
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        check_dimension(dimension)?;
        self.embedding_dimension = dimension;
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted
#[inline]
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
