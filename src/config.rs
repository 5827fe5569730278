//! Configuration management for mailvault
//!
//! Settings live in `.mailvault/config.yaml`. Every field has a default, so a
//! missing file or a partial file is fine.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::paths::{DataPaths, CONFIG_FILE, DATA_DIR};
use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational store file name, relative to the data dir
    pub database: String,

    /// Vector index directory, relative to the data dir
    pub index_dir: String,

    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub context: ContextConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "mail.db".to_string(),
            index_dir: "vector_index".to_string(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            context: ContextConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Vector dimension D of the index
    pub dimension: usize,

    /// Input is cut to this many characters before vectorizing
    pub max_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: crate::EMBEDDING_DIM,
            max_chars: crate::search::embedding::DEFAULT_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 10 }
    }
}

/// Thread context rendering for the summarization layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Keep only the last N messages of a thread
    pub max_messages: usize,

    /// Bodies longer than this are cut and suffixed with "..."
    pub body_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 5,
            body_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when MAILVAULT_LOG / RUST_LOG are unset
    pub level: String,

    /// Emit JSON lines instead of human-readable logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load `<root>/.mailvault/config.yaml`, falling back to defaults when absent
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(DATA_DIR).join(CONFIG_FILE);
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this config to its location under `root`
    pub fn save(&self, root: &Path) -> Result<()> {
        let paths = DataPaths::with_config(root.to_path_buf(), self);
        std::fs::create_dir_all(&paths.data_dir)?;
        std::fs::write(&paths.config, serde_yaml::to_string(self)?)?;
        info!("Wrote config to {}", paths.config.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be > 0".to_string()));
        }
        if self.embedding.max_chars == 0 {
            return Err(Error::Config("embedding.max_chars must be > 0".to_string()));
        }
        if self.database.is_empty() || self.index_dir.is_empty() {
            return Err(Error::Config(
                "database and index_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
