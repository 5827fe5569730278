use std::path::PathBuf;

use crate::config::Config;

/// Directory under the root that holds all mailvault state
pub const DATA_DIR: &str = ".mailvault";
pub const CONFIG_FILE: &str = "config.yaml";
pub const INDEX_FILE: &str = "email_embeddings.index";
pub const METADATA_FILE: &str = "email_metadata.json";

pub struct DataPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub config: PathBuf,
    pub database: PathBuf,
    pub index_dir: PathBuf,
    pub index_file: PathBuf,
    pub metadata_file: PathBuf,
}

impl DataPaths {
    /// Paths with the default file names
    pub fn from_root(root: PathBuf) -> Self {
        Self::with_config(root, &Config::default())
    }

    pub fn with_config(root: PathBuf, config: &Config) -> Self {
        let data_dir = root.join(DATA_DIR);
        let index_dir = data_dir.join(&config.index_dir);
        Self {
            config: data_dir.join(CONFIG_FILE),
            database: data_dir.join(&config.database),
            index_file: index_dir.join(INDEX_FILE),
            metadata_file: index_dir.join(METADATA_FILE),
            index_dir,
            data_dir,
            root,
        }
    }

    pub fn required_dirs(&self) -> Vec<(&PathBuf, &str)> {
        vec![
            (&self.data_dir, "Data directory"),
            (&self.index_dir, "Vector index"),
        ]
    }
}
