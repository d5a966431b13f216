//! Store configuration
//!
//! Stored as `store-config.json` inside the store root.

use crate::resources::ResourceConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "store-config.json";

/// Configuration for an on-disk workspace store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the metadata database and the blob keyspace.
    pub root: PathBuf,
    /// Resource limits applied by the governor.
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("wstore-data"),
            resources: ResourceConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("workspace.sqlite")
    }

    /// Path of the blob keyspace.
    pub fn blob_path(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// Load the config from a store root, falling back to defaults rooted there.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::new(root));
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read store config from {:?}", config_path))?;
        let config: StoreConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse store config JSON")?;
        config
            .resources
            .validate()
            .map_err(|e| anyhow!("Invalid resource configuration: {}", e))?;
        Ok(config)
    }

    /// Save the config into its root directory.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create store root {:?}", self.root))?;
        let config_path = self.root.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}
