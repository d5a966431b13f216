//! Resource limits and payload spooling
//!
//! The governor owns the size limits and decides, per call, whether payloads
//! stay in memory or are spooled to temporary files. Spooled files are
//! removed when the owning [`SpooledData`] is dropped, whatever the exit path.

use crate::error::{Result, SizeLimitError, WorkspaceError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tempfile::NamedTempFile;

const MB: u64 = 1_000_000;
const GB: u64 = 1_000_000_000;

/// Size limits and memory thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// A save batch larger than this is spooled to disk
    pub max_incoming_data_memory_usage: u64,
    /// A read whose total is larger than this is spooled to disk
    pub max_returned_data_memory_usage: u64,
    /// Maximum total bytes one read call may return
    pub max_return_size: u64,
    /// Maximum size of a single object's data
    pub max_object_size: u64,
    /// Disk budget for spooled payloads
    pub max_disk_use: u64,
    pub max_metadata_size: u64,
    pub max_provenance_size: u64,
    pub max_subdata_size: u64,
    /// Workspace descriptions are truncated to this many characters
    pub max_description_length: usize,
    /// Directory for spooled payloads; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_incoming_data_memory_usage: 100 * MB,
            max_returned_data_memory_usage: 300 * MB,
            max_return_size: GB,
            max_object_size: GB,
            max_disk_use: 4 * GB,
            max_metadata_size: 16_000,
            max_provenance_size: 1_000_000,
            max_subdata_size: 15_000_000,
            max_description_length: 1000,
            temp_dir: None,
        }
    }
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_object_size < 1 {
            return Err(WorkspaceError::illegal("Maximum object size must be at least 1"));
        }
        if self.max_return_size < 1 {
            return Err(WorkspaceError::illegal(
                "Maximum object(s) return size per call must be at least 1",
            ));
        }
        let twice_disk = self.max_disk_use.saturating_mul(2);
        if self.max_return_size >= twice_disk {
            return Err(WorkspaceError::illegal(format!(
                "Maximum object(s) return size per call must be < 2x the max disk use {}B",
                twice_disk
            )));
        }
        if self.max_incoming_data_memory_usage < 1 {
            return Err(WorkspaceError::illegal(
                "Maximum incoming data memory usage must be at least 1",
            ));
        }
        if self.max_returned_data_memory_usage < 1 {
            return Err(WorkspaceError::illegal(
                "Maximum returned data memory usage must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A payload held in memory or in a temporary file
#[derive(Debug)]
pub struct SpooledData {
    inner: Spool,
    size: u64,
}

#[derive(Debug)]
enum Spool {
    Memory(Bytes),
    File(NamedTempFile),
}

impl SpooledData {
    pub fn in_memory(data: Bytes) -> Self {
        let size = data.len() as u64;
        Self { inner: Spool::Memory(data), size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.inner, Spool::File(_))
    }

    /// Reads the full payload
    pub fn bytes(&self) -> Result<Bytes> {
        match &self.inner {
            Spool::Memory(b) => Ok(b.clone()),
            Spool::File(f) => {
                let mut file = f.reopen()?;
                file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::with_capacity(self.size as usize);
                file.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Parses the payload as JSON
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.bytes()?)?)
    }
}

/// Holds the resource configuration and applies it
pub struct ResourceGovernor {
    config: RwLock<ResourceConfig>,
    temp_files_created: AtomicU64,
}

impl ResourceGovernor {
    pub fn new(config: ResourceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            temp_files_created: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> ResourceConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_config(&self, config: ResourceConfig) -> Result<()> {
        config.validate()?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        Ok(())
    }

    pub fn set_max_object_size(&self, size: u64) -> Result<()> {
        let mut config = self.config();
        config.max_object_size = size;
        self.set_config(config)
    }

    pub fn set_max_return_size(&self, size: u64) -> Result<()> {
        let mut config = self.config();
        config.max_return_size = size;
        self.set_config(config)
    }

    /// Number of temporary files created since startup
    pub fn temp_files_created(&self) -> u64 {
        self.temp_files_created.load(Ordering::Relaxed)
    }

    pub fn check_metadata(&self, meta: &BTreeMap<String, String>) -> Result<()> {
        let limit = self.config().max_metadata_size;
        let size = metadata_size(meta)?;
        if size > limit {
            return Err(SizeLimitError::Metadata { size, limit }.into());
        }
        Ok(())
    }

    pub fn check_updated_metadata(&self, meta: &BTreeMap<String, String>) -> Result<()> {
        let limit = self.config().max_metadata_size;
        let size = metadata_size(meta)?;
        if size > limit {
            return Err(SizeLimitError::UpdatedMetadata { size, limit }.into());
        }
        Ok(())
    }

    pub fn check_object_size(&self, position: usize, size: u64) -> Result<()> {
        let limit = self.config().max_object_size;
        if size > limit {
            return Err(SizeLimitError::ObjectData { position, size, limit }.into());
        }
        Ok(())
    }

    pub fn check_provenance_size(&self, position: usize, size: u64) -> Result<()> {
        let limit = self.config().max_provenance_size;
        if size > limit {
            return Err(SizeLimitError::Provenance { position, size, limit }.into());
        }
        Ok(())
    }

    pub fn check_subdata_size(&self, position: usize, size: u64) -> Result<()> {
        let limit = self.config().max_subdata_size;
        if size > limit {
            return Err(SizeLimitError::Subdata { position, size, limit }.into());
        }
        Ok(())
    }

    /// Fails fast when a read would return more than the configured maximum
    pub fn check_return_size(&self, size: u64) -> Result<()> {
        let limit = self.config().max_return_size;
        if size > limit {
            return Err(SizeLimitError::ReturnSize { size, limit }.into());
        }
        Ok(())
    }

    pub fn truncate_description(&self, description: Option<&str>) -> Option<String> {
        let max = self.config().max_description_length;
        description.map(|d| d.chars().take(max).collect())
    }

    /// Whether a save batch of `total` bytes stays in memory
    pub fn incoming_in_memory(&self, total: u64) -> bool {
        total <= self.config().max_incoming_data_memory_usage
    }

    /// Whether a read returning `total` bytes stays in memory
    pub fn returned_in_memory(&self, total: u64) -> bool {
        total <= self.config().max_returned_data_memory_usage
    }

    /// Wraps `data` according to the decision made for its batch
    pub fn spool(&self, data: Bytes, in_memory: bool) -> Result<SpooledData> {
        if in_memory {
            return Ok(SpooledData::in_memory(data));
        }
        let config = self.config();
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("wstore.").suffix(".json");
            b
        };
        let mut file = match &config.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        self.temp_files_created.fetch_add(1, Ordering::Relaxed);
        file.write_all(&data)?;
        file.flush()?;
        tracing::debug!(path = ?file.path(), size = data.len(), "spooled payload to disk");
        Ok(SpooledData {
            inner: Spool::File(file),
            size: data.len() as u64,
        })
    }
}

/// Serialized size of a metadata map
pub fn metadata_size(meta: &BTreeMap<String, String>) -> Result<u64> {
    Ok(serde_json::to_vec(meta)?.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        ResourceConfig::default().validate().unwrap();
    }

    #[test]
    fn test_config_validation() {
        let governor = ResourceGovernor::new(ResourceConfig::default()).unwrap();
        assert_eq!(
            governor.set_max_object_size(0).unwrap_err().to_string(),
            "Maximum object size must be at least 1"
        );
        assert_eq!(
            governor.set_max_return_size(0).unwrap_err().to_string(),
            "Maximum object(s) return size per call must be at least 1"
        );
        let err = governor.set_max_return_size(8 * GB).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Maximum object(s) return size per call must be < 2x the max disk use 8000000000B"
        );
        governor.set_max_return_size(20).unwrap();
        assert_eq!(governor.config().max_return_size, 20);
    }

    #[test]
    fn test_metadata_limit() {
        let governor = ResourceGovernor::new(ResourceConfig::default()).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert("a".to_string(), "b".repeat(20_000));
        let size = metadata_size(&meta).unwrap();
        let err = governor.check_metadata(&meta).unwrap_err();
        assert_eq!(err.to_string(), format!("Metadata size of {} is > 16000 bytes", size));
        let err = governor.check_updated_metadata(&meta).unwrap_err();
        assert!(err.to_string().starts_with("Updated metadata size of"));
        assert!(governor.check_metadata(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_return_size_message() {
        let governor = ResourceGovernor::new(ResourceConfig::default()).unwrap();
        governor.set_max_return_size(19).unwrap();
        assert_eq!(
            governor.check_return_size(20).unwrap_err().to_string(),
            "Too much data requested from the workspace at once; data requested including \
             potential subsets is 20B which exceeds maximum of 19."
        );
        assert!(governor.check_return_size(19).is_ok());
    }

    #[test]
    fn test_description_truncated_by_chars() {
        let governor = ResourceGovernor::new(ResourceConfig::default()).unwrap();
        let long = "é".repeat(2000);
        let out = governor.truncate_description(Some(&long)).unwrap();
        assert_eq!(out.chars().count(), 1000);
        assert_eq!(governor.truncate_description(None), None);
    }

    #[test]
    fn test_spool_to_file_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let config = ResourceConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let governor = ResourceGovernor::new(config).unwrap();

        let data = Bytes::from_static(b"{\"z\":1}");
        let spooled = governor.spool(data.clone(), false).unwrap();
        assert!(spooled.is_file_backed());
        assert_eq!(spooled.bytes().unwrap(), data);
        assert_eq!(spooled.json().unwrap()["z"], 1);
        assert_eq!(governor.temp_files_created(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(spooled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let in_mem = governor.spool(data, true).unwrap();
        assert!(!in_mem.is_file_backed());
        assert_eq!(governor.temp_files_created(), 1);
    }

    #[test]
    fn test_memory_thresholds() {
        let config = ResourceConfig {
            max_incoming_data_memory_usage: 13,
            max_returned_data_memory_usage: 10,
            ..Default::default()
        };
        let governor = ResourceGovernor::new(config).unwrap();
        assert!(governor.incoming_in_memory(13));
        assert!(!governor.incoming_in_memory(14));
        assert!(governor.returned_in_memory(10));
        assert!(!governor.returned_in_memory(11));
    }
}
