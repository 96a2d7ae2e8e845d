//! RON configuration for bootstrapping a namespace.
//!
//! ```ron
//! (
//!     database: Some("/var/lib/diskvfs/meta.db"),
//!     disks: [
//!         (id: 1, mountpoint: "/mnt/sd0", root: "/media/sd0/vfs", capacity: 32000000000),
//!         (id: 2, mountpoint: "/mnt/usb", root: "/media/usb/vfs", capacity: 8000000000, read_only: true),
//!     ],
//! )
//! ```
//!
//! `database: None` keeps the metadata in memory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vfs::DiskId;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One disk to mount at start-up, backed by a local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub id: DiskId,
    pub mountpoint: String,
    /// Host directory holding the disk's objects.
    pub root: PathBuf,
    /// Quota in bytes reported as the disk's total size.
    pub capacity: u64,
    #[serde(default)]
    pub read_only: bool,
}

/// Namespace configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsConfig {
    /// SQLite database path (`None` = in-memory).
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
}

impl VfsConfig {
    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: VfsConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Reject configs the registry would refuse halfway through start-up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for disk in &self.disks {
            if !seen.insert(disk.id) {
                return Err(ConfigError::Invalid(format!(
                    "disk id {} listed twice",
                    disk.id
                )));
            }
            if disk.mountpoint.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "disk {} has an empty mountpoint",
                    disk.id
                )));
            }
        }
        Ok(())
    }
}
