//! A mounted disk: one physical backend plus its live capacity.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::ops::PhysicalFs;
use super::types::EntryId;

/// Live capacity source for a disk.
///
/// Both values are read on every call. Implementations must not cache them,
/// since allocation decisions rely on the value at the instant of the call.
pub trait DiskCapacity: Send + Sync {
    fn total_size(&self) -> u64;
    fn used_size(&self) -> u64;
}

/// Disk-relative path of an entry's physical object.
///
/// The namespace on each disk is flat and keyed by entry id, so renames never
/// touch physical storage and names never need escaping.
pub fn physical_path(entry_id: EntryId) -> PathBuf {
    PathBuf::from(format!("/{entry_id}"))
}

/// Handle to one mounted physical backend.
///
/// The disk id is held by the registry, not by the disk.
pub struct Disk {
    mountpoint: String,
    fs: Arc<dyn PhysicalFs>,
    capacity: Arc<dyn DiskCapacity>,
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
            .field("mountpoint", &self.mountpoint)
            .field("total", &self.total_size())
            .field("used", &self.used_size())
            .finish()
    }
}

impl Disk {
    /// Create a disk from separate storage and capacity capabilities.
    pub fn new(
        mountpoint: impl Into<String>,
        fs: Arc<dyn PhysicalFs>,
        capacity: Arc<dyn DiskCapacity>,
    ) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            fs,
            capacity,
        }
    }

    /// Create a disk from a backend that reports its own capacity.
    pub fn from_backend<B>(mountpoint: impl Into<String>, backend: Arc<B>) -> Self
    where
        B: PhysicalFs + DiskCapacity + 'static,
    {
        let fs: Arc<dyn PhysicalFs> = backend.clone();
        let capacity: Arc<dyn DiskCapacity> = backend;
        Self::new(mountpoint, fs, capacity)
    }

    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    pub fn fs(&self) -> &Arc<dyn PhysicalFs> {
        &self.fs
    }

    pub fn total_size(&self) -> u64 {
        self.capacity.total_size()
    }

    pub fn used_size(&self) -> u64 {
        self.capacity.used_size()
    }

    /// `total - used`, computed fresh on each call.
    pub fn free_size(&self) -> u64 {
        self.total_size().saturating_sub(self.used_size())
    }
}
