//! Disk registry with best-fit allocation.
//!
//! Holds the in-memory id → [`Disk`] map and writes the durable mount record
//! alongside each registration.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tracing::{debug, info};

use super::disk::{physical_path, Disk};
use super::error::{DiskError, FileError, VfsResult};
use super::types::{AccessMode, DiskId, DiskInfo, EntryId};
use crate::db::EntryDb;

/// Registry of mounted disks.
///
/// Disks are keyed by id in ascending order. Allocation visits them in that
/// order and only switches candidate on strictly less free space, so among
/// equally tight disks the lowest id wins.
pub struct DiskRegistry {
    disks: RwLock<BTreeMap<DiskId, Arc<Disk>>>,
}

impl std::fmt::Debug for DiskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRegistry")
            .field("disks", &self.disks.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DiskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            disks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Persist a mount record and register the disk.
    ///
    /// An id already registered in this process is rejected with
    /// [`DiskError::AlreadyMounted`]; nothing is written in that case. The
    /// durable record is upserted, so a disk recorded by an earlier run can be
    /// mounted again after a restart.
    pub fn mount(&self, db: &EntryDb, disk_id: DiskId, disk: Disk) -> VfsResult<()> {
        let mut disks = self.disks.write();
        if disks.contains_key(&disk_id) {
            return Err(DiskError::AlreadyMounted { disk_id }.into());
        }

        db.upsert_mount(disk_id, disk.mountpoint())?;
        info!(
            disk_id,
            mountpoint = disk.mountpoint(),
            total = disk.total_size(),
            free = disk.free_size(),
            "mounted disk"
        );
        disks.insert(disk_id, Arc::new(disk));
        Ok(())
    }

    /// Look up a mounted disk.
    pub fn by_id(&self, disk_id: DiskId) -> Result<Arc<Disk>, DiskError> {
        self.disks
            .read()
            .get(&disk_id)
            .cloned()
            .ok_or(DiskError::NotMounted { disk_id })
    }

    /// Best-fit allocation: the disk with the least free space that still
    /// has at least `required` bytes free.
    pub fn by_required_size(&self, required: u64) -> Result<(DiskId, Arc<Disk>), DiskError> {
        let disks = self.disks.read();
        if disks.is_empty() {
            return Err(DiskError::NoDiskMounted);
        }

        let mut best: Option<(DiskId, &Arc<Disk>, u64)> = None;
        let mut largest_free = 0;
        for (&id, disk) in disks.iter() {
            let free = disk.free_size();
            largest_free = largest_free.max(free);
            if free < required {
                continue;
            }
            if best.is_none_or(|(_, _, best_free)| free < best_free) {
                best = Some((id, disk, free));
            }
        }

        match best {
            Some((id, disk, free)) => {
                debug!(disk_id = id, required, free, "allocated disk");
                Ok((id, Arc::clone(disk)))
            }
            None => Err(DiskError::InsufficientSpace {
                required,
                largest_free,
            }),
        }
    }

    /// Capacity snapshot of every mounted disk, by id.
    pub fn disks(&self) -> Vec<DiskInfo> {
        self.disks
            .read()
            .iter()
            .map(|(&id, disk)| {
                let total = disk.total_size();
                let used = disk.used_size();
                DiskInfo {
                    id,
                    mountpoint: disk.mountpoint().to_string(),
                    total,
                    used,
                    free: total.saturating_sub(used),
                    read_only: disk.fs().read_only(),
                }
            })
            .collect()
    }

    /// Number of mounted disks.
    pub fn len(&self) -> usize {
        self.disks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.read().is_empty()
    }

    /// Fails unless `disk_id` is mounted and accepts removals.
    pub fn check_removable(&self, disk_id: DiskId, entry_id: EntryId) -> VfsResult<()> {
        let disk = self.by_id(disk_id)?;
        if disk.fs().read_only() {
            let source = io::Error::new(io::ErrorKind::PermissionDenied, "disk is read-only");
            return Err(FileError::io(entry_id, AccessMode::Write, source).into());
        }
        Ok(())
    }

    /// Remove an entry's physical object from its disk.
    ///
    /// A missing object is not an error: the row may belong to a file whose
    /// physical open never succeeded.
    pub fn remove_physical(&self, disk_id: DiskId, entry_id: EntryId) -> VfsResult<()> {
        let disk = self.by_id(disk_id)?;
        let path = physical_path(entry_id);
        if !disk.fs().exists(&path) {
            debug!(disk_id, entry_id, "no physical object to remove");
            return Ok(());
        }
        disk.fs()
            .remove(&path)
            .map_err(|source| FileError::io(entry_id, AccessMode::Write, source))?;
        debug!(disk_id, entry_id, "removed physical object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryBackend;
    use crate::vfs::ops::PhysicalFs;
    use crate::vfs::VfsError;
    use std::path::Path;

    fn memory_disk(name: &str, capacity: u64) -> (Disk, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::with_capacity(capacity));
        (Disk::from_backend(name, backend.clone()), backend)
    }

    fn db() -> EntryDb {
        EntryDb::in_memory().unwrap()
    }

    #[test]
    fn test_mount_and_lookup() {
        let db = db();
        let registry = DiskRegistry::new();
        let (disk, _) = memory_disk("/mnt/a", 100);
        registry.mount(&db, 1, disk).unwrap();

        assert_eq!(registry.by_id(1).unwrap().mountpoint(), "/mnt/a");
        assert!(matches!(
            registry.by_id(2),
            Err(DiskError::NotMounted { disk_id: 2 })
        ));
        assert_eq!(db.mount_records().unwrap().len(), 1);
    }

    #[test]
    fn test_remount_rejected() {
        let db = db();
        let registry = DiskRegistry::new();
        registry.mount(&db, 1, memory_disk("/mnt/a", 100).0).unwrap();

        let result = registry.mount(&db, 1, memory_disk("/mnt/other", 100).0);
        assert!(matches!(
            result,
            Err(VfsError::Disk(DiskError::AlreadyMounted { disk_id: 1 }))
        ));
        assert_eq!(registry.by_id(1).unwrap().mountpoint(), "/mnt/a");
        assert_eq!(db.mount_records().unwrap()[0].mountpoint, "/mnt/a");
    }

    #[test]
    fn test_best_fit() {
        let db = db();
        let registry = DiskRegistry::new();
        registry.mount(&db, 1, memory_disk("/a", 100).0).unwrap();
        registry.mount(&db, 2, memory_disk("/b", 50).0).unwrap();
        registry.mount(&db, 3, memory_disk("/c", 30).0).unwrap();

        let (id, disk) = registry.by_required_size(40).unwrap();
        assert_eq!(id, 2);
        assert_eq!(disk.mountpoint(), "/b");

        assert_eq!(registry.by_required_size(30).unwrap().0, 3);
        assert_eq!(registry.by_required_size(0).unwrap().0, 3);
        assert_eq!(registry.by_required_size(100).unwrap().0, 1);
    }

    #[test]
    fn test_best_fit_tie_goes_to_lowest_id() {
        let db = db();
        let registry = DiskRegistry::new();
        registry.mount(&db, 9, memory_disk("/z", 64).0).unwrap();
        registry.mount(&db, 4, memory_disk("/y", 64).0).unwrap();
        registry.mount(&db, 6, memory_disk("/x", 64).0).unwrap();

        assert_eq!(registry.by_required_size(10).unwrap().0, 4);
    }

    #[test]
    fn test_allocation_errors() {
        let db = db();
        let registry = DiskRegistry::new();
        assert!(matches!(
            registry.by_required_size(1),
            Err(DiskError::NoDiskMounted)
        ));

        registry.mount(&db, 1, memory_disk("/a", 10).0).unwrap();
        registry.mount(&db, 2, memory_disk("/b", 20).0).unwrap();
        assert!(matches!(
            registry.by_required_size(21),
            Err(DiskError::InsufficientSpace {
                required: 21,
                largest_free: 20
            })
        ));
    }

    #[test]
    fn test_allocation_sees_live_usage() {
        let db = db();
        let registry = DiskRegistry::new();
        let (small, small_backend) = memory_disk("/small", 50);
        registry.mount(&db, 1, small).unwrap();
        registry.mount(&db, 2, memory_disk("/big", 100).0).unwrap();
        assert_eq!(registry.by_required_size(40).unwrap().0, 1);

        use std::io::Write;
        small_backend
            .open(Path::new("/99"), AccessMode::Write)
            .unwrap()
            .write_all(&[0u8; 20])
            .unwrap();
        assert_eq!(registry.by_required_size(40).unwrap().0, 2);
    }

    #[test]
    fn test_disks_snapshot() {
        let db = db();
        let registry = DiskRegistry::new();
        registry.mount(&db, 2, memory_disk("/b", 20).0).unwrap();
        registry.mount(&db, 1, memory_disk("/a", 10).0).unwrap();

        let infos = registry.disks();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, 1);
        assert_eq!(infos[1].free, 20);
    }

    #[test]
    fn test_check_removable() {
        let db = db();
        let registry = DiskRegistry::new();
        let (disk, backend) = memory_disk("/a", 100);
        registry.mount(&db, 1, disk).unwrap();

        registry.check_removable(1, 5).unwrap();
        backend.set_read_only(true);
        assert!(matches!(
            registry.check_removable(1, 5),
            Err(VfsError::File(FileError::Io { .. }))
        ));
        assert!(matches!(
            registry.check_removable(2, 5),
            Err(VfsError::Disk(DiskError::NotMounted { disk_id: 2 }))
        ));
    }

    #[test]
    fn test_remove_physical() {
        let db = db();
        let registry = DiskRegistry::new();
        let (disk, backend) = memory_disk("/a", 100);
        registry.mount(&db, 1, disk).unwrap();

        backend.open(Path::new("/5"), AccessMode::Write).unwrap();
        registry.remove_physical(1, 5).unwrap();
        assert!(!backend.exists(Path::new("/5")));

        // Already gone: no-op.
        registry.remove_physical(1, 5).unwrap();

        assert!(matches!(
            registry.remove_physical(8, 5),
            Err(VfsError::Disk(DiskError::NotMounted { disk_id: 8 }))
        ));
    }
}
