//! Namespace engine.
//!
//! Owns the entry tree stored in [`EntryDb`] and orchestrates entry lifecycle
//! across the metadata store and the disks in the [`DiskRegistry`].
//!
//! Permission model:
//!
//! - Owning an entry, or any of its ancestors, grants every mode on it.
//! - An explicit grant gives one user one mode on one exact entry. Grants do
//!   not propagate to descendants.
//! - `remove`, `rename`, `grant` and `revoke` require ownership; a write
//!   grant is never enough.
//!
//! Physical objects are only ever removed by the cleanup hook installed on
//! the store, so every way a file row disappears (explicit remove, cascade
//! from a removed directory, compensation after a failed open, ad-hoc SQL)
//! removes the object too.
//!
//! There is no transaction spanning the store and the disks. A crash between
//! creating a row and opening its object, or between the hook removing an
//! object and the row delete committing, can leave the two out of step.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::VfsConfig;
use crate::db::{EntryDb, EntryRow, HookError};
use crate::vfs::{
    physical_path, AccessMode, Disk, DiskId, DiskRegistry, EntryId, EntryMetadata, FileAccess,
    FileError, LocalBackend, PhysicalFile, UserId, VfsError, VfsResult,
};

/// Name given to every personal root.
pub const ROOT_NAME: &str = "/";

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// The namespace engine.
///
/// All operations are synchronous. The engine owns its SQLite connection, so
/// it is `Send` but not `Sync`; callers sharing it must serialize whole
/// operations.
#[derive(Debug)]
pub struct Namespace {
    db: EntryDb,
    disks: Arc<DiskRegistry>,
}

impl Namespace {
    /// Wrap a metadata store and install the physical-cleanup hook.
    pub fn new(db: EntryDb) -> VfsResult<Self> {
        let disks = Arc::new(DiskRegistry::new());
        let hook_disks = Arc::clone(&disks);
        db.on_file_delete(move |disk_id, entry_id| {
            hook_disks
                .remove_physical(disk_id, entry_id)
                .map_err(|e| Box::new(e) as HookError)
        })?;
        Ok(Self { db, disks })
    }

    /// Open or create a namespace backed by a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> VfsResult<Self> {
        Self::new(EntryDb::open(path)?)
    }

    /// Create a namespace with in-memory metadata.
    pub fn in_memory() -> VfsResult<Self> {
        Self::new(EntryDb::in_memory()?)
    }

    /// Open the configured database and mount every configured disk.
    pub fn from_config(config: &VfsConfig) -> VfsResult<Self> {
        config.validate()?;
        let namespace = match &config.database {
            Some(path) => Self::open(path)?,
            None => Self::in_memory()?,
        };
        for disk in &config.disks {
            std::fs::create_dir_all(&disk.root).map_err(crate::config::ConfigError::from)?;
            let backend = if disk.read_only {
                LocalBackend::read_only(&disk.root, disk.capacity)
            } else {
                LocalBackend::new(&disk.root, disk.capacity)
            };
            namespace.mount(
                disk.id,
                Disk::from_backend(disk.mountpoint.clone(), Arc::new(backend)),
            )?;
        }
        Ok(namespace)
    }

    /// The metadata store.
    pub fn db(&self) -> &EntryDb {
        &self.db
    }

    /// The disk registry.
    pub fn disks(&self) -> &DiskRegistry {
        &self.disks
    }

    /// Mount a disk under `disk_id`. See [`DiskRegistry::mount`].
    pub fn mount(&self, disk_id: DiskId, disk: Disk) -> VfsResult<()> {
        self.disks.mount(&self.db, disk_id, disk)
    }

    fn row(&self, entry_id: EntryId, mode: AccessMode) -> VfsResult<EntryRow> {
        self.db
            .entry(entry_id)?
            .ok_or_else(|| FileError::not_found(entry_id, mode).into())
    }

    /// Walk from `entry_id` towards its root, stopping at the first node
    /// `matches` accepts. The root is checked before giving up.
    fn walk_up<F>(
        &self,
        entry_id: EntryId,
        mode: AccessMode,
        user_id: UserId,
        mut matches: F,
    ) -> VfsResult<bool>
    where
        F: FnMut(&EntryRow) -> VfsResult<bool>,
    {
        let mut current = Some(entry_id);
        while let Some(id) = current {
            let row = self
                .db
                .entry(id)?
                .ok_or_else(|| FileError::not_found(entry_id, mode).with_user(user_id))?;
            if matches(&row)? {
                return Ok(true);
            }
            current = row.parent_id;
        }
        Ok(false)
    }

    // =========================================================================
    // Permission resolution
    // =========================================================================

    /// Returns true if `user_id` owns `entry_id` or any ancestor, or holds an
    /// explicit `mode` grant on `entry_id` itself. Grants on ancestors are
    /// not consulted.
    pub fn has_permission(
        &self,
        entry_id: EntryId,
        user_id: UserId,
        mode: AccessMode,
    ) -> VfsResult<bool> {
        self.walk_up(entry_id, mode, user_id, |row| {
            if row.owner_id == user_id {
                return Ok(true);
            }
            Ok(row.id == entry_id && self.db.has_grant(user_id, row.id, mode)?)
        })
    }

    /// Returns true if `user_id` owns `entry_id` or any ancestor. Grants are
    /// ignored.
    pub fn has_ownership(&self, entry_id: EntryId, user_id: UserId) -> VfsResult<bool> {
        self.walk_up(entry_id, AccessMode::Write, user_id, |row| {
            Ok(row.owner_id == user_id)
        })
    }

    fn require_ownership(&self, entry_id: EntryId, user_id: UserId) -> VfsResult<()> {
        if self.has_ownership(entry_id, user_id)? {
            Ok(())
        } else {
            Err(FileError::permission_denied(entry_id, AccessMode::Write, user_id).into())
        }
    }

    fn require_writable_directory(&self, parent_id: EntryId, user_id: UserId) -> VfsResult<()> {
        if !self.has_permission(parent_id, user_id, AccessMode::Write)? {
            return Err(FileError::permission_denied(parent_id, AccessMode::Write, user_id).into());
        }
        if !self.row(parent_id, AccessMode::Write)?.is_directory() {
            return Err(FileError::not_a_directory(parent_id, AccessMode::Write)
                .with_user(user_id)
                .into());
        }
        Ok(())
    }

    // =========================================================================
    // Tree queries
    // =========================================================================

    /// Ids from the root down to `entry_id`, inclusive.
    pub fn virtual_path(&self, entry_id: EntryId) -> VfsResult<Vec<EntryId>> {
        let mut path = Vec::new();
        let mut current = Some(entry_id);
        while let Some(id) = current {
            let row = self
                .db
                .entry(id)?
                .ok_or(FileError::not_found(entry_id, AccessMode::Read))?;
            path.push(row.id);
            current = row.parent_id;
        }
        path.reverse();
        Ok(path)
    }

    /// The personal root of `user_id`.
    pub fn root_directory(&self, user_id: UserId) -> VfsResult<EntryId> {
        self.db.root_of(user_id)?.ok_or_else(|| {
            FileError::NotFound {
                access: None,
                user: Some(user_id),
            }
            .into()
        })
    }

    /// Returns true if the entry is a directory.
    pub fn is_directory(&self, entry_id: EntryId) -> VfsResult<bool> {
        Ok(self.row(entry_id, AccessMode::Read)?.is_directory())
    }

    /// The disk holding a file entry.
    pub fn entry_disk(&self, entry_id: EntryId) -> VfsResult<(DiskId, Arc<Disk>)> {
        let row = self.row(entry_id, AccessMode::Read)?;
        let disk_id = row
            .disk_id
            .ok_or(FileError::not_a_file(entry_id, AccessMode::Read))?;
        Ok((disk_id, self.disks.by_id(disk_id)?))
    }

    /// Disk-relative path of an entry's physical object.
    pub fn physical_path(entry_id: EntryId) -> PathBuf {
        physical_path(entry_id)
    }

    /// Extension of `filename` including the dot, or `""` if there is none.
    pub fn extension(filename: &str) -> &str {
        filename.rfind('.').map_or("", |pos| &filename[pos..])
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create the personal root directory of `owner_id`.
    ///
    /// Each owner has at most one root; a second call fails with
    /// [`FileError::AlreadyExists`].
    #[tracing::instrument(skip(self), name = "vfs.create_root")]
    pub fn create_root(&self, owner_id: UserId) -> VfsResult<EntryId> {
        if self.db.root_of(owner_id)?.is_some() {
            return Err(FileError::AlreadyExists {
                access: None,
                user: Some(owner_id),
            }
            .into());
        }
        let id = self
            .db
            .insert_entry(None, ROOT_NAME, owner_id, None)
            .map_err(|source| FileError::CreationFailed {
                access: None,
                user: Some(owner_id),
                source,
            })?;
        info!(owner_id, entry_id = id, "created root directory");
        Ok(id)
    }

    /// Create a directory under `parent_id`. Requires write permission on
    /// the parent.
    #[tracing::instrument(skip(self), name = "vfs.create_directory")]
    pub fn create_directory(
        &self,
        parent_id: EntryId,
        name: &str,
        owner_id: UserId,
    ) -> VfsResult<EntryId> {
        self.require_writable_directory(parent_id, owner_id)?;
        let id = self
            .db
            .insert_entry(Some(parent_id), name, owner_id, None)
            .map_err(|source| FileError::CreationFailed {
                access: Some(FileAccess::new(parent_id, AccessMode::Write)),
                user: Some(owner_id),
                source,
            })?;
        debug!(parent_id, entry_id = id, "created directory");
        Ok(id)
    }

    /// Delete an entry. Requires ownership.
    ///
    /// Only the row is deleted here; the store's cleanup hook removes the
    /// physical object, and cascades to descendants of a directory.
    ///
    /// The hook removes objects one row at a time while the statement runs,
    /// and a failure rolls back the rows but not the objects already gone.
    /// Every disk the subtree touches is therefore checked first, and the
    /// delete is refused if any of them is unmounted or read-only.
    #[tracing::instrument(skip(self), name = "vfs.remove")]
    pub fn remove(&self, entry_id: EntryId, user_id: UserId) -> VfsResult<()> {
        self.require_ownership(entry_id, user_id)?;
        for (file_id, disk_id) in self.db.subtree_files(entry_id)? {
            self.disks
                .check_removable(disk_id, file_id)
                .map_err(|e| match e {
                    VfsError::File(file) => VfsError::File(file.with_user(user_id)),
                    other => other,
                })?;
        }
        self.db.delete_entry(entry_id)?;
        info!(entry_id, "removed entry");
        Ok(())
    }

    /// Rename an entry in place. Requires ownership. Physical storage is
    /// untouched.
    #[tracing::instrument(skip(self), name = "vfs.rename")]
    pub fn rename(&self, entry_id: EntryId, new_name: &str, user_id: UserId) -> VfsResult<()> {
        self.require_ownership(entry_id, user_id)?;
        let row = self.row(entry_id, AccessMode::Write)?;

        let conflict = || FileError::NameConflict {
            name: new_name.to_string(),
            access: Some(FileAccess::new(entry_id, AccessMode::Write)),
            user: Some(user_id),
        };
        if self.db.sibling_exists(row.parent_id, new_name, entry_id)? {
            return Err(conflict().into());
        }
        match self.db.rename_entry(entry_id, new_name) {
            Ok(_) => {
                debug!(entry_id, from = %row.name, to = new_name, "renamed entry");
                Ok(())
            }
            Err(e) if is_constraint_violation(&e) => Err(conflict().into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Open an existing file's physical object.
    ///
    /// No permission check is made here; callers gate with
    /// [`has_permission`](Self::has_permission).
    #[tracing::instrument(skip(self), name = "vfs.open_for_read")]
    pub fn open_for_read(
        &self,
        entry_id: EntryId,
        mode: AccessMode,
    ) -> VfsResult<Box<dyn PhysicalFile>> {
        let row = self.row(entry_id, mode)?;
        let disk_id = row.disk_id.ok_or(FileError::not_a_file(entry_id, mode))?;
        let disk = self.disks.by_id(disk_id)?;
        let path = physical_path(entry_id);

        if !disk.fs().exists(&path) {
            warn!(entry_id, disk_id, "metadata names a file missing from its disk");
            return Err(FileError::not_found(entry_id, mode).into());
        }

        disk.fs()
            .open(&path, mode)
            .map_err(|source| FileError::io(entry_id, mode, source).into())
    }

    /// Create a file under `parent_id` and open it for writing.
    ///
    /// `estimated_size` picks the disk and is never checked against what is
    /// actually written. The disk is chosen before any metadata exists; the
    /// row is then inserted to obtain the id that names the physical object.
    /// If the physical open fails, the row is deleted once as compensation.
    /// Should that delete fail too, the row is left orphaned and a warning is
    /// logged; the open error is returned either way.
    #[tracing::instrument(skip(self), name = "vfs.open_for_write")]
    pub fn open_for_write(
        &self,
        parent_id: EntryId,
        name: &str,
        estimated_size: u64,
        user_id: UserId,
    ) -> VfsResult<(EntryId, Box<dyn PhysicalFile>)> {
        let mode = AccessMode::Write;
        self.require_writable_directory(parent_id, user_id)?;

        let (disk_id, disk) = self.disks.by_required_size(estimated_size)?;

        let entry_id = self
            .db
            .insert_entry(Some(parent_id), name, user_id, Some(disk_id))
            .map_err(|source| FileError::CreationFailed {
                access: Some(FileAccess::new(parent_id, mode)),
                user: Some(user_id),
                source,
            })?;

        match disk.fs().open(&physical_path(entry_id), mode) {
            Ok(file) => {
                info!(entry_id, disk_id, estimated_size, "created file");
                Ok((entry_id, file))
            }
            Err(source) => {
                if let Err(e) = self.db.delete_entry(entry_id) {
                    warn!(
                        entry_id,
                        disk_id,
                        error = %e,
                        "compensating delete failed, entry row orphaned"
                    );
                }
                Err(FileError::io(entry_id, mode, source)
                    .with_user(user_id)
                    .into())
            }
        }
    }

    /// List the children of a directory, ordered by name.
    ///
    /// File sizes and modification times come from opening each physical
    /// object, so they are always current.
    #[tracing::instrument(skip(self), name = "vfs.list_directory")]
    pub fn list_directory(&self, directory_id: EntryId) -> VfsResult<Vec<EntryMetadata>> {
        let mode = AccessMode::Read;
        if !self.row(directory_id, mode)?.is_directory() {
            return Err(FileError::not_a_directory(directory_id, mode).into());
        }

        let mut listing = Vec::new();
        for child in self.db.children(directory_id)? {
            let Some(disk_id) = child.disk_id else {
                listing.push(EntryMetadata::directory(child.id, child.name, child.owner_id));
                continue;
            };

            let disk = self.disks.by_id(disk_id)?;
            let file = disk
                .fs()
                .open(&physical_path(child.id), mode)
                .map_err(|source| FileError::io(child.id, mode, source))?;
            let size = file
                .size()
                .map_err(|source| FileError::io(child.id, mode, source))?;
            let modified = file
                .last_modified()
                .map_err(|source| FileError::io(child.id, mode, source))?;
            listing.push(EntryMetadata::file(
                child.id,
                child.name,
                child.owner_id,
                size,
                modified,
            ));
        }
        Ok(listing)
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Give `grantee` the `mode` permission on exactly `entry_id`. Requires
    /// ownership by `granter`.
    #[tracing::instrument(skip(self), name = "vfs.grant")]
    pub fn grant(
        &self,
        entry_id: EntryId,
        grantee: UserId,
        mode: AccessMode,
        granter: UserId,
    ) -> VfsResult<()> {
        self.require_ownership(entry_id, granter)?;
        self.db.insert_grant(grantee, entry_id, mode)?;
        debug!(entry_id, grantee, %mode, "granted");
        Ok(())
    }

    /// Withdraw a grant. Returns true if one existed. Requires ownership by
    /// `granter`.
    #[tracing::instrument(skip(self), name = "vfs.revoke")]
    pub fn revoke(
        &self,
        entry_id: EntryId,
        grantee: UserId,
        mode: AccessMode,
        granter: UserId,
    ) -> VfsResult<bool> {
        self.require_ownership(entry_id, granter)?;
        Ok(self.db.delete_grant(grantee, entry_id, mode)?)
    }
}
