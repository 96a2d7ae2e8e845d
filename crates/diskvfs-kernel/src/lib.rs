//! # diskvfs-kernel
//!
//! Multi-disk virtual filesystem core.
//!
//! Users see a per-owner directory tree; file contents are spread over
//! several independently mounted disks. Two pieces make that work:
//!
//! - A [`DiskRegistry`] of mounted disks that places each new file on the
//!   disk with the least free space that still fits it (best fit)
//! - A [`Namespace`] engine that keeps the tree in SQLite ([`EntryDb`]),
//!   resolves ownership and grants, and keeps each file row and its physical
//!   object in step
//!
//! Disks store objects flat, named by entry id. Names and hierarchy exist
//! only in the metadata store.

pub mod config;
pub mod db;
pub mod namespace;
pub mod vfs;

pub use config::{ConfigError, DiskConfig, VfsConfig};
pub use db::{EntryDb, EntryRow, HookError, MountRecord};
pub use namespace::{Namespace, ROOT_NAME};
pub use vfs::{
    AccessMode, Disk, DiskCapacity, DiskError, DiskId, DiskInfo, DiskRegistry, EntryId, EntryKind,
    EntryMetadata, FileAccess, FileError, LocalBackend, MemoryBackend, PhysicalFile, PhysicalFs,
    UserId, VfsError, VfsResult,
};
