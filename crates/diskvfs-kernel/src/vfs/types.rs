//! Core VFS types.
//!
//! Identities are plain integers assigned by the metadata store (entries) or
//! by whoever mounts a disk (disks). Users are opaque ids owned by the caller.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Row id of an entry in the metadata store.
pub type EntryId = i64;

/// Caller-assigned id of a mounted disk.
pub type DiskId = i64;

/// Opaque id of an acting user.
pub type UserId = i64;

/// Access mode token.
///
/// The same token is used to open physical objects and to name the kind of
/// permission an explicit grant gives, so the stored text form must stay
/// stable.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    /// Read an existing object.
    Read,
    /// Create or truncate, then write.
    Write,
    /// Create if missing, then write at the end.
    Append,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns true if this mode can modify the object.
    pub fn is_mutating(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// Entry kind. Directories have no disk, files have exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// One row of a directory listing.
///
/// `size` and `modified` are read from the physical object at listing time;
/// they are never stored in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub id: EntryId,
    pub name: String,
    pub kind: EntryKind,
    pub owner: UserId,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time (`None` for directories).
    pub modified: Option<SystemTime>,
}

impl EntryMetadata {
    /// Metadata for a directory.
    pub fn directory(id: EntryId, name: impl Into<String>, owner: UserId) -> Self {
        Self {
            id,
            name: name.into(),
            kind: EntryKind::Directory,
            owner,
            size: 0,
            modified: None,
        }
    }

    /// Metadata for a file with live size and mtime.
    pub fn file(
        id: EntryId,
        name: impl Into<String>,
        owner: UserId,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: EntryKind::File,
            owner,
            size,
            modified: Some(modified),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Capacity snapshot of one mounted disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub id: DiskId,
    pub mountpoint: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// The backend refuses new objects and removals.
    pub read_only: bool,
}
