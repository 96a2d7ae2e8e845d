//! VFS error types.
//!
//! Two families: [`DiskError`] for the registry and allocator, [`FileError`]
//! for namespace entries. [`VfsError`] unifies them with store and config
//! failures so callers can match on the kind and map it to their own status
//! codes.

use std::fmt::Write as _;
use std::io;
use thiserror::Error;

use super::types::{AccessMode, DiskId, EntryId, UserId};
use crate::config::ConfigError;

/// The entry and mode an operation was acting on when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess {
    pub entry_id: EntryId,
    pub mode: AccessMode,
}

impl FileAccess {
    pub fn new(entry_id: EntryId, mode: AccessMode) -> Self {
        Self { entry_id, mode }
    }
}

fn context(access: &Option<FileAccess>, user: &Option<UserId>) -> String {
    let mut out = String::new();
    if let Some(access) = access {
        let _ = write!(out, " (entry {}, mode {})", access.entry_id, access.mode);
    }
    if let Some(user) = user {
        let _ = write!(out, " [user {user}]");
    }
    out
}

/// Disk registry and allocation errors.
#[derive(Debug, Error)]
pub enum DiskError {
    /// No disk is registered under this id.
    #[error("disk {disk_id} is not mounted")]
    NotMounted { disk_id: DiskId },

    /// The id is already registered in this process.
    #[error("disk {disk_id} is already mounted")]
    AlreadyMounted { disk_id: DiskId },

    /// The registry is empty.
    #[error("no disk mounted")]
    NoDiskMounted,

    /// Every mounted disk has less free space than requested.
    #[error("no disk with enough free space: need {required} bytes, largest free is {largest_free}")]
    InsufficientSpace { required: u64, largest_free: u64 },
}

/// Namespace entry errors.
#[derive(Debug, Error)]
pub enum FileError {
    /// Entry missing from the metadata store, or its physical object is
    /// missing from the assigned disk.
    #[error("file not found{}", context(.access, .user))]
    NotFound {
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// Neither ownership nor a matching grant.
    #[error("permission denied{}", context(.access, .user))]
    PermissionDenied {
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// The owner already has a root directory.
    #[error("root directory already exists{}", context(.access, .user))]
    AlreadyExists {
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// A sibling with the requested name already exists.
    #[error("name already taken: {name}{}", context(.access, .user))]
    NameConflict {
        name: String,
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// Expected a directory.
    #[error("not a directory{}", context(.access, .user))]
    NotADirectory {
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// Expected a file backed by a disk.
    #[error("not a physical file{}", context(.access, .user))]
    NotAFile {
        access: Option<FileAccess>,
        user: Option<UserId>,
    },

    /// The metadata row could not be created.
    #[error("failed to create entry{}: {source}", context(.access, .user))]
    CreationFailed {
        access: Option<FileAccess>,
        user: Option<UserId>,
        source: rusqlite::Error,
    },

    /// Physical open or remove failed.
    #[error("physical I/O failed{}: {source}", context(.access, .user))]
    Io {
        access: Option<FileAccess>,
        user: Option<UserId>,
        source: io::Error,
    },
}

impl FileError {
    pub fn not_found(entry_id: EntryId, mode: AccessMode) -> Self {
        Self::NotFound {
            access: Some(FileAccess::new(entry_id, mode)),
            user: None,
        }
    }

    pub fn permission_denied(entry_id: EntryId, mode: AccessMode, user: UserId) -> Self {
        Self::PermissionDenied {
            access: Some(FileAccess::new(entry_id, mode)),
            user: Some(user),
        }
    }

    pub fn not_a_directory(entry_id: EntryId, mode: AccessMode) -> Self {
        Self::NotADirectory {
            access: Some(FileAccess::new(entry_id, mode)),
            user: None,
        }
    }

    pub fn not_a_file(entry_id: EntryId, mode: AccessMode) -> Self {
        Self::NotAFile {
            access: Some(FileAccess::new(entry_id, mode)),
            user: None,
        }
    }

    pub fn io(entry_id: EntryId, mode: AccessMode, source: io::Error) -> Self {
        Self::Io {
            access: Some(FileAccess::new(entry_id, mode)),
            user: None,
            source,
        }
    }

    /// Attach the acting user, keeping everything else.
    pub fn with_user(mut self, user_id: UserId) -> Self {
        match &mut self {
            Self::NotFound { user, .. }
            | Self::PermissionDenied { user, .. }
            | Self::AlreadyExists { user, .. }
            | Self::NameConflict { user, .. }
            | Self::NotADirectory { user, .. }
            | Self::NotAFile { user, .. }
            | Self::CreationFailed { user, .. }
            | Self::Io { user, .. } => *user = Some(user_id),
        }
        self
    }

    /// The entry and mode this error refers to, if known.
    pub fn access(&self) -> Option<FileAccess> {
        match self {
            Self::NotFound { access, .. }
            | Self::PermissionDenied { access, .. }
            | Self::AlreadyExists { access, .. }
            | Self::NameConflict { access, .. }
            | Self::NotADirectory { access, .. }
            | Self::NotAFile { access, .. }
            | Self::CreationFailed { access, .. }
            | Self::Io { access, .. } => *access,
        }
    }

    /// The acting user, if known.
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::NotFound { user, .. }
            | Self::PermissionDenied { user, .. }
            | Self::AlreadyExists { user, .. }
            | Self::NameConflict { user, .. }
            | Self::NotADirectory { user, .. }
            | Self::NotAFile { user, .. }
            | Self::CreationFailed { user, .. }
            | Self::Io { user, .. } => *user,
        }
    }
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error(transparent)]
    File(#[from] FileError),

    /// Metadata store failure, including a delete aborted by the physical
    /// cleanup hook.
    #[error("metadata store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::File(FileError::NotFound { .. }))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, VfsError::File(FileError::PermissionDenied { .. }))
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Disk(DiskError::InsufficientSpace { .. }) => {
                io::Error::new(io::ErrorKind::StorageFull, e.to_string())
            }
            VfsError::Disk(_) => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            VfsError::File(FileError::Io { source, .. }) => source,
            VfsError::File(ref file) => {
                let kind = match file {
                    FileError::NotFound { .. } => io::ErrorKind::NotFound,
                    FileError::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
                    FileError::AlreadyExists { .. } | FileError::NameConflict { .. } => {
                        io::ErrorKind::AlreadyExists
                    }
                    FileError::NotADirectory { .. } => io::ErrorKind::NotADirectory,
                    FileError::NotAFile { .. } => io::ErrorKind::IsADirectory,
                    FileError::CreationFailed { .. } | FileError::Io { .. } => {
                        io::ErrorKind::Other
                    }
                };
                io::Error::new(kind, e.to_string())
            }
            VfsError::Store(_) | VfsError::Config(_) => io::Error::other(e),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_context_in_message() {
        let err = FileError::permission_denied(12, AccessMode::Write, 3);
        assert_eq!(
            err.to_string(),
            "permission denied (entry 12, mode write) [user 3]"
        );

        let err = FileError::NotFound {
            access: None,
            user: Some(5),
        };
        assert_eq!(err.to_string(), "file not found [user 5]");
    }

    #[test]
    fn test_with_user_keeps_access() {
        let err = FileError::not_found(4, AccessMode::Read).with_user(9);
        assert_eq!(err.access(), Some(FileAccess::new(4, AccessMode::Read)));
        assert_eq!(err.user(), Some(9));
    }

    #[test]
    fn test_io_error_mapping() {
        let e: io::Error = VfsError::from(FileError::not_found(1, AccessMode::Read)).into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let e: io::Error = VfsError::from(DiskError::InsufficientSpace {
            required: 10,
            largest_free: 5,
        })
        .into();
        assert_eq!(e.kind(), io::ErrorKind::StorageFull);

        let source = io::Error::new(io::ErrorKind::PermissionDenied, "read-only");
        let e: io::Error = VfsError::from(FileError::io(2, AccessMode::Write, source)).into();
        assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
    }
}
