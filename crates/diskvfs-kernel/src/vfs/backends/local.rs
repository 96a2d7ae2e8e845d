//! Local filesystem backend.
//!
//! Stores physical objects as files under a root directory, with path
//! security to prevent escaping the root.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::vfs::disk::DiskCapacity;
use crate::vfs::ops::{PhysicalFile, PhysicalFs};
use crate::vfs::types::AccessMode;

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/disk0`, then `open("/17")` opens `/srv/disk0/17`.
///
/// Capacity is a quota: `total_size` is the configured quota and
/// `used_size` is the sum of the sizes of the files currently under the
/// root, recomputed on every call.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    quota: u64,
    read_only: bool,
}

impl LocalBackend {
    /// Create a local backend rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>, quota: u64) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            quota,
            read_only: false,
        }
    }

    /// Create a read-only local backend.
    pub fn read_only(root: impl Into<PathBuf>, quota: u64) -> Self {
        Self {
            read_only: true,
            ..Self::new(root, quota)
        }
    }

    /// Set whether this backend is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Only plain components are accepted, so the result can never escape
    /// the root.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut full = self.root.clone();
        let mut pushed = false;
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(s) => {
                    full.push(s);
                    pushed = true;
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("path escapes root: {}", path.display()),
                    ));
                }
            }
        }
        if !pushed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path names the backend root",
            ));
        }
        Ok(full)
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> io::Result<()> {
        if self.read_only {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "filesystem is read-only",
            ))
        } else {
            Ok(())
        }
    }

    fn used_bytes(dir: &Path) -> io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                total += Self::used_bytes(&entry.path())?;
            } else {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

impl PhysicalFs for LocalBackend {
    fn open(&self, path: &Path, mode: AccessMode) -> io::Result<Box<dyn PhysicalFile>> {
        let full = self.resolve(path)?;
        let file = match mode {
            AccessMode::Read => File::open(&full)?,
            AccessMode::Write => {
                self.check_writable()?;
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&full)?
            }
            AccessMode::Append => {
                self.check_writable()?;
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .append(true)
                    .create(true)
                    .open(&full)?
            }
        };
        if file.metadata()?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                full.display().to_string(),
            ));
        }
        Ok(Box::new(LocalFile { file }))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        fs::remove_file(full)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

impl DiskCapacity for LocalBackend {
    fn total_size(&self) -> u64 {
        self.quota
    }

    fn used_size(&self) -> u64 {
        match Self::used_bytes(&self.root) {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!("cannot measure {}: {}", self.root.display(), e);
                0
            }
        }
    }
}

/// Open handle on a [`LocalBackend`] file.
struct LocalFile {
    file: File,
}

impl io::Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.file, buf)
    }
}

impl io::Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.file, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.file)
    }
}

impl PhysicalFile for LocalFile {
    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        self.file.metadata()?.modified()
    }
}
