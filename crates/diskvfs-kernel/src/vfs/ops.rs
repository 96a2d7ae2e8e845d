//! Physical storage traits.
//!
//! A backend is addressed by disk-relative paths. The namespace only ever
//! uses flat, id-keyed paths (`/17`), but backends accept any relative path
//! that stays under their root.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use super::types::AccessMode;

/// An open physical object.
pub trait PhysicalFile: io::Read + io::Write + Send {
    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Last modification time.
    fn last_modified(&self) -> io::Result<SystemTime>;
}

/// Physical storage driver for one disk.
///
/// All operations are blocking. Paths are relative to the backend's root;
/// a leading `/` is accepted and ignored.
pub trait PhysicalFs: Send + Sync {
    /// Open the object at `path`.
    ///
    /// `Read` requires the object to exist. `Write` creates or truncates it.
    /// `Append` creates it if missing and positions writes at the end.
    fn open(&self, path: &Path, mode: AccessMode) -> io::Result<Box<dyn PhysicalFile>>;

    /// Returns true if an object exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Remove the object at `path`.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Returns true if this backend refuses mutating opens and removes.
    fn read_only(&self) -> bool {
        false
    }
}
