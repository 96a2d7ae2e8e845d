//! Physical side of the virtual filesystem.
//!
//! Key components:
//!
//! - [`PhysicalFs`] / [`PhysicalFile`] - storage driver traits for one disk
//! - [`Disk`] - a backend plus its live capacity ([`DiskCapacity`])
//! - [`DiskRegistry`] - mounted disks and best-fit allocation
//! - [`MemoryBackend`] - in-memory backend (scratch disks, testing)
//! - [`LocalBackend`] - directory on the host filesystem (with path security)
//!
//! ## Design Decisions
//!
//! - **Flat, id-keyed storage**: each disk stores objects at `/<entry id>`.
//!   Names and hierarchy live only in the metadata store.
//! - **Live capacity**: free space is computed on every read, never cached.
//! - **Best fit**: allocation picks the tightest disk that still fits.

pub mod backends;
mod disk;
mod error;
mod mount;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use disk::{physical_path, Disk, DiskCapacity};
pub use error::{DiskError, FileAccess, FileError, VfsError, VfsResult};
pub use mount::DiskRegistry;
pub use ops::{PhysicalFile, PhysicalFs};
pub use types::{AccessMode, DiskId, DiskInfo, EntryId, EntryKind, EntryMetadata, UserId};
