//! Physical backends.
//!
//! Backends implement [`PhysicalFs`](super::PhysicalFs) and
//! [`DiskCapacity`](super::DiskCapacity) for different storage types.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
