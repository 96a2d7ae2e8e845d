//! In-memory physical backend.
//!
//! Used for scratch disks and testing. All data is ephemeral. Objects are
//! shared with open handles, so a handle keeps working after `remove` and
//! capacity reflects handle writes immediately.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use crate::vfs::disk::DiskCapacity;
use crate::vfs::ops::{PhysicalFile, PhysicalFs};
use crate::vfs::types::AccessMode;

#[derive(Debug)]
struct Object {
    data: Vec<u8>,
    mtime: SystemTime,
}

impl Object {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            mtime: SystemTime::now(),
        }
    }
}

type SharedObject = Arc<Mutex<Object>>;

fn poisoned() -> io::Error {
    io::Error::other("lock poisoned")
}

/// In-memory physical backend.
///
/// Thread-safe via internal locks. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<PathBuf, SharedObject>>,
    capacity: u64,
    read_only: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend with unbounded capacity.
    pub fn new() -> Self {
        Self::with_capacity(u64::MAX)
    }

    /// Create an empty backend reporting `capacity` total bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            capacity,
            read_only: AtomicBool::new(false),
        }
    }

    /// Refuse (or allow again) mutating opens and removes.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "filesystem is read-only",
            ))
        } else {
            Ok(())
        }
    }
}

impl PhysicalFs for MemoryBackend {
    fn open(&self, path: &Path, mode: AccessMode) -> io::Result<Box<dyn PhysicalFile>> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                "cannot open backend root",
            ));
        }

        let object = match mode {
            AccessMode::Read => {
                let objects = self.objects.read().map_err(|_| poisoned())?;
                objects.get(&normalized).cloned().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, normalized.display().to_string())
                })?
            }
            AccessMode::Write | AccessMode::Append => {
                self.check_writable()?;
                let mut objects = self.objects.write().map_err(|_| poisoned())?;
                let object = objects
                    .entry(normalized)
                    .or_insert_with(|| Arc::new(Mutex::new(Object::empty())))
                    .clone();
                if mode == AccessMode::Write {
                    let mut guard = object.lock().map_err(|_| poisoned())?;
                    guard.data.clear();
                    guard.mtime = SystemTime::now();
                }
                object
            }
        };

        Ok(Box::new(MemoryFile {
            object,
            pos: 0,
            mode,
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        let normalized = Self::normalize(path);
        self.objects
            .read()
            .map(|objects| objects.contains_key(&normalized))
            .unwrap_or(false)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.check_writable()?;
        let normalized = Self::normalize(path);
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        match objects.remove(&normalized) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                normalized.display().to_string(),
            )),
        }
    }

    fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}

impl DiskCapacity for MemoryBackend {
    fn total_size(&self) -> u64 {
        self.capacity
    }

    fn used_size(&self) -> u64 {
        let Ok(objects) = self.objects.read() else {
            return 0;
        };
        objects
            .values()
            .filter_map(|o| o.lock().ok().map(|o| o.data.len() as u64))
            .sum()
    }
}

/// Open handle on a [`MemoryBackend`] object.
struct MemoryFile {
    object: SharedObject,
    pos: usize,
    mode: AccessMode,
}

impl io::Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let object = self.object.lock().map_err(|_| poisoned())?;
        let start = self.pos.min(object.data.len());
        let n = buf.len().min(object.data.len() - start);
        buf[..n].copy_from_slice(&object.data[start..start + n]);
        self.pos = start + n;
        Ok(n)
    }
}

impl io::Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.is_mutating() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle opened for reading",
            ));
        }
        let mut object = self.object.lock().map_err(|_| poisoned())?;
        if self.mode == AccessMode::Append {
            self.pos = object.data.len();
        }
        let end = self.pos + buf.len();
        if end > object.data.len() {
            object.data.resize(end, 0);
        }
        object.data[self.pos..end].copy_from_slice(buf);
        object.mtime = SystemTime::now();
        self.pos = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PhysicalFile for MemoryFile {
    fn size(&self) -> io::Result<u64> {
        let object = self.object.lock().map_err(|_| poisoned())?;
        Ok(object.data.len() as u64)
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        let object = self.object.lock().map_err(|_| poisoned())?;
        Ok(object.mtime)
    }
}
