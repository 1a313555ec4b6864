//! Pluggable block device backend (spec §1: "The core consumes from [...] a
//! block device that supports aligned read/write/flush of fixed-size
//! buffers"). Grounded on the teacher's `disk_v2::io::Filesystem` trait,
//! generalized from an async, path-oriented file abstraction to a
//! synchronous, offset-oriented block device, since the buffer manager
//! (§4.1) addresses fixed-size buffers by device offset rather than opening
//! named files.

use std::io;
use std::path::Path;

use parking_lot::Mutex;

/// A block device: aligned read/write/flush of fixed-size spans. One
/// [`BlockDevice`] backs one [`crate::mount::volume::Volume`].
pub trait BlockDevice: Send + Sync {
    fn size_bytes(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;
}

/// Production backend: a regular file opened for read/write, using
/// positioned I/O so concurrent readers/writers don't need to share a
/// cursor.
pub struct FileDevice {
    file: Mutex<std::fs::File>,
    size_bytes: u64,
}

impl FileDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(FileDevice {
            file: Mutex::new(file),
            size_bytes,
        })
    }

    pub fn create(path: &Path, size_bytes: u64) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;
        Ok(FileDevice {
            file: Mutex::new(file),
            size_bytes,
        })
    }
}

#[cfg(unix)]
impl BlockDevice for FileDevice {
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.lock().read_exact_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.lock().write_all_at(buf, offset)
    }

    fn flush(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }
}

/// In-memory backend for tests: a flat byte vector behind a single lock.
/// Grounded on the teacher's use of a swappable `Filesystem` implementation
/// purely to make tests deterministic and fast (`disk_v2::tests`).
pub struct InMemoryDevice {
    bytes: Mutex<Vec<u8>>,
}

impl InMemoryDevice {
    pub fn new(size_bytes: u64) -> Self {
        InMemoryDevice {
            bytes: Mutex::new(vec![0u8; size_bytes as usize]),
        }
    }
}

impl BlockDevice for InMemoryDevice {
    fn size_bytes(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let guard = self.bytes.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > guard.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of device"));
        }
        buf.copy_from_slice(&guard[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.bytes.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > guard.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of device"));
        }
        guard[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
