//! Byte-level storage abstraction.
//!
//! The page store talks to its backing file and to its journal through the
//! `Storage` trait, so the same commit and recovery code runs against a real
//! file, a plain memory buffer (in-memory environments), or the fault
//! injecting storage used by the crash simulation tests.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read_at` returns the last written content for a byte range
//! - `sync` orders every previous write before every later one
//! - `set_len` both grows (zero-filled) and truncates

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Abstraction over a growable, randomly addressable byte store.
pub trait Storage: Send {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` starting at `offset`, growing the store if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current size in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Grow or truncate to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> io::Result<()>;
}

/// A `Storage` backed by a file on disk.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    fsync: bool,
}

impl FileStorage {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path, fsync: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, fsync })
    }

    /// Open an existing file at `path`.
    pub fn open(path: &Path, read_only: bool, fsync: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        Ok(Self { file, fsync })
    }

    /// Open the file at `path`, creating it empty if it does not exist.
    pub fn open_or_create(path: &Path, fsync: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, fsync })
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        // Without ENABLE_FSYNC durability is left to the OS page cache.
        if self.fsync {
            self.file.sync_all()
        } else {
            self.file.flush()
        }
    }
}

/// A `Storage` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    #[must_use]
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }
}

/// Convert a byte offset into a slice index, rejecting offsets that do not fit.
pub(crate) fn offset_to_index(offset: u64) -> io::Result<usize> {
    usize::try_from(offset).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {offset} exceeds addressable memory"),
        )
    })
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset_to_index(offset)?;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {end} bytes past end {}", self.data.len()),
            ));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = offset_to_index(offset)?;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = offset_to_index(len)?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}
