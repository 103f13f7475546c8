//! Byte-addressed streams backing a block store.
//!
//! Offsets are absolute (pread/pwrite semantics), so no shared seek position
//! exists. Writing past the current end extends the stream; reading past it
//! is an error.

use lks_error::{LksError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Byte-addressed stream for fixed-offset I/O.
pub trait ByteStream: Send + Sync {
    /// Current length in bytes.
    fn len_bytes(&self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`, growing the stream if needed.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn range_end(offset: u64, len: usize) -> Result<u64> {
    let len = u64::try_from(len)
        .map_err(|_| LksError::Bounds("buffer length overflows u64".to_owned()))?;
    offset
        .checked_add(len)
        .ok_or_else(|| LksError::Bounds("byte range overflows u64".to_owned()))
}

/// File-backed stream using `std::os::unix::fs::FileExt`.
#[derive(Debug, Clone)]
pub struct FileByteStream {
    file: Arc<File>,
    writable: bool,
}

impl FileByteStream {
    /// Create (or truncate) a file for read-write access.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(file, true))
    }

    /// Open an existing file, read-write if permitted, read-only otherwise.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        Ok(Self::from_file(file, writable))
    }

    #[must_use]
    pub fn from_file(file: File, writable: bool) -> Self {
        Self {
            file: Arc::new(file),
            writable,
        }
    }
}

impl ByteStream for FileByteStream {
    fn len_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = range_end(offset, buf.len())?;
        let len = self.len_bytes()?;
        if end > len {
            return Err(LksError::Bounds(format!(
                "read out of bounds: offset={offset} len={} file_len={len}",
                buf.len()
            )));
        }
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(LksError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "stream was opened read-only",
            )));
        }
        range_end(offset, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// Growable in-memory stream. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemByteStream {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemByteStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteStream for MemByteStream {
    fn len_bytes(&self) -> Result<u64> {
        u64::try_from(self.bytes.lock().len())
            .map_err(|_| LksError::Bounds("stream length overflows u64".to_owned()))
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| LksError::Bounds("offset overflows usize".to_owned()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| LksError::Bounds("read range overflow".to_owned()))?;
        let bytes = self.bytes.lock();
        if end > bytes.len() {
            return Err(LksError::Bounds(format!(
                "read out of bounds: offset={offset} len={} stream_len={}",
                buf.len(),
                bytes.len()
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| LksError::Bounds("offset overflows usize".to_owned()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| LksError::Bounds("write range overflow".to_owned()))?;
        let mut bytes = self.bytes.lock();
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
