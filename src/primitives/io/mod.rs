#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use tracing::trace;

use crate::types::{KvError, Result};

/// Positioned file I/O used by the pager.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current file length.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// [`FileIo`] over a shared `std::fs::File`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn read_exact(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_all(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn read_exact(&self, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !dst.is_empty() {
            let read = self.inner.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn write_all(&self, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !src.is_empty() {
            let written = self.inner.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(KvError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.write_all(off, src).map_err(KvError::from)
    }

    fn sync_all(&self) -> Result<()> {
        trace!("io.sync_all");
        self.inner.sync_all().map_err(KvError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(KvError::from)
    }
}
