use std::io::Read;

use bytes::Bytes;

use crate::storage::blob::BufferGroup;
use crate::types::{KvError, Result};

/// Supplier of the bytes written by a store operation.
///
/// The reported size is fixed up front; `fill` is called at most once and
/// must write exactly that many bytes.
pub trait DataSource {
    /// Number of bytes the source will deliver.
    fn size(&self) -> usize;

    /// Drains the source into `dst`, whose length equals [`size`](Self::size).
    fn fill(self, dst: &mut BufferGroup<'_>) -> Result<()>
    where
        Self: Sized;
}

/// In-memory payload.
#[derive(Clone, Debug, Default)]
pub struct BufferedSource(Bytes);

impl BufferedSource {
    /// Wraps `bytes`.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

impl From<Vec<u8>> for BufferedSource {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&'static [u8]> for BufferedSource {
    fn from(value: &'static [u8]) -> Self {
        Self(Bytes::from_static(value))
    }
}

impl DataSource for BufferedSource {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn fill(self, dst: &mut BufferGroup<'_>) -> Result<()> {
        dst.copy_from_slice(&self.0)
    }
}

/// Streams a payload of known length from a reader.
///
/// A reader that ends early surfaces as [`KvError::Io`].
pub struct ReaderSource<R> {
    reader: R,
    size: usize,
}

impl<R: Read> ReaderSource<R> {
    /// Reads `size` bytes from `reader` when filled.
    pub fn new(reader: R, size: usize) -> Self {
        Self { reader, size }
    }
}

impl<R: Read> DataSource for ReaderSource<R> {
    fn size(&self) -> usize {
        self.size
    }

    fn fill(mut self, dst: &mut BufferGroup<'_>) -> Result<()> {
        if dst.total_len() != self.size {
            return Err(KvError::Invalid("buffer group does not match source size"));
        }
        dst.fill_from_reader(&mut self.reader)
    }
}
