use std::io::Read;

use smallvec::SmallVec;

use crate::types::{KvError, Result};

/// Scatter/gather list of byte regions exposed by a blob window.
///
/// The regions are disjoint and ordered by logical offset, so filling them
/// front to back writes a contiguous run of the value.
#[derive(Default)]
pub struct BufferGroup<'b> {
    parts: SmallVec<[&'b mut [u8]; 4]>,
}

impl<'b> BufferGroup<'b> {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            parts: SmallVec::new(),
        }
    }

    /// Appends a region.
    pub fn push(&mut self, part: &'b mut [u8]) {
        if !part.is_empty() {
            self.parts.push(part);
        }
    }

    /// Sum of all region lengths.
    pub fn total_len(&self) -> usize {
        self.parts.iter().map(|p| p.len()).sum()
    }

    /// Number of regions.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Iterates the regions mutably, in logical order.
    pub fn parts_mut(&mut self) -> std::slice::IterMut<'_, &'b mut [u8]> {
        self.parts.iter_mut()
    }

    /// Copies `src` across the regions; `src` must cover them exactly.
    pub fn copy_from_slice(&mut self, mut src: &[u8]) -> Result<()> {
        if src.len() != self.total_len() {
            return Err(KvError::Invalid("source length does not match buffer group"));
        }
        for part in self.parts_mut() {
            let (head, tail) = src.split_at(part.len());
            part.copy_from_slice(head);
            src = tail;
        }
        Ok(())
    }

    /// Reads exactly `total_len()` bytes from `reader` into the regions.
    pub fn fill_from_reader<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        for part in self.parts_mut() {
            reader.read_exact(&mut **part)?;
        }
        Ok(())
    }

    /// Concatenates the regions into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for part in &self.parts {
            out.extend_from_slice(part);
        }
        out
    }
}
