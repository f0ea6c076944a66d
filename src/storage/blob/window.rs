use crate::primitives::pager::{AccessMode, PageLease, WriteGuard};

use super::buffer::BufferGroup;

pub(super) enum Segment<'w> {
    Inline(&'w mut [u8]),
    Page {
        lease: PageLease,
        start: usize,
        end: usize,
    },
}

/// A range of a blob checked out for reading or writing.
///
/// Page buffers backing the range are leased from the transaction and handed
/// back when the window is dropped, whichever way the caller leaves.
pub struct BlobWindow<'w, 'p> {
    tx: &'w mut WriteGuard<'p>,
    segments: Vec<Segment<'w>>,
    mode: AccessMode,
    len: usize,
}

impl<'w, 'p> BlobWindow<'w, 'p> {
    pub(super) fn new(tx: &'w mut WriteGuard<'p>, mode: AccessMode, len: usize) -> Self {
        Self {
            tx,
            segments: Vec::new(),
            mode,
            len,
        }
    }

    pub(super) fn tx(&mut self) -> &mut WriteGuard<'p> {
        self.tx
    }

    pub(super) fn push(&mut self, segment: Segment<'w>) {
        self.segments.push(segment);
    }

    /// Logical length of the window.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length window.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mode the window was exposed with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Scatter/gather view over the window, in logical order.
    pub fn buffers(&mut self) -> BufferGroup<'_> {
        let mut group = BufferGroup::new();
        for segment in self.segments.iter_mut() {
            match segment {
                Segment::Inline(bytes) => group.push(&mut **bytes),
                Segment::Page { lease, start, end } => {
                    group.push(&mut lease.data_mut()[*start..*end])
                }
            }
        }
        group
    }
}

impl Drop for BlobWindow<'_, '_> {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            if let Segment::Page { lease, .. } = segment {
                self.tx.return_lease(lease);
            }
        }
    }
}
