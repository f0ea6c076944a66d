#![forbid(unsafe_code)]

//! Byte values stored behind a leaf slot.
//!
//! A slot holds a blob reference in one of two encodings:
//!
//! ```text
//! inline: [0][len:u16][bytes; len]
//! large:  [1][size:u64][offset:u32][index:u64]
//! ```
//!
//! Values shorter than the layout's inline threshold live in the slot itself.
//! Anything larger is spread over `Overflow` data blocks whose ids are listed,
//! in logical order, on a single `BlobIndex` page. `offset` is where the value
//! starts inside the first block, which lets the head grow into spare room
//! (or into freshly prepended blocks) without moving existing bytes.

use std::cmp::min;
use std::convert::TryInto;

use tracing::trace;

use crate::primitives::concurrency::AcquireBlocks;
use crate::primitives::pager::{AccessMode, PageRead, WriteGuard};
use crate::types::page::{self, PageKind, PAGE_HDR_LEN};
use crate::types::{KvError, PageId, Result};

mod buffer;
mod window;

pub use buffer::BufferGroup;
pub use window::BlobWindow;

use window::Segment;

const REF_INLINE: u8 = 0;
const REF_LARGE: u8 = 1;

/// Bytes preceding the data of an inline reference.
pub const INLINE_REF_HDR: usize = 3;
/// Encoded length of a large reference.
pub const LARGE_REF_LEN: usize = 21;

const INDEX_COUNT: usize = PAGE_HDR_LEN;
const INDEX_IDS: usize = PAGE_HDR_LEN + 8;

/// Size parameters shared by every blob in a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlobLayout {
    page_size: usize,
    max_inline: usize,
}

impl BlobLayout {
    /// Builds a layout for `page_size` pages that keeps values shorter than
    /// `max_inline` bytes in the slot.
    pub fn new(page_size: usize, max_inline: usize) -> Result<Self> {
        if page_size < INDEX_IDS + 16 {
            return Err(KvError::Invalid("page size too small for blob pages"));
        }
        if max_inline == 0 || max_inline > u16::MAX as usize {
            return Err(KvError::Invalid("inline threshold out of range"));
        }
        Ok(Self {
            page_size,
            max_inline,
        })
    }

    /// Page size blocks are carved from.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Values of this many bytes or more leave the slot.
    pub fn max_inline(&self) -> usize {
        self.max_inline
    }

    /// Value bytes held by one data block.
    pub fn data_capacity(&self) -> usize {
        self.page_size - PAGE_HDR_LEN
    }

    /// Data blocks one index page can list.
    pub fn index_capacity(&self) -> usize {
        (self.page_size - INDEX_IDS) / 8
    }

    /// Longest reference a slot may need to hold.
    pub fn max_ref_len(&self) -> usize {
        (INLINE_REF_HDR + self.max_inline - 1).max(LARGE_REF_LEN)
    }

    /// Largest value guaranteed to fit whatever its head offset.
    pub fn max_blob_size(&self) -> usize {
        (self.index_capacity() - 1) * self.data_capacity()
    }

    /// Whether a value of `size` bytes is stored inline.
    pub fn is_inline(&self, size: usize) -> bool {
        size < self.max_inline
    }
}

/// Location of a large value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LargeRef {
    /// Logical value length.
    pub size: usize,
    /// Start of the value inside the first data block.
    pub offset: usize,
    /// Index page listing the data blocks.
    pub index: PageId,
}

/// Decoded blob reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobRef {
    /// Bytes follow the reference header in the slot.
    Inline {
        /// Value length.
        len: usize,
    },
    /// Bytes live in data blocks.
    Large(LargeRef),
}

impl BlobRef {
    /// Logical value length.
    pub fn size(&self) -> usize {
        match self {
            BlobRef::Inline { len } => *len,
            BlobRef::Large(large) => large.size,
        }
    }
}

/// Reference to an empty inline value.
pub fn empty_ref() -> Vec<u8> {
    vec![REF_INLINE, 0, 0]
}

/// Encodes `bytes` as an inline reference.
pub fn inline_ref(bytes: &[u8]) -> Result<Vec<u8>> {
    let len: u16 = bytes
        .len()
        .try_into()
        .map_err(|_| KvError::Invalid("inline value too long"))?;
    let mut out = Vec::with_capacity(INLINE_REF_HDR + bytes.len());
    out.push(REF_INLINE);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(out)
}

fn encode_large(large: &LargeRef) -> Result<Vec<u8>> {
    let offset: u32 = large
        .offset
        .try_into()
        .map_err(|_| KvError::Invalid("blob offset out of range"))?;
    let mut out = Vec::with_capacity(LARGE_REF_LEN);
    out.push(REF_LARGE);
    out.extend_from_slice(&(large.size as u64).to_be_bytes());
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(&large.index.0.to_be_bytes());
    Ok(out)
}

/// Decodes the reference stored in `slot`.
pub fn decode_ref(slot: &[u8]) -> Result<BlobRef> {
    match slot.first() {
        Some(&REF_INLINE) => {
            let len = u16::from_be_bytes(field(slot, 1)?) as usize;
            if slot.len() != INLINE_REF_HDR + len {
                return Err(KvError::Corruption("inline blob length mismatch"));
            }
            Ok(BlobRef::Inline { len })
        }
        Some(&REF_LARGE) => {
            if slot.len() != LARGE_REF_LEN {
                return Err(KvError::Corruption("large blob reference length mismatch"));
            }
            let size = u64::from_be_bytes(field(slot, 1)?) as usize;
            let offset = u32::from_be_bytes(field(slot, 9)?) as usize;
            let index = PageId(u64::from_be_bytes(field(slot, 13)?));
            if index.0 == 0 {
                return Err(KvError::Corruption("large blob without index page"));
            }
            Ok(BlobRef::Large(LargeRef {
                size,
                offset,
                index,
            }))
        }
        Some(_) => Err(KvError::Corruption("unknown blob reference tag")),
        None => Err(KvError::Corruption("empty blob reference")),
    }
}

fn field<const N: usize>(src: &[u8], at: usize) -> Result<[u8; N]> {
    src.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(KvError::Corruption("blob field truncated"))
}

/// Reads the data block list of a large value.
pub fn load_index<R: PageRead + ?Sized>(src: &R, index: PageId) -> Result<Vec<PageId>> {
    let page = src.read_page(index)?;
    let data = page.data();
    page::expect_kind(data, index, PageKind::BlobIndex)?;
    let count = u32::from_be_bytes(field(data, INDEX_COUNT)?) as usize;
    if count > (data.len() - INDEX_IDS) / 8 {
        return Err(KvError::Corruption("blob index count exceeds page"));
    }
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = u64::from_be_bytes(field(data, INDEX_IDS + i * 8)?);
        if id == 0 {
            return Err(KvError::Corruption("blob index lists page 0"));
        }
        ids.push(PageId(id));
    }
    Ok(ids)
}

fn store_index(tx: &mut WriteGuard<'_>, index: PageId, ids: &[PageId]) -> Result<()> {
    let count: u32 = ids
        .len()
        .try_into()
        .map_err(|_| KvError::Invalid("blob index count out of range"))?;
    let mut page = tx.page_mut(index)?;
    let data = page.data_mut();
    if INDEX_IDS + ids.len() * 8 > data.len() {
        return Err(KvError::Invalid("blob exceeds index capacity"));
    }
    data[PAGE_HDR_LEN..].fill(0);
    data[INDEX_COUNT..INDEX_COUNT + 4].copy_from_slice(&count.to_be_bytes());
    for (i, id) in ids.iter().enumerate() {
        let at = INDEX_IDS + i * 8;
        data[at..at + 8].copy_from_slice(&id.0.to_be_bytes());
    }
    Ok(())
}

fn write_blocks(
    tx: &mut WriteGuard<'_>,
    ids: &[PageId],
    capacity: usize,
    mut pos: usize,
    mut src: &[u8],
) -> Result<()> {
    while !src.is_empty() {
        let id = *ids
            .get(pos / capacity)
            .ok_or(KvError::Invalid("write past end of blob"))?;
        let within = pos % capacity;
        let take = min(capacity - within, src.len());
        let mut page = tx.page_mut(id)?;
        page.data_mut()[PAGE_HDR_LEN + within..PAGE_HDR_LEN + within + take]
            .copy_from_slice(&src[..take]);
        src = &src[take..];
        pos += take;
    }
    Ok(())
}

/// Reads the full value referenced by `slot`.
pub fn read_value<R: PageRead + ?Sized>(
    slot: &[u8],
    layout: &BlobLayout,
    src: &R,
) -> Result<Vec<u8>> {
    match decode_ref(slot)? {
        BlobRef::Inline { len } => Ok(slot[INLINE_REF_HDR..INLINE_REF_HDR + len].to_vec()),
        BlobRef::Large(large) => {
            let ids = load_index(src, large.index)?;
            let capacity = layout.data_capacity();
            let mut out = Vec::with_capacity(large.size);
            let mut pos = large.offset;
            while out.len() < large.size {
                let id = *ids
                    .get(pos / capacity)
                    .ok_or(KvError::Corruption("blob index shorter than value"))?;
                let page = src.read_page(id)?;
                let data = page.data();
                page::expect_kind(data, id, PageKind::Overflow)?;
                let within = pos % capacity;
                let take = min(capacity - within, large.size - out.len());
                out.extend_from_slice(&data[PAGE_HDR_LEN + within..PAGE_HDR_LEN + within + take]);
                pos += take;
            }
            Ok(out)
        }
    }
}

/// Pages making up a large value, in logical order.
#[derive(Clone, Debug)]
pub struct LargeValue {
    index: PageId,
    blocks: Vec<PageId>,
    size: usize,
}

impl LargeValue {
    /// Loads the block list when `slot` references a large value.
    pub fn from_slot<R: PageRead + ?Sized>(slot: &[u8], src: &R) -> Result<Option<Self>> {
        match decode_ref(slot)? {
            BlobRef::Inline { .. } => Ok(None),
            BlobRef::Large(large) => Ok(Some(Self {
                index: large.index,
                blocks: load_index(src, large.index)?,
                size: large.size,
            })),
        }
    }

    /// Index page.
    pub fn index(&self) -> PageId {
        self.index
    }

    /// Data blocks, head first.
    pub fn blocks(&self) -> &[PageId] {
        &self.blocks
    }

    /// Logical value length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Acquires the index page, then data blocks from the tail inward.
    pub fn acquire_rhs(&self, sink: &mut dyn AcquireBlocks) -> Result<()> {
        sink.acquire_block(self.index)?;
        for id in self.blocks.iter().rev() {
            sink.acquire_block(*id)?;
        }
        Ok(())
    }

    /// Acquires the index page, then data blocks from the head inward.
    pub fn acquire_lhs(&self, sink: &mut dyn AcquireBlocks) -> Result<()> {
        sink.acquire_block(self.index)?;
        for id in &self.blocks {
            sink.acquire_block(*id)?;
        }
        Ok(())
    }
}

/// Mutable view over the value behind one slot.
///
/// Growth and window operations go through the supplied transaction; the slot
/// is rewritten in place whenever the reference changes.
pub struct Blob<'s> {
    slot: &'s mut Vec<u8>,
    layout: BlobLayout,
    state: BlobRef,
}

impl<'s> Blob<'s> {
    /// Opens the blob referenced by `slot`.
    pub fn new(slot: &'s mut Vec<u8>, layout: BlobLayout) -> Result<Self> {
        let state = decode_ref(slot)?;
        Ok(Self {
            slot,
            layout,
            state,
        })
    }

    /// Logical value length.
    pub fn current_size(&self) -> usize {
        self.state.size()
    }

    /// Current reference.
    pub fn reference(&self) -> BlobRef {
        self.state
    }

    /// Block list when the value is stored out of line.
    pub fn large_value<R: PageRead + ?Sized>(&self, src: &R) -> Result<Option<LargeValue>> {
        LargeValue::from_slot(&self.slot[..], src)
    }

    /// Extends the value by `n` zero bytes at the end.
    pub fn grow_tail(&mut self, tx: &mut WriteGuard<'_>, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let old_size = self.current_size();
        match self.state {
            BlobRef::Inline { len } if self.layout.is_inline(len + n) => {
                self.slot.resize(self.slot.len() + n, 0);
                self.set_inline_len(len + n)?;
            }
            BlobRef::Inline { len } => {
                let existing = self.slot[INLINE_REF_HDR..INLINE_REF_HDR + len].to_vec();
                let large = self.convert_to_large(tx, &existing, 0, len + n)?;
                self.set_large(large)?;
            }
            BlobRef::Large(mut large) => {
                let capacity = self.layout.data_capacity();
                let needed = (large.offset + large.size + n).div_ceil(capacity);
                let mut ids = load_index(&*tx, large.index)?;
                if needed > ids.len() {
                    if needed > self.layout.index_capacity() {
                        return Err(KvError::Invalid("blob exceeds index capacity"));
                    }
                    for _ in ids.len()..needed {
                        ids.push(tx.allocate_page(PageKind::Overflow)?);
                    }
                    store_index(tx, large.index, &ids)?;
                }
                large.size += n;
                self.set_large(large)?;
            }
        }
        trace!(old_size, added = n, "blob.grow_tail");
        Ok(())
    }

    /// Extends the value by `n` zero bytes at the front. Existing bytes keep
    /// their physical position; their logical offsets shift by `n`.
    pub fn grow_head(&mut self, tx: &mut WriteGuard<'_>, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let old_size = self.current_size();
        match self.state {
            BlobRef::Inline { len } if self.layout.is_inline(len + n) => {
                let mut grown = Vec::with_capacity(self.slot.len() + n);
                grown.extend_from_slice(&self.slot[..INLINE_REF_HDR]);
                grown.resize(INLINE_REF_HDR + n, 0);
                grown.extend_from_slice(&self.slot[INLINE_REF_HDR..]);
                *self.slot = grown;
                self.set_inline_len(len + n)?;
            }
            BlobRef::Inline { len } => {
                let existing = self.slot[INLINE_REF_HDR..INLINE_REF_HDR + len].to_vec();
                let large = self.convert_to_large(tx, &existing, n, len + n)?;
                self.set_large(large)?;
            }
            BlobRef::Large(mut large) if n <= large.offset => {
                large.offset -= n;
                large.size += n;
                self.set_large(large)?;
            }
            BlobRef::Large(mut large) => {
                let capacity = self.layout.data_capacity();
                let shortfall = n - large.offset;
                let fresh = shortfall.div_ceil(capacity);
                let ids = load_index(&*tx, large.index)?;
                if ids.len() + fresh > self.layout.index_capacity() {
                    return Err(KvError::Invalid("blob exceeds index capacity"));
                }
                let mut head = Vec::with_capacity(fresh + ids.len());
                for _ in 0..fresh {
                    head.push(tx.allocate_page(PageKind::Overflow)?);
                }
                head.extend_from_slice(&ids);
                store_index(tx, large.index, &head)?;
                large.offset = fresh * capacity - shortfall;
                large.size += n;
                self.set_large(large)?;
            }
        }
        trace!(old_size, added = n, "blob.grow_head");
        Ok(())
    }

    /// Exposes `len` bytes starting at logical `offset`.
    ///
    /// Page buffers behind the window stay checked out of `tx` until the
    /// window is dropped.
    pub fn expose_window<'w, 'p>(
        &'w mut self,
        tx: &'w mut WriteGuard<'p>,
        offset: usize,
        len: usize,
        mode: AccessMode,
    ) -> Result<BlobWindow<'w, 'p>> {
        let end = offset
            .checked_add(len)
            .ok_or(KvError::Invalid("blob window overflows"))?;
        if end > self.current_size() {
            return Err(KvError::Invalid("blob window past end of value"));
        }
        match self.state {
            BlobRef::Inline { .. } => {
                let mut window = BlobWindow::new(tx, mode, len);
                let start = INLINE_REF_HDR + offset;
                window.push(Segment::Inline(&mut self.slot[start..start + len]));
                Ok(window)
            }
            BlobRef::Large(large) => {
                let ids = load_index(&*tx, large.index)?;
                let capacity = self.layout.data_capacity();
                let mut window = BlobWindow::new(tx, mode, len);
                let mut pos = large.offset + offset;
                let mut remaining = len;
                while remaining > 0 {
                    let id = *ids
                        .get(pos / capacity)
                        .ok_or(KvError::Corruption("blob index shorter than value"))?;
                    let within = pos % capacity;
                    let take = min(capacity - within, remaining);
                    let lease = window.tx().lease_page(id, mode)?;
                    window.push(Segment::Page {
                        lease,
                        start: PAGE_HDR_LEN + within,
                        end: PAGE_HDR_LEN + within + take,
                    });
                    pos += take;
                    remaining -= take;
                }
                Ok(window)
            }
        }
    }

    /// Frees every page of the value and leaves an empty inline value.
    pub fn clear(&mut self, tx: &mut WriteGuard<'_>) -> Result<()> {
        if let BlobRef::Large(large) = self.state {
            let ids = load_index(&*tx, large.index)?;
            for id in &ids {
                tx.free_page(*id)?;
            }
            tx.free_page(large.index)?;
            trace!(blocks = ids.len(), size = large.size, "blob.clear");
        }
        *self.slot = empty_ref();
        self.state = BlobRef::Inline { len: 0 };
        Ok(())
    }

    fn convert_to_large(
        &mut self,
        tx: &mut WriteGuard<'_>,
        existing: &[u8],
        lead: usize,
        new_size: usize,
    ) -> Result<LargeRef> {
        let capacity = self.layout.data_capacity();
        let blocks = new_size.div_ceil(capacity);
        if blocks > self.layout.index_capacity() {
            return Err(KvError::Invalid("blob exceeds index capacity"));
        }
        let index = tx.allocate_page(PageKind::BlobIndex)?;
        let mut ids = Vec::with_capacity(blocks);
        for _ in 0..blocks {
            ids.push(tx.allocate_page(PageKind::Overflow)?);
        }
        store_index(tx, index, &ids)?;
        write_blocks(tx, &ids, capacity, lead, existing)?;
        trace!(
            index = index.0,
            blocks,
            moved = existing.len(),
            "blob.convert_to_large"
        );
        Ok(LargeRef {
            size: new_size,
            offset: 0,
            index,
        })
    }

    fn set_inline_len(&mut self, len: usize) -> Result<()> {
        let encoded: u16 = len
            .try_into()
            .map_err(|_| KvError::Invalid("inline value too long"))?;
        self.slot[1..INLINE_REF_HDR].copy_from_slice(&encoded.to_be_bytes());
        self.state = BlobRef::Inline { len };
        Ok(())
    }

    fn set_large(&mut self, large: LargeRef) -> Result<()> {
        *self.slot = encode_large(&large)?;
        self.state = BlobRef::Large(large);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageStore, Pager, PagerOptions};
    use tempfile::tempdir;

    fn write(
        blob: &mut Blob<'_>,
        tx: &mut WriteGuard<'_>,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let mut window = blob.expose_window(tx, offset, bytes.len(), AccessMode::Write)?;
        window.buffers().copy_from_slice(bytes)?;
        Ok(())
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[derive(Default)]
    struct Recorder(Vec<PageId>);

    impl AcquireBlocks for Recorder {
        fn acquire_block(&mut self, id: PageId) -> Result<()> {
            self.0.push(id);
            Ok(())
        }
    }

    #[test]
    fn inline_growth_stays_in_slot() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("inline.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let mut slot = inline_ref(b"hello")?;
        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.grow_tail(&mut tx, 6)?;
        write(&mut blob, &mut tx, 5, b" world")?;
        blob.grow_head(&mut tx, 2)?;
        write(&mut blob, &mut tx, 0, b">>")?;
        assert_eq!(blob.current_size(), 13);
        assert_eq!(read_value(&slot, &layout, &tx)?, b">>hello world");
        assert_eq!(tx.changed_pages(), 0);
        Ok(())
    }

    #[test]
    fn crossing_the_threshold_moves_the_value_out() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("convert.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let existing = pattern(90, 1);
        let mut slot = inline_ref(&existing)?;
        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.grow_head(&mut tx, 20)?;
        write(&mut blob, &mut tx, 0, &[7u8; 20])?;
        assert!(matches!(blob.reference(), BlobRef::Large(_)));
        assert_eq!(slot.len(), LARGE_REF_LEN);
        assert_eq!(tx.changed_pages(), 2);
        pager.commit(tx)?;

        let mut expected = vec![7u8; 20];
        expected.extend_from_slice(&existing);
        assert_eq!(read_value(&slot, &layout, &pager)?, expected);
        Ok(())
    }

    #[test]
    fn head_growth_reuses_slack_in_the_first_block() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("head.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let body = pattern(5000, 3);
        let mut slot = empty_ref();
        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.grow_tail(&mut tx, body.len())?;
        write(&mut blob, &mut tx, 0, &body)?;
        assert_eq!(blob.large_value(&tx)?.map(|v| v.blocks().len()), Some(2));

        blob.grow_head(&mut tx, 10)?;
        write(&mut blob, &mut tx, 0, b"0123456789")?;
        let after_first = blob.large_value(&tx)?.map(|v| v.blocks().to_vec());
        assert_eq!(after_first.as_ref().map(Vec::len), Some(3));

        blob.grow_head(&mut tx, 5)?;
        write(&mut blob, &mut tx, 0, b"abcde")?;
        assert_eq!(
            blob.large_value(&tx)?.map(|v| v.blocks().to_vec()),
            after_first
        );
        match blob.reference() {
            BlobRef::Large(large) => assert_eq!(large.offset, layout.data_capacity() - 15),
            other => panic!("expected large value, got {other:?}"),
        }
        pager.commit(tx)?;

        let mut expected = b"abcde0123456789".to_vec();
        expected.extend_from_slice(&body);
        assert_eq!(read_value(&slot, &layout, &pager)?, expected);
        Ok(())
    }

    #[test]
    fn tail_growth_spans_block_boundaries() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tail.db");
        let layout = BlobLayout::new(4096, 100)?;
        let first = pattern(4000, 9);
        let second = pattern(300, 200);
        let mut slot = empty_ref();
        {
            let pager = Pager::create(&path, PagerOptions::default())?;
            let mut tx = pager.begin_write()?;
            let mut blob = Blob::new(&mut slot, layout)?;
            blob.grow_tail(&mut tx, first.len())?;
            write(&mut blob, &mut tx, 0, &first)?;
            blob.grow_tail(&mut tx, second.len())?;
            write(&mut blob, &mut tx, first.len(), &second)?;
            pager.commit(tx)?;
        }
        let pager = Pager::open(&path, PagerOptions::default())?;
        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        assert_eq!(read_value(&slot, &layout, &pager)?, expected);
        Ok(())
    }

    #[test]
    fn clear_frees_index_and_blocks() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("clear.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let mut slot = empty_ref();
        let mut tx = pager.begin_write()?;
        Blob::new(&mut slot, layout)?.grow_tail(&mut tx, 9000)?;
        pager.commit(tx)?;

        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.clear(&mut tx)?;
        assert_eq!(blob.current_size(), 0);
        pager.commit(tx)?;
        assert_eq!(slot, empty_ref());
        assert_eq!(pager.stats().pages_freed, 4);
        Ok(())
    }

    #[test]
    fn acquisition_order_follows_direction() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("order.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let mut slot = empty_ref();
        let mut tx = pager.begin_write()?;
        Blob::new(&mut slot, layout)?.grow_tail(&mut tx, 3 * 4064)?;
        pager.commit(tx)?;

        let value = LargeValue::from_slot(&slot, &pager)?.expect("large value");
        let blocks = value.blocks().to_vec();
        assert_eq!(blocks.len(), 3);

        let mut rhs = Recorder::default();
        value.acquire_rhs(&mut rhs)?;
        assert_eq!(rhs.0, vec![value.index(), blocks[2], blocks[1], blocks[0]]);

        let mut lhs = Recorder::default();
        value.acquire_lhs(&mut lhs)?;
        assert_eq!(lhs.0, vec![value.index(), blocks[0], blocks[1], blocks[2]]);
        Ok(())
    }

    #[test]
    fn windows_return_their_leases_and_check_bounds() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("window.db"), PagerOptions::default())?;
        let layout = BlobLayout::new(4096, 100)?;
        let mut slot = empty_ref();
        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.grow_tail(&mut tx, 5000)?;
        assert!(matches!(
            blob.expose_window(&mut tx, 4990, 20, AccessMode::Read),
            Err(KvError::Invalid(_))
        ));
        {
            let mut window = blob.expose_window(&mut tx, 4000, 200, AccessMode::Read)?;
            assert_eq!(window.len(), 200);
            assert_eq!(window.buffers().part_count(), 2);
        }
        let value = blob.large_value(&tx)?.expect("large value");
        for id in value.blocks() {
            tx.read_page(*id)?;
        }
        Ok(())
    }

    #[test]
    fn growth_past_the_index_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let options = PagerOptions {
            page_size: 128,
            ..PagerOptions::default()
        };
        let pager = Pager::create(dir.path().join("small.db"), options)?;
        let layout = BlobLayout::new(128, 16)?;
        assert_eq!(layout.index_capacity(), 11);
        let mut slot = empty_ref();
        let mut tx = pager.begin_write()?;
        let mut blob = Blob::new(&mut slot, layout)?;
        blob.grow_tail(&mut tx, layout.max_blob_size())?;
        assert!(matches!(
            blob.grow_tail(&mut tx, 2 * layout.data_capacity()),
            Err(KvError::Invalid("blob exceeds index capacity"))
        ));
        Ok(())
    }

    #[test]
    fn corrupt_references_are_reported() {
        assert!(decode_ref(&[]).is_err());
        assert!(decode_ref(&[9, 0, 0]).is_err());
        assert!(decode_ref(&[REF_INLINE, 0, 4, 1]).is_err());
        assert!(decode_ref(&[REF_LARGE; 5]).is_err());
    }
}
