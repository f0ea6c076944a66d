use std::convert::TryInto;

use crate::types::page::{self, PageKind, PAGE_HDR_LEN};
use crate::types::{CasTime, KvError, PageId, Result};

/// Number of bytes of node header that follow the page header.
pub const NODE_HDR_LEN: usize = 16;

const COUNT_OFFSET: usize = PAGE_HDR_LEN;
const LINK_OFFSET: usize = PAGE_HDR_LEN + 4;
const ENTRIES_OFFSET: usize = PAGE_HDR_LEN + NODE_HDR_LEN;

/// Leaf entry bytes besides key and value reference
/// (`key_len:u8`, `cas:u64`, `timestamp:u32`, `ref_len:u16`).
pub const LEAF_ENTRY_OVERHEAD: usize = 1 + 8 + 4 + 2;

/// Internal entry bytes besides the separator key (`key_len:u8`, `child:u64`).
pub const INTERNAL_ENTRY_OVERHEAD: usize = 1 + 8;

/// Encoded size of a leaf entry.
pub fn leaf_entry_len(key_len: usize, ref_len: usize) -> usize {
    LEAF_ENTRY_OVERHEAD + key_len + ref_len
}

/// Encoded size of an internal entry.
pub fn internal_entry_len(key_len: usize) -> usize {
    INTERNAL_ENTRY_OVERHEAD + key_len
}

/// Bytes available for entries on a page of `page_size`.
pub fn node_capacity(page_size: usize) -> usize {
    page_size.saturating_sub(ENTRIES_OFFSET)
}

/// Kind recorded in the page header of a tree page.
pub fn node_kind(data: &[u8]) -> Result<PageKind> {
    Ok(page::PageHeader::decode(data)?.kind)
}

/// A key with its version and blob reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafEntry {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Version stamped by the last committed mutation.
    pub castime: CasTime,
    /// Encoded blob reference.
    pub value_ref: Vec<u8>,
}

impl LeafEntry {
    /// Encoded size of this entry.
    pub fn encoded_len(&self) -> usize {
        leaf_entry_len(self.key.len(), self.value_ref.len())
    }
}

/// Decoded leaf page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafNode {
    /// Entries in ascending key order.
    pub entries: Vec<LeafEntry>,
    /// Next leaf to the right.
    pub right_sibling: Option<PageId>,
}

impl LeafNode {
    /// Decodes the leaf stored in `data`.
    pub fn decode(data: &[u8], id: PageId) -> Result<Self> {
        page::expect_kind(data, id, PageKind::BTreeLeaf)?;
        let count = read_u16(data, COUNT_OFFSET)? as usize;
        let right_sibling = decode_page_id(read_u64(data, LINK_OFFSET)?);
        let mut entries = Vec::with_capacity(count);
        let mut at = ENTRIES_OFFSET;
        for _ in 0..count {
            let key_len = *data
                .get(at)
                .ok_or(KvError::Corruption("leaf entry truncated"))? as usize;
            at += 1;
            let key = slice(data, at, key_len)?.to_vec();
            at += key_len;
            let cas = read_u64(data, at)?;
            let timestamp = read_u32(data, at + 8)?;
            let ref_len = read_u16(data, at + 12)? as usize;
            at += 14;
            let value_ref = slice(data, at, ref_len)?.to_vec();
            at += ref_len;
            entries.push(LeafEntry {
                key,
                castime: CasTime::new(cas, timestamp),
                value_ref,
            });
        }
        Ok(Self {
            entries,
            right_sibling,
        })
    }

    /// Writes the node into `data`, leaving the page header alone.
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        if self.used() > node_capacity(data.len()) {
            return Err(KvError::Invalid("leaf entries exceed page"));
        }
        let count: u16 = self
            .entries
            .len()
            .try_into()
            .map_err(|_| KvError::Invalid("too many leaf entries"))?;
        data[PAGE_HDR_LEN..].fill(0);
        data[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&count.to_be_bytes());
        data[LINK_OFFSET..LINK_OFFSET + 8]
            .copy_from_slice(&encode_page_id(self.right_sibling).to_be_bytes());
        let mut at = ENTRIES_OFFSET;
        for entry in &self.entries {
            let key_len: u8 = entry
                .key
                .len()
                .try_into()
                .map_err(|_| KvError::Invalid("key too long"))?;
            let ref_len: u16 = entry
                .value_ref
                .len()
                .try_into()
                .map_err(|_| KvError::Invalid("value reference too long"))?;
            data[at] = key_len;
            at += 1;
            data[at..at + entry.key.len()].copy_from_slice(&entry.key);
            at += entry.key.len();
            data[at..at + 8].copy_from_slice(&entry.castime.cas.to_be_bytes());
            data[at + 8..at + 12].copy_from_slice(&entry.castime.timestamp.to_be_bytes());
            data[at + 12..at + 14].copy_from_slice(&ref_len.to_be_bytes());
            at += 14;
            data[at..at + entry.value_ref.len()].copy_from_slice(&entry.value_ref);
            at += entry.value_ref.len();
        }
        Ok(())
    }

    /// Bytes taken by the entries.
    pub fn used(&self) -> usize {
        self.entries.iter().map(LeafEntry::encoded_len).sum()
    }

    /// Bytes still free on a page of `page_size`.
    pub fn free_space(&self, page_size: usize) -> usize {
        node_capacity(page_size).saturating_sub(self.used())
    }

    /// Binary search by key.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
    }

    /// Moves the upper half (by bytes) into a new node and returns it together
    /// with its first key, the separator for the parent.
    pub fn split_off(&mut self) -> Result<(Vec<u8>, LeafNode)> {
        let at = split_index(self.entries.iter().map(LeafEntry::encoded_len))?;
        let upper = self.entries.split_off(at);
        let separator = upper
            .first()
            .map(|entry| entry.key.clone())
            .ok_or(KvError::Invalid("cannot split a single-entry leaf"))?;
        Ok((
            separator,
            LeafNode {
                entries: upper,
                right_sibling: self.right_sibling,
            },
        ))
    }
}

/// Decoded internal page.
///
/// `leftmost` covers keys below the first separator; the child next to a
/// separator covers keys greater than or equal to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalNode {
    /// Child for keys below every separator.
    pub leftmost: PageId,
    /// Separators in ascending order with their right-hand children.
    pub entries: Vec<(Vec<u8>, PageId)>,
}

impl InternalNode {
    /// Decodes the internal node stored in `data`.
    pub fn decode(data: &[u8], id: PageId) -> Result<Self> {
        page::expect_kind(data, id, PageKind::BTreeInternal)?;
        let count = read_u16(data, COUNT_OFFSET)? as usize;
        let leftmost = decode_page_id(read_u64(data, LINK_OFFSET)?)
            .ok_or(KvError::Corruption("internal node without leftmost child"))?;
        let mut entries = Vec::with_capacity(count);
        let mut at = ENTRIES_OFFSET;
        for _ in 0..count {
            let key_len = *data
                .get(at)
                .ok_or(KvError::Corruption("internal entry truncated"))? as usize;
            at += 1;
            let key = slice(data, at, key_len)?.to_vec();
            at += key_len;
            let child = decode_page_id(read_u64(data, at)?)
                .ok_or(KvError::Corruption("internal entry points at page 0"))?;
            at += 8;
            entries.push((key, child));
        }
        Ok(Self { leftmost, entries })
    }

    /// Writes the node into `data`, leaving the page header alone.
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        if self.used() > node_capacity(data.len()) {
            return Err(KvError::Invalid("internal entries exceed page"));
        }
        let count: u16 = self
            .entries
            .len()
            .try_into()
            .map_err(|_| KvError::Invalid("too many internal entries"))?;
        data[PAGE_HDR_LEN..].fill(0);
        data[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&count.to_be_bytes());
        data[LINK_OFFSET..LINK_OFFSET + 8].copy_from_slice(&self.leftmost.0.to_be_bytes());
        let mut at = ENTRIES_OFFSET;
        for (key, child) in &self.entries {
            let key_len: u8 = key
                .len()
                .try_into()
                .map_err(|_| KvError::Invalid("separator too long"))?;
            data[at] = key_len;
            at += 1;
            data[at..at + key.len()].copy_from_slice(key);
            at += key.len();
            data[at..at + 8].copy_from_slice(&child.0.to_be_bytes());
            at += 8;
        }
        Ok(())
    }

    /// Bytes taken by the entries.
    pub fn used(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, _)| internal_entry_len(key.len()))
            .sum()
    }

    /// Child whose range covers `key`.
    pub fn child_for(&self, key: &[u8]) -> PageId {
        let idx = self
            .entries
            .partition_point(|(separator, _)| separator.as_slice() <= key);
        match idx {
            0 => self.leftmost,
            n => self.entries[n - 1].1,
        }
    }

    /// Adds `separator` with `child` to its right.
    pub fn insert(&mut self, separator: Vec<u8>, child: PageId) {
        let idx = self
            .entries
            .partition_point(|(existing, _)| existing.as_slice() < separator.as_slice());
        self.entries.insert(idx, (separator, child));
    }

    /// Moves the upper half into a new node. The middle separator is removed
    /// and returned for the parent; its child becomes the new node's leftmost.
    pub fn split_off(&mut self) -> Result<(Vec<u8>, InternalNode)> {
        let at = split_index(self.entries.iter().map(|(key, _)| internal_entry_len(key.len())))?;
        let mut upper = self.entries.split_off(at);
        if upper.is_empty() {
            return Err(KvError::Invalid("cannot split a single-entry internal node"));
        }
        let (separator, leftmost) = upper.remove(0);
        Ok((
            separator,
            InternalNode {
                leftmost,
                entries: upper,
            },
        ))
    }
}

/// First index whose running byte total passes half of the node.
fn split_index(lens: impl Iterator<Item = usize> + Clone) -> Result<usize> {
    let total: usize = lens.clone().sum();
    let mut running = 0;
    for (idx, len) in lens.enumerate() {
        running += len;
        if running * 2 > total {
            return Ok(idx.max(1));
        }
    }
    Err(KvError::Invalid("cannot split an empty node"))
}

fn decode_page_id(raw: u64) -> Option<PageId> {
    (raw != 0).then_some(PageId(raw))
}

fn encode_page_id(id: Option<PageId>) -> u64 {
    id.map_or(0, |id| id.0)
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    data.get(at..at + len)
        .ok_or(KvError::Corruption("tree entry runs past page"))
}

fn read_u16(data: &[u8], at: usize) -> Result<u16> {
    Ok(u16::from_be_bytes(slice(data, at, 2)?.try_into().map_err(
        |_| KvError::Corruption("tree field truncated"),
    )?))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    Ok(u32::from_be_bytes(slice(data, at, 4)?.try_into().map_err(
        |_| KvError::Corruption("tree field truncated"),
    )?))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64> {
    Ok(u64::from_be_bytes(slice(data, at, 8)?.try_into().map_err(
        |_| KvError::Corruption("tree field truncated"),
    )?))
}
