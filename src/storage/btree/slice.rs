use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::page::{self, InternalNode, LeafNode};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::concurrency::{LatchMode, LatchSet, LatchTable};
use crate::primitives::pager::{PageRead, PageStore, WriteGuard};
use crate::storage::blob::{self, BlobLayout};
use crate::types::page::PageKind;
use crate::types::{CasTime, KvError, OrderToken, PageId, Result};

/// Page whose latch stands in for the shape of the whole tree.
pub const META_LATCH: PageId = PageId(0);

/// Limits and timeouts for a tree.
#[derive(Clone, Debug)]
pub struct SliceOptions {
    /// Longest accepted key.
    pub max_key_size: usize,
    /// Longest accepted value.
    pub max_value_size: usize,
    /// Values of this many bytes or more are stored out of line.
    pub max_in_node_value_size: usize,
    /// How long a latch wait may take before failing.
    pub latch_timeout: Duration,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            max_key_size: 250,
            max_value_size: 1024 * 1024,
            max_in_node_value_size: 250,
            latch_timeout: Duration::from_secs(5),
        }
    }
}

/// A committed value together with its version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredValue {
    /// Full value bytes.
    pub value: Vec<u8>,
    /// Version stamped by the last mutation.
    pub castime: CasTime,
}

/// A B+ tree of byte keys whose values are blobs.
pub struct BTreeSlice {
    store: Arc<dyn PageStore>,
    latches: LatchTable,
    layout: BlobLayout,
    options: SliceOptions,
    stats: Arc<BTreeStats>,
    order: Mutex<HashMap<u32, u64>>,
}

impl BTreeSlice {
    /// Opens the tree recorded in the store's metadata, creating an empty root
    /// leaf when there is none yet.
    pub fn open(store: Arc<dyn PageStore>, options: SliceOptions) -> Result<Self> {
        let page_size = store.page_size() as usize;
        let layout = BlobLayout::new(page_size, options.max_in_node_value_size)?;
        validate(&options, &layout)?;
        if store.meta()?.tree_root.0 == 0 {
            let mut write = store.begin_write()?;
            write.reserve(1);
            let root = write.allocate_page(PageKind::BTreeLeaf)?;
            {
                let mut page = write.page_mut(root)?;
                LeafNode::default().encode_into(page.data_mut())?;
            }
            write.set_root(root);
            store.commit(write)?;
            debug!(root = root.0, "btree.create_root");
        }
        Ok(Self {
            latches: LatchTable::new(options.latch_timeout),
            store,
            layout,
            options,
            stats: Arc::new(BTreeStats::default()),
            order: Mutex::new(HashMap::new()),
        })
    }

    /// Underlying page store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Latch table shared by every operation on this tree.
    pub fn latches(&self) -> &LatchTable {
        &self.latches
    }

    /// Blob layout for values in this tree.
    pub fn layout(&self) -> &BlobLayout {
        &self.layout
    }

    /// Limits the tree was opened with.
    pub fn options(&self) -> &SliceOptions {
        &self.options
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Largest encoded leaf entry the tree can be asked to hold.
    pub fn max_entry_len(&self) -> usize {
        page::leaf_entry_len(self.options.max_key_size, self.layout.max_ref_len())
    }

    /// Root page as currently committed.
    pub fn root_page(&self) -> Result<PageId> {
        Ok(self.store.meta()?.tree_root)
    }

    /// Looks up `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<StoredValue>> {
        self.check_key(key)?;
        let mut latches = self.latches.begin();
        latches.acquire(META_LATCH, LatchMode::Shared)?;
        let (leaf_id, _) = self.descend(&*self.store, self.root_page()?, key)?;
        latches.acquire(leaf_id, LatchMode::Shared)?;
        latches.release(META_LATCH);
        let leaf = LeafNode::decode(self.store.read_page(leaf_id)?.data(), leaf_id)?;
        let Ok(pos) = leaf.search(key) else {
            return Ok(None);
        };
        let entry = &leaf.entries[pos];
        let value = blob::read_value(&entry.value_ref, &self.layout, &*self.store)?;
        Ok(Some(StoredValue {
            value,
            castime: entry.castime,
        }))
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(KvError::Invalid("key must not be empty"));
        }
        if key.len() > self.options.max_key_size {
            return Err(KvError::Invalid("key exceeds max_key_size"));
        }
        Ok(())
    }

    /// Rejects tokens that go backwards inside their bucket.
    pub(crate) fn check_order(&self, token: OrderToken) -> Result<()> {
        if token.is_ignore() {
            return Ok(());
        }
        match self.order.lock().get(&token.bucket) {
            Some(&last) if token.value < last => {
                self.stats.inc_order_violations();
                debug!(bucket = token.bucket, last, got = token.value, "btree.order_violation");
                Err(KvError::OrderViolation {
                    bucket: token.bucket,
                    last,
                    got: token.value,
                })
            }
            _ => Ok(()),
        }
    }

    /// Advances the token's bucket once an operation has committed or
    /// declined. Failed operations never reach this.
    pub(crate) fn record_order(&self, token: OrderToken) {
        if token.is_ignore() {
            return;
        }
        let mut order = self.order.lock();
        let last = order.entry(token.bucket).or_insert(token.value);
        *last = (*last).max(token.value);
    }

    /// Walks from `root` to the leaf covering `key`, returning the leaf and
    /// the internal pages passed on the way.
    pub(crate) fn descend<R: PageRead + ?Sized>(
        &self,
        src: &R,
        root: PageId,
        key: &[u8],
    ) -> Result<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut current = root;
        loop {
            let page = src.read_page(current)?;
            match page::node_kind(page.data())? {
                PageKind::BTreeLeaf => {
                    self.stats.inc_leaf_searches();
                    return Ok((current, path));
                }
                PageKind::BTreeInternal => {
                    self.stats.inc_internal_searches();
                    let node = InternalNode::decode(page.data(), current)?;
                    path.push(current);
                    current = node.child_for(key);
                }
                _ => return Err(KvError::Corruption("unexpected page kind in tree")),
            }
            if path.len() > 64 {
                return Err(KvError::Corruption("tree deeper than supported"));
            }
        }
    }

    /// Writes `leaf` back to `leaf_id`, splitting up the tree when it no
    /// longer fits. Splits require the meta latch.
    pub(crate) fn write_leaf(
        &self,
        tx: &mut WriteGuard<'_>,
        latches: &LatchSet<'_>,
        path: &[PageId],
        leaf_id: PageId,
        mut leaf: LeafNode,
    ) -> Result<()> {
        let capacity = page::node_capacity(tx.page_size());
        if leaf.used() <= capacity {
            let mut page = tx.page_mut(leaf_id)?;
            return leaf.encode_into(page.data_mut());
        }
        if latches.holds(META_LATCH) != Some(LatchMode::Exclusive) {
            return Err(KvError::Invalid("leaf split without the tree latch"));
        }
        let (separator, upper) = leaf.split_off()?;
        let upper_id = tx.allocate_page(PageKind::BTreeLeaf)?;
        leaf.right_sibling = Some(upper_id);
        {
            let mut page = tx.page_mut(leaf_id)?;
            leaf.encode_into(page.data_mut())?;
        }
        {
            let mut page = tx.page_mut(upper_id)?;
            upper.encode_into(page.data_mut())?;
        }
        self.stats.inc_leaf_splits();
        trace!(left = leaf_id.0, right = upper_id.0, "btree.leaf_split");
        self.insert_separator(tx, path, separator, upper_id, leaf_id)
    }

    fn insert_separator(
        &self,
        tx: &mut WriteGuard<'_>,
        path: &[PageId],
        mut separator: Vec<u8>,
        mut child: PageId,
        mut left: PageId,
    ) -> Result<()> {
        let capacity = page::node_capacity(tx.page_size());
        for parent_id in path.iter().rev().copied() {
            let mut node = InternalNode::decode(tx.read_page(parent_id)?.data(), parent_id)?;
            node.insert(separator, child);
            if node.used() <= capacity {
                let mut page = tx.page_mut(parent_id)?;
                return node.encode_into(page.data_mut());
            }
            let (promoted, upper) = node.split_off()?;
            let upper_id = tx.allocate_page(PageKind::BTreeInternal)?;
            {
                let mut page = tx.page_mut(parent_id)?;
                node.encode_into(page.data_mut())?;
            }
            {
                let mut page = tx.page_mut(upper_id)?;
                upper.encode_into(page.data_mut())?;
            }
            self.stats.inc_internal_splits();
            trace!(left = parent_id.0, right = upper_id.0, "btree.internal_split");
            separator = promoted;
            child = upper_id;
            left = parent_id;
        }
        let root_id = tx.allocate_page(PageKind::BTreeInternal)?;
        let root = InternalNode {
            leftmost: left,
            entries: vec![(separator, child)],
        };
        {
            let mut page = tx.page_mut(root_id)?;
            root.encode_into(page.data_mut())?;
        }
        tx.set_root(root_id);
        self.stats.inc_root_splits();
        debug!(root = root_id.0, "btree.new_root");
        Ok(())
    }
}

fn validate(options: &SliceOptions, layout: &BlobLayout) -> Result<()> {
    if options.max_key_size == 0 || options.max_key_size > u8::MAX as usize {
        return Err(KvError::Invalid("max_key_size must be within 1..=255"));
    }
    if options.max_value_size > layout.max_blob_size() {
        return Err(KvError::Invalid("max_value_size exceeds blob capacity"));
    }
    let capacity = page::node_capacity(layout.page_size());
    let leaf_entry = page::leaf_entry_len(options.max_key_size, layout.max_ref_len());
    let internal_entry = page::internal_entry_len(options.max_key_size);
    if leaf_entry * 4 > capacity || internal_entry * 4 > capacity {
        return Err(KvError::Invalid("page too small for the configured key and inline sizes"));
    }
    Ok(())
}
