//! Locate-latch-mutate-commit driver shared by every write operation.
//!
//! [`run_modify_oper`] finds the leaf holding a key, latches it, lets a
//! [`ModifyOper`] rewrite the key's blob reference, and commits the result
//! stamped with the caller's [`CasTime`]. Operations that decline to mutate
//! leave no trace besides an aborted transaction and their order token.

use tracing::trace;

use super::page::{LeafEntry, LeafNode};
use super::slice::{BTreeSlice, META_LATCH};
use crate::primitives::concurrency::{AcquireBlocks, LatchMode};
use crate::primitives::pager::{PageRead, WriteGuard};
use crate::storage::blob::{BlobLayout, LargeValue};
use crate::types::{CasTime, OrderToken, Result};

/// Pages a mutation may touch beyond what the operation itself predicts: the
/// blob index page, a partially filled edge block and the inline-to-large
/// conversion's index page.
const BLOB_SLACK: usize = 3;

/// Callbacks a write operation supplies to [`run_modify_oper`].
pub trait ModifyOper {
    /// Mutates `value`, the blob reference stored under the key (`None` when
    /// the key is absent). Setting it to `None` removes the key.
    ///
    /// Returns `false` to abandon the mutation; nothing is written then.
    fn operate(
        &mut self,
        tx: &mut WriteGuard<'_>,
        value: &mut Option<Vec<u8>>,
        layout: &BlobLayout,
    ) -> Result<bool>;

    /// Upper bound on pages the mutation will touch, used to size the
    /// transaction before any I/O.
    fn expected_change_count(&self, block_size: usize) -> usize;

    /// Acquires the pages of the existing large value in the order this
    /// operation needs them. Called only for out-of-line values.
    fn acquire_large_value(
        &self,
        value: &LargeValue,
        latches: &mut dyn AcquireBlocks,
    ) -> Result<()> {
        value.acquire_lhs(latches)
    }
}

/// Runs `oper` against `key` and returns whether it committed a mutation.
pub fn run_modify_oper<O: ModifyOper + ?Sized>(
    oper: &mut O,
    slice: &BTreeSlice,
    key: &[u8],
    castime: CasTime,
    token: OrderToken,
) -> Result<bool> {
    slice.check_key(key)?;
    slice.check_order(token)?;
    let stats = slice.stats();
    let mut latches = slice.latches().begin();
    let mut tx = slice.store().begin_write()?;
    let page_size = tx.page_size();
    tx.reserve(oper.expected_change_count(page_size));

    latches.acquire(META_LATCH, LatchMode::Exclusive)?;
    let root = tx.tree_root();
    let (leaf_id, path) = slice.descend(&tx, root, key)?;
    tx.reserve(BLOB_SLACK + path.len() + 2);
    latches.acquire(leaf_id, LatchMode::Exclusive)?;

    let mut leaf = LeafNode::decode(tx.read_page(leaf_id)?.data(), leaf_id)?;
    if leaf.free_space(page_size) >= slice.max_entry_len() {
        latches.release(META_LATCH);
        stats.inc_early_meta_releases();
    }

    let found = leaf.search(key);
    let mut value = found.ok().map(|pos| leaf.entries[pos].value_ref.clone());
    if let Some(slot) = value.as_deref() {
        if let Some(large) = LargeValue::from_slot(slot, &tx)? {
            oper.acquire_large_value(&large, &mut latches)?;
        }
    }

    if !oper.operate(&mut tx, &mut value, slice.layout())? {
        slice.record_order(token);
        stats.inc_modify_noops();
        trace!(leaf = leaf_id.0, "btree.modify.noop");
        return Ok(false);
    }

    match (found, value) {
        (Ok(pos), Some(value_ref)) => {
            let entry = &mut leaf.entries[pos];
            entry.value_ref = value_ref;
            entry.castime = castime;
        }
        (Ok(pos), None) => {
            leaf.entries.remove(pos);
        }
        (Err(pos), Some(value_ref)) => leaf.entries.insert(
            pos,
            LeafEntry {
                key: key.to_vec(),
                castime,
                value_ref,
            },
        ),
        (Err(_), None) => {}
    }
    slice.write_leaf(&mut tx, &latches, &path, leaf_id, leaf)?;
    let changed = tx.changed_pages();
    tx.note_cas(castime.cas);
    let lsn = slice.store().commit(tx)?;
    slice.record_order(token);
    stats.inc_modify_commits();
    trace!(leaf = leaf_id.0, lsn = lsn.0, changed, "btree.modify.commit");
    Ok(true)
}
