use tracing::trace;

use super::append_prepend::estimate_block_delta;
use super::data_source::DataSource;
use crate::primitives::pager::{AccessMode, WriteGuard};
use crate::storage::blob::{empty_ref, Blob, BlobLayout};
use crate::storage::btree::{run_modify_oper, BTreeSlice, ModifyOper};
use crate::types::{CasTime, KvError, OrderToken, Result};

/// Outcome of a set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetResult {
    /// The value was stored.
    Stored,
    /// The value exceeds the maximum value size.
    TooLarge,
}

/// Modify operation that stores a whole value, replacing any previous one.
pub struct SetOper<S> {
    source: Option<S>,
    size: usize,
    max_value_size: usize,
    max_in_node_value_size: usize,
    result: Option<SetResult>,
}

impl<S: DataSource> SetOper<S> {
    /// Builds an operator that owns `source` until it is drained.
    pub fn new(source: S, max_value_size: usize, max_in_node_value_size: usize) -> Self {
        Self {
            size: source.size(),
            source: Some(source),
            max_value_size,
            max_in_node_value_size,
            result: None,
        }
    }

    /// Outcome, once `operate` has run.
    pub fn result(&self) -> Option<SetResult> {
        self.result
    }
}

impl<S: DataSource> ModifyOper for SetOper<S> {
    fn operate(
        &mut self,
        tx: &mut WriteGuard<'_>,
        value: &mut Option<Vec<u8>>,
        layout: &BlobLayout,
    ) -> Result<bool> {
        if self.size > self.max_value_size {
            self.result = Some(SetResult::TooLarge);
            return Ok(false);
        }
        let source = self
            .source
            .take()
            .ok_or(KvError::Invalid("data source already consumed"))?;
        let replaced = value.is_some();
        let mut slot = value.take().unwrap_or_else(empty_ref);
        {
            let mut blob = Blob::new(&mut slot, *layout)?;
            blob.clear(tx)?;
            blob.grow_tail(tx, self.size)?;
            let mut window = blob.expose_window(tx, 0, self.size, AccessMode::Write)?;
            let mut buffers = window.buffers();
            source.fill(&mut buffers)?;
        }
        *value = Some(slot);
        trace!(size = self.size, replaced, "set.stored");
        self.result = Some(SetResult::Stored);
        Ok(true)
    }

    fn expected_change_count(&self, block_size: usize) -> usize {
        estimate_block_delta(self.size, self.max_in_node_value_size, block_size)
    }
}

/// Stores `source` under `key`.
pub fn set<S: DataSource>(
    slice: &BTreeSlice,
    key: &[u8],
    source: S,
    castime: CasTime,
    token: OrderToken,
) -> Result<SetResult> {
    let options = slice.options();
    let mut oper = SetOper::new(source, options.max_value_size, options.max_in_node_value_size);
    run_modify_oper(&mut oper, slice, key, castime, token)?;
    oper.result()
        .ok_or(KvError::Invalid("set finished without a result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageStore, Pager, PagerOptions};
    use crate::storage::btree::SliceOptions;
    use crate::storage::ops::data_source::BufferedSource;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn replacing_a_large_value_recycles_its_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Arc::new(Pager::create(dir.path().join("set.db"), PagerOptions::default())?);
        let store: Arc<dyn PageStore> = pager.clone();
        let slice = BTreeSlice::open(store, SliceOptions::default())?;
        let big = vec![5u8; 10_000];
        let stored = set(
            &slice,
            b"k",
            BufferedSource::from(big.clone()),
            CasTime::default(),
            OrderToken::IGNORE,
        )?;
        assert_eq!(stored, SetResult::Stored);
        assert_eq!(slice.get(b"k")?.map(|v| v.value), Some(big));

        set(
            &slice,
            b"k",
            BufferedSource::from(&b"tiny"[..]),
            CasTime::default(),
            OrderToken::IGNORE,
        )?;
        assert_eq!(slice.get(b"k")?.map(|v| v.value), Some(b"tiny".to_vec()));
        assert_eq!(pager.stats().pages_freed, 4);
        Ok(())
    }

    #[test]
    fn oversized_values_are_refused() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = Pager::create(dir.path().join("refuse.db"), PagerOptions::default())?;
        let store: Arc<dyn PageStore> = Arc::new(pager);
        let slice = BTreeSlice::open(
            store,
            SliceOptions {
                max_value_size: 64,
                ..SliceOptions::default()
            },
        )?;
        let result = set(
            &slice,
            b"k",
            BufferedSource::from(vec![0u8; 65]),
            CasTime::default(),
            OrderToken::IGNORE,
        )?;
        assert_eq!(result, SetResult::TooLarge);
        assert_eq!(slice.get(b"k")?, None);
        Ok(())
    }
}
