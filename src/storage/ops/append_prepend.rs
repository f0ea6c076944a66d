//! Appending to or prepending onto an existing value.
//!
//! The operator rejects missing keys and oversized results before touching
//! the blob, so a rejected call leaves the stored value byte-for-byte intact.
//! On success the blob grows at exactly one end by exactly the payload size
//! and the payload is drained straight into the new window.

use tracing::{debug, trace};

use super::data_source::DataSource;
use crate::primitives::concurrency::AcquireBlocks;
use crate::primitives::pager::{AccessMode, WriteGuard};
use crate::storage::blob::{Blob, BlobLayout, LargeValue};
use crate::storage::btree::{run_modify_oper, BTreeSlice, ModifyOper};
use crate::types::{CasTime, KvError, OrderToken, Result};

/// End of the value a payload is attached to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Payload goes after the existing bytes.
    Append,
    /// Payload goes before the existing bytes.
    Prepend,
}

impl Direction {
    /// Returns the string representation of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Append => "append",
            Direction::Prepend => "prepend",
        }
    }

    /// Acquires the pages of `value` from the end this direction works on:
    /// appenders start at the tail, prependers at the head.
    pub fn acquire(self, value: &LargeValue, sink: &mut dyn AcquireBlocks) -> Result<()> {
        match self {
            Direction::Append => value.acquire_rhs(sink),
            Direction::Prepend => value.acquire_lhs(sink),
        }
    }

    /// Grows `blob` by `n` bytes at this end and returns the logical offset
    /// of the new bytes.
    fn grow(self, blob: &mut Blob<'_>, tx: &mut WriteGuard<'_>, n: usize) -> Result<usize> {
        match self {
            Direction::Append => {
                let old_size = blob.current_size();
                blob.grow_tail(tx, n)?;
                Ok(old_size)
            }
            Direction::Prepend => {
                blob.grow_head(tx, n)?;
                Ok(0)
            }
        }
    }
}

/// Outcome of an append or prepend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendPrependResult {
    /// The payload was attached.
    Success,
    /// The key holds no value.
    NotFound,
    /// The combined value would exceed the maximum value size.
    TooLarge,
}

/// Upper bound on pages touched when attaching `payload` bytes: the leaf,
/// plus one fresh block per started `block_size` once the payload is too
/// large to stay inline.
pub fn estimate_block_delta(
    payload: usize,
    max_in_node_value_size: usize,
    block_size: usize,
) -> usize {
    if payload < max_in_node_value_size {
        1
    } else {
        1 + payload.div_ceil(block_size.max(1))
    }
}

/// Modify operation that appends or prepends a payload.
pub struct AppendPrependOper<S> {
    source: Option<S>,
    size: usize,
    direction: Direction,
    max_value_size: usize,
    max_in_node_value_size: usize,
    result: Option<AppendPrependResult>,
}

impl<S: DataSource> AppendPrependOper<S> {
    /// Builds an operator that owns `source` until it is drained.
    pub fn new(
        source: S,
        direction: Direction,
        max_value_size: usize,
        max_in_node_value_size: usize,
    ) -> Self {
        Self {
            size: source.size(),
            source: Some(source),
            direction,
            max_value_size,
            max_in_node_value_size,
            result: None,
        }
    }

    /// Direction of the operation.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Outcome, once `operate` has run.
    pub fn result(&self) -> Option<AppendPrependResult> {
        self.result
    }

    /// See [`estimate_block_delta`].
    pub fn estimate_block_delta(&self, block_size: usize) -> usize {
        estimate_block_delta(self.size, self.max_in_node_value_size, block_size)
    }
}

impl<S: DataSource> ModifyOper for AppendPrependOper<S> {
    fn operate(
        &mut self,
        tx: &mut WriteGuard<'_>,
        value: &mut Option<Vec<u8>>,
        layout: &BlobLayout,
    ) -> Result<bool> {
        let Some(slot) = value.as_mut() else {
            debug!(direction = self.direction.as_str(), "apr.not_found");
            self.result = Some(AppendPrependResult::NotFound);
            return Ok(false);
        };
        let mut blob = Blob::new(slot, *layout)?;
        let old_size = blob.current_size();
        let new_size = old_size.saturating_add(self.size);
        if new_size > self.max_value_size {
            debug!(
                direction = self.direction.as_str(),
                old_size,
                added = self.size,
                max = self.max_value_size,
                "apr.too_large"
            );
            self.result = Some(AppendPrependResult::TooLarge);
            return Ok(false);
        }
        let source = self
            .source
            .take()
            .ok_or(KvError::Invalid("data source already consumed"))?;
        let offset = self.direction.grow(&mut blob, tx, self.size)?;
        {
            let mut window = blob.expose_window(tx, offset, self.size, AccessMode::Write)?;
            let mut buffers = window.buffers();
            source.fill(&mut buffers)?;
        }
        trace!(
            direction = self.direction.as_str(),
            old_size,
            new_size,
            "apr.success"
        );
        self.result = Some(AppendPrependResult::Success);
        Ok(true)
    }

    fn expected_change_count(&self, block_size: usize) -> usize {
        self.estimate_block_delta(block_size)
    }

    fn acquire_large_value(
        &self,
        value: &LargeValue,
        latches: &mut dyn AcquireBlocks,
    ) -> Result<()> {
        self.direction.acquire(value, latches)
    }
}

/// Attaches `source` to the value stored under `key`.
pub fn append_prepend<S: DataSource>(
    slice: &BTreeSlice,
    key: &[u8],
    source: S,
    direction: Direction,
    castime: CasTime,
    token: OrderToken,
) -> Result<AppendPrependResult> {
    let options = slice.options();
    let mut oper = AppendPrependOper::new(
        source,
        direction,
        options.max_value_size,
        options.max_in_node_value_size,
    );
    run_modify_oper(&mut oper, slice, key, castime, token)?;
    oper.result()
        .ok_or(KvError::Invalid("append/prepend finished without a result"))
}
