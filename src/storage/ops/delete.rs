use tracing::trace;

use crate::primitives::pager::WriteGuard;
use crate::storage::blob::{Blob, BlobLayout};
use crate::storage::btree::{run_modify_oper, BTreeSlice, ModifyOper};
use crate::types::{CasTime, KvError, OrderToken, Result};

/// Outcome of a delete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteResult {
    /// The key and its value were removed.
    Deleted,
    /// The key holds no value.
    NotFound,
}

/// Modify operation that removes a key and frees its blob.
#[derive(Default)]
pub struct DeleteOper {
    result: Option<DeleteResult>,
}

impl DeleteOper {
    /// Builds a delete operator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome, once `operate` has run.
    pub fn result(&self) -> Option<DeleteResult> {
        self.result
    }
}

impl ModifyOper for DeleteOper {
    fn operate(
        &mut self,
        tx: &mut WriteGuard<'_>,
        value: &mut Option<Vec<u8>>,
        layout: &BlobLayout,
    ) -> Result<bool> {
        let Some(mut slot) = value.take() else {
            self.result = Some(DeleteResult::NotFound);
            return Ok(false);
        };
        let mut blob = Blob::new(&mut slot, *layout)?;
        let size = blob.current_size();
        blob.clear(tx)?;
        trace!(size, "delete.removed");
        self.result = Some(DeleteResult::Deleted);
        Ok(true)
    }

    fn expected_change_count(&self, _block_size: usize) -> usize {
        1
    }
}

/// Removes `key`.
pub fn delete(
    slice: &BTreeSlice,
    key: &[u8],
    castime: CasTime,
    token: OrderToken,
) -> Result<DeleteResult> {
    let mut oper = DeleteOper::new();
    run_modify_oper(&mut oper, slice, key, castime, token)?;
    oper.result()
        .ok_or(KvError::Invalid("delete finished without a result"))
}
