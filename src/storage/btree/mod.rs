#![forbid(unsafe_code)]

//! Key/value B+ tree whose leaf entries reference blobs.

/// Node page format.
pub mod page;

mod modify;
mod slice;
mod stats;

pub use modify::{run_modify_oper, ModifyOper};
pub use slice::{BTreeSlice, SliceOptions, StoredValue, META_LATCH};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
