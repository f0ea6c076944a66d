//! Transactional, page-based key/value store with blob values that can grow
//! in place at either end.

#![warn(missing_docs)]

/// Store facade and options.
pub mod db;
/// Tracing subscriber setup.
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{Store, StoreOptions, StoreStats, SyncSetting};
pub use storage::btree::StoredValue;
pub use storage::ops::{
    AppendPrependResult, BufferedSource, DataSource, DeleteResult, Direction, ReaderSource,
    SetResult,
};
pub use types::{CasTime, KvError, OrderToken, Result};
