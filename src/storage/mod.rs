//! Key/value storage engine.
//!
//! Values live in blobs referenced from the leaves of a paged B-tree; every
//! mutation goes through the modify framework in [`btree`] and the concrete
//! operators in [`ops`].

/// Blob references, growth and byte windows.
pub mod blob;

/// Paged B-tree slice and the modify framework.
pub mod btree;

/// Append, prepend, set and delete operators.
pub mod ops;

pub use blob::{BlobLayout, BufferGroup};
pub use btree::{BTreeSlice, BTreeStatsSnapshot, SliceOptions, StoredValue};
pub use ops::{
    AppendPrependResult, BufferedSource, DataSource, DeleteResult, Direction, ReaderSource,
    SetResult,
};
