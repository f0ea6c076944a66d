//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, page latching and the transactional pager.

/// Page latches and ordered acquisition.
///
/// Reader/writer latches keyed by page id, held for the lifetime of one operation.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Paging subsystem.
///
/// Page allocation, caching and copy-on-write transactions.
pub mod pager;
