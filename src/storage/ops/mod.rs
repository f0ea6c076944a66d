#![forbid(unsafe_code)]

//! Write operations built on the modify framework.

/// Payload suppliers.
pub mod data_source;

mod append_prepend;
mod delete;
mod set;

pub use append_prepend::{
    append_prepend, estimate_block_delta, AppendPrependOper, AppendPrependResult, Direction,
};
pub use data_source::{BufferedSource, DataSource, ReaderSource};
pub use delete::{delete, DeleteOper, DeleteResult};
pub use set::{set, SetOper, SetResult};
