#![forbid(unsafe_code)]

mod meta;
mod pager;

pub use meta::{load_meta, Meta};
pub use pager::{
    AccessMode, PageLease, PageMut, PageRead, PageRef, PageStore, Pager, PagerOptions,
    PagerStats, Synchronous, WriteGuard,
};
