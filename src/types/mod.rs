#![forbid(unsafe_code)]
//! Identifiers, version metadata and the crate-wide error type.

use std::fmt;

pub mod checksum;
pub mod page;

pub use checksum::{page_crc32, Checksum, Crc32Fast};

/// Identifier of a fixed-size page in the database file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Commit sequence number assigned by the pager.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Lsn(pub u64);

/// Compare-and-set value plus timestamp stamped on a committed entry.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct CasTime {
    /// Opaque CAS token supplied by the caller.
    pub cas: u64,
    /// Replication timestamp supplied by the caller.
    pub timestamp: u32,
}

impl CasTime {
    /// Builds a new cas/timestamp pair.
    pub const fn new(cas: u64, timestamp: u32) -> Self {
        Self { cas, timestamp }
    }
}

/// Sequencing token attached by the layer above the tree.
///
/// Tokens inside one bucket must never go backwards; tokens from different
/// buckets are unrelated.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct OrderToken {
    /// Ordering bucket.
    pub bucket: u32,
    /// Position inside the bucket.
    pub value: u64,
}

impl OrderToken {
    /// Token that skips order checking entirely.
    pub const IGNORE: OrderToken = OrderToken {
        bucket: u32::MAX,
        value: 0,
    };

    /// Creates a token for `bucket` at position `value`.
    pub const fn new(bucket: u32, value: u64) -> Self {
        Self { bucket, value }
    }

    /// Returns true when this token opts out of order checking.
    pub fn is_ignore(&self) -> bool {
        self.bucket == u32::MAX
    }
}

/// Errors surfaced by the store.
#[derive(thiserror::Error, Debug)]
pub enum KvError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk structures failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument outside the supported range.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A page latch could not be acquired before the configured timeout.
    #[error("latch timeout on page {0}")]
    LatchTimeout(u64),
    /// An order token went backwards inside its bucket.
    #[error("order token regressed in bucket {bucket}: last {last}, got {got}")]
    OrderViolation {
        /// Bucket of the offending token.
        bucket: u32,
        /// Highest value seen so far.
        last: u64,
        /// Value that was rejected.
        got: u64,
    },
    /// Configuration could not be parsed or failed validation.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, KvError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_token_is_recognised() {
        assert!(OrderToken::IGNORE.is_ignore());
        assert!(!OrderToken::new(0, 7).is_ignore());
    }

    #[test]
    fn order_violation_message_names_bucket() {
        let err = KvError::OrderViolation {
            bucket: 3,
            last: 10,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "order token regressed in bucket 3: last 10, got 4"
        );
    }
}
