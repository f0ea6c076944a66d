#![forbid(unsafe_code)]

//! Public entry point: a single-file key/value store.

mod config;

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

pub use config::{StoreOptions, SyncSetting};

use crate::primitives::concurrency::LatchStatsSnapshot;
use crate::primitives::pager::{PageStore, Pager, PagerStats};
use crate::storage::btree::{BTreeSlice, BTreeStatsSnapshot, StoredValue};
use crate::storage::ops::{
    self, AppendPrependResult, DataSource, DeleteResult, Direction, SetResult,
};
use crate::types::{CasTime, KvError, OrderToken, Result};

/// Counters gathered from every layer of a [`Store`].
#[derive(Clone, Debug)]
pub struct StoreStats {
    /// Pager traffic.
    pub pager: PagerStats,
    /// Tree and modify-framework counters.
    pub btree: BTreeStatsSnapshot,
    /// Latch traffic.
    pub latches: LatchStatsSnapshot,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.pager)?;
        let b = &self.btree;
        writeln!(
            f,
            "btree: commits={} noops={} early_meta_releases={} leaf_splits={} internal_splits={} root_splits={} order_violations={}",
            b.modify_commits,
            b.modify_noops,
            b.early_meta_releases,
            b.leaf_splits,
            b.internal_splits,
            b.root_splits,
            b.order_violations
        )?;
        write!(
            f,
            "latches: acquired={} contended={} timeouts={}",
            self.latches.acquired, self.latches.contended, self.latches.timeouts
        )
    }
}

/// A key/value store backed by one database file.
///
/// All methods take `&self`; share a store between threads with [`Arc`].
/// The convenience writers (`set`, `append`, `prepend`, `delete`) stamp each
/// mutation with a fresh [`CasTime`] and skip order checking; use
/// [`append_prepend`](Self::append_prepend) to supply both explicitly.
pub struct Store {
    pager: Arc<Pager>,
    slice: BTreeSlice,
    options: StoreOptions,
    next_cas: AtomicU64,
}

impl Store {
    /// Creates a new database at `path`.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let pager = Pager::create(path.as_ref(), options.pager_options())?;
        info!(path = %path.as_ref().display(), page_size = options.page_size, "store.create");
        Self::with_pager(pager, options)
    }

    /// Opens an existing database at `path`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        if !path.as_ref().exists() {
            return Err(KvError::Invalid("database file does not exist"));
        }
        let pager = Pager::open(path.as_ref(), options.pager_options())?;
        info!(path = %path.as_ref().display(), "store.open");
        Self::with_pager(pager, options)
    }

    /// Opens `path`, creating the database when the file is missing or empty.
    pub fn open_or_create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let exists = match std::fs::metadata(path) {
            Ok(meta) => meta.len() > 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        if exists {
            Self::open(path, options)
        } else {
            Self::create(path, options)
        }
    }

    fn with_pager(pager: Pager, options: StoreOptions) -> Result<Self> {
        let pager = Arc::new(pager);
        let store: Arc<dyn PageStore> = pager.clone();
        let slice = BTreeSlice::open(store, options.slice_options())?;
        let meta = pager.meta()?;
        let next_cas = meta.cas_high_water.max(meta.last_commit_lsn.0) + 1;
        Ok(Self {
            pager,
            slice,
            options,
            next_cas: AtomicU64::new(next_cas),
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Underlying tree.
    pub fn slice(&self) -> &BTreeSlice {
        &self.slice
    }

    /// Reads the value and version stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<StoredValue>> {
        self.slice.get(key)
    }

    /// Stores `source` under `key`, replacing any previous value.
    pub fn set<S: DataSource>(&self, key: &[u8], source: S) -> Result<SetResult> {
        ops::set(&self.slice, key, source, self.next_castime(), OrderToken::IGNORE)
    }

    /// Removes `key`.
    pub fn delete(&self, key: &[u8]) -> Result<DeleteResult> {
        ops::delete(&self.slice, key, self.next_castime(), OrderToken::IGNORE)
    }

    /// Adds `source` after the value stored under `key`.
    pub fn append<S: DataSource>(&self, key: &[u8], source: S) -> Result<AppendPrependResult> {
        self.append_prepend(
            key,
            source,
            Direction::Append,
            self.next_castime(),
            OrderToken::IGNORE,
        )
    }

    /// Adds `source` before the value stored under `key`.
    pub fn prepend<S: DataSource>(&self, key: &[u8], source: S) -> Result<AppendPrependResult> {
        self.append_prepend(
            key,
            source,
            Direction::Prepend,
            self.next_castime(),
            OrderToken::IGNORE,
        )
    }

    /// Appends or prepends with a caller-chosen version and order token.
    pub fn append_prepend<S: DataSource>(
        &self,
        key: &[u8],
        source: S,
        direction: Direction,
        castime: CasTime,
        token: OrderToken,
    ) -> Result<AppendPrependResult> {
        ops::append_prepend(&self.slice, key, source, direction, castime, token)
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            pager: self.pager.stats(),
            btree: self.slice.stats_snapshot(),
            latches: self.slice.latches().stats().snapshot(),
        }
    }

    fn next_castime(&self) -> CasTime {
        let cas = self.next_cas.fetch_add(1, Ordering::Relaxed);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        CasTime::new(cas, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ops::{AppendPrependResult, BufferedSource, DeleteResult};
    use tempfile::tempdir;

    #[test]
    fn castimes_increase_across_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cas.db");
        let first = {
            let store = Store::open_or_create(&path, StoreOptions::default())?;
            store.set(b"k", BufferedSource::from(&b"a"[..]))?;
            store.set(b"k", BufferedSource::from(&b"b"[..]))?;
            store.get(b"k")?.expect("value").castime
        };
        let store = Store::open_or_create(&path, StoreOptions::default())?;
        store.append(b"k", BufferedSource::from(&b"c"[..]))?;
        let second = store.get(b"k")?.expect("value");
        assert_eq!(second.value, b"bc");
        assert!(second.castime.cas > first.cas);
        Ok(())
    }

    #[test]
    fn declined_operations_do_not_cause_cas_reuse_after_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cas-declined.db");
        let first = {
            let store = Store::create(&path, StoreOptions::default())?;
            assert_eq!(store.delete(b"missing")?, DeleteResult::NotFound);
            assert_eq!(
                store.append(b"missing", BufferedSource::from(&b"x"[..]))?,
                AppendPrependResult::NotFound
            );
            store.set(b"k", BufferedSource::from(&b"a"[..]))?;
            store.get(b"k")?.expect("value").castime
        };
        let store = Store::open(&path, StoreOptions::default())?;
        store.set(b"j", BufferedSource::from(&b"b"[..]))?;
        let second = store.get(b"j")?.expect("value").castime;
        assert!(second.cas > first.cas, "cas went from {} to {}", first.cas, second.cas);
        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected_before_touching_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.db");
        let options = StoreOptions {
            page_size: 3000,
            ..StoreOptions::default()
        };
        assert!(matches!(Store::create(&path, options), Err(KvError::Config(_))));
        assert!(!path.exists());
    }

    #[test]
    fn stats_render_every_layer() -> Result<()> {
        let dir = tempdir().unwrap();
        let store = Store::create(dir.path().join("stats.db"), StoreOptions::default())?;
        store.set(b"k", BufferedSource::from(&b"v"[..]))?;
        let stats = store.stats();
        assert_eq!(stats.btree.modify_commits, 1);
        assert!(stats.pager.commits >= 1);
        let rendered = stats.to_string();
        assert!(rendered.contains("btree: commits=1"));
        assert!(rendered.contains("latches:"));
        Ok(())
    }
}
