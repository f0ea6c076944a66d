use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct BTreeStatsSnapshot {
    /// Number of leaf page searches performed
    pub leaf_searches: u64,
    /// Number of internal page searches performed
    pub internal_searches: u64,
    /// Number of leaf page splits performed
    pub leaf_splits: u64,
    /// Number of internal page splits performed
    pub internal_splits: u64,
    /// Number of times the tree grew a new root
    pub root_splits: u64,
    /// Modify operations whose mutation was committed
    pub modify_commits: u64,
    /// Modify operations that declined to mutate
    pub modify_noops: u64,
    /// Modify operations that let go of the meta latch before mutating
    pub early_meta_releases: u64,
    /// Operations rejected for a regressing order token
    pub order_violations: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default)]
pub struct BTreeStats {
    leaf_searches: AtomicU64,
    internal_searches: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
    modify_commits: AtomicU64,
    modify_noops: AtomicU64,
    early_meta_releases: AtomicU64,
    order_violations: AtomicU64,
}

impl BTreeStats {
    /// Returns the current count of leaf page searches.
    pub fn leaf_searches(&self) -> u64 {
        self.leaf_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page searches.
    pub fn internal_searches(&self) -> u64 {
        self.internal_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page splits.
    pub fn internal_splits(&self) -> u64 {
        self.internal_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns how many times a new root was installed.
    pub fn root_splits(&self) -> u64 {
        self.root_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of committed modify operations.
    pub fn modify_commits(&self) -> u64 {
        self.modify_commits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of modify operations that left the tree untouched.
    pub fn modify_noops(&self) -> u64 {
        self.modify_noops.load(AtomicOrdering::Relaxed)
    }

    /// Returns how often the meta latch was dropped ahead of the mutation.
    pub fn early_meta_releases(&self) -> u64 {
        self.early_meta_releases.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of order token rejections.
    pub fn order_violations(&self) -> u64 {
        self.order_violations.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_leaf_searches(&self) {
        self.leaf_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_searches(&self) {
        self.internal_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_modify_commits(&self) {
        self.modify_commits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_modify_noops(&self) {
        self.modify_noops.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_early_meta_releases(&self) {
        self.early_meta_releases
            .fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_order_violations(&self) {
        self.order_violations.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_searches: self.leaf_searches(),
            internal_searches: self.internal_searches(),
            leaf_splits: self.leaf_splits(),
            internal_splits: self.internal_splits(),
            root_splits: self.root_splits(),
            modify_commits: self.modify_commits(),
            modify_noops: self.modify_noops(),
            early_meta_releases: self.early_meta_releases(),
            order_violations: self.order_violations(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "blobkv::btree::stats",
            leaf_searches = snapshot.leaf_searches,
            internal_searches = snapshot.internal_searches,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            root_splits = snapshot.root_splits,
            modify_commits = snapshot.modify_commits,
            modify_noops = snapshot.modify_noops,
            early_meta_releases = snapshot.early_meta_releases,
            order_violations = snapshot.order_violations,
            "btree stats snapshot"
        );
    }
}
