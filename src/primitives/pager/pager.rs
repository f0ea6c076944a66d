use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::meta::{create_meta, load_meta, write_meta_page, Meta};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{
    checksum::page_image_crc32,
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    KvError, Lsn, PageId, Result,
};

/// Configuration options for the pager.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Number of committed page images kept in memory.
    pub cache_pages: usize,
    /// Durability of commits.
    pub synchronous: Synchronous,
    /// Verify page checksums when reading from disk.
    pub checksum_verify_on_read: bool,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            cache_pages: 256,
            synchronous: Synchronous::Full,
            checksum_verify_on_read: true,
        }
    }
}

/// Durability mode for commits.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Synchronous {
    /// fsync after every commit.
    #[default]
    Full,
    /// Leave flushing to the operating system.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Off => "off",
        }
    }

    /// Parses a mode from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }
}

/// Whether a page lease may modify the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    /// Read-only view; modifications are discarded when the lease returns.
    Read,
    /// Modifications become part of the transaction.
    Write,
}

/// Statistics tracking pager operations.
#[derive(Default, Clone, Debug)]
pub struct PagerStats {
    /// Committed page reads served from the cache.
    pub hits: u64,
    /// Committed page reads that went to disk.
    pub misses: u64,
    /// Successful commits.
    pub commits: u64,
    /// Transactions dropped without committing.
    pub aborts: u64,
    /// Pages handed out by the allocator.
    pub pages_allocated: u64,
    /// Pages returned to the free list by commits.
    pub pages_freed: u64,
    /// Transactions that touched more pages than they reserved.
    pub reservation_overruns: u64,
}

impl fmt::Display for PagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} commits={} aborts={} allocated={} freed={} overruns={}",
            self.hits,
            self.misses,
            self.commits,
            self.aborts,
            self.pages_allocated,
            self.pages_freed,
            self.reservation_overruns
        )
    }
}

/// Read access to committed or in-transaction page images.
pub trait PageRead {
    /// Returns the current image of `id`.
    fn read_page(&self, id: PageId) -> Result<PageRef>;
}

/// Page-oriented storage with transactional writes.
pub trait PageStore: PageRead + Send + Sync + 'static {
    /// Returns the page size in bytes.
    fn page_size(&self) -> u32;
    /// Begins a write transaction.
    fn begin_write(&self) -> Result<WriteGuard<'_>>;
    /// Commits a write transaction, returning its LSN.
    fn commit(&self, guard: WriteGuard<'_>) -> Result<Lsn>;
    /// Returns the current metadata.
    fn meta(&self) -> Result<Meta>;
    /// Returns a snapshot of pager statistics.
    fn stats(&self) -> PagerStats;
}

/// An immutable page image.
#[derive(Clone)]
pub struct PageRef {
    /// Page identifier.
    pub id: PageId,
    data: Arc<[u8]>,
}

impl PageRef {
    /// Returns the page bytes, header included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A mutable page inside a write transaction.
pub struct PageMut<'g> {
    /// Page identifier.
    pub id: PageId,
    data: &'g mut [u8],
}

impl<'g> PageMut<'g> {
    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Returns the page bytes mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

/// A page buffer checked out of a transaction.
///
/// Leases let callers hold several page buffers mutably at once. They must be
/// handed back with [`WriteGuard::return_lease`].
pub struct PageLease {
    id: PageId,
    buf: Box<[u8]>,
    mode: AccessMode,
    was_dirty: bool,
}

impl PageLease {
    /// Page the buffer belongs to.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Access mode the lease was taken with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Page bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Page bytes, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Guard for a write transaction.
///
/// Pages are copied on first write and only reach the file on commit.
/// Dropping the guard without committing discards every change and returns
/// pages it allocated to the free list.
pub struct WriteGuard<'a> {
    pager: &'a Pager,
    dirty: HashMap<PageId, Box<[u8]>>,
    leased: HashSet<PageId>,
    written: HashSet<PageId>,
    allocated: Vec<PageId>,
    freed: Vec<PageId>,
    root: Option<PageId>,
    cas: u64,
    reserved: usize,
    overrun_reported: bool,
    committed: bool,
}

impl<'a> WriteGuard<'a> {
    /// Page size of the underlying store.
    pub fn page_size(&self) -> usize {
        self.pager.page_size
    }

    /// Database salt, needed to initialise page headers.
    pub fn salt(&self) -> u64 {
        self.pager.salt
    }

    /// Adds `pages` to the number of pages this transaction expects to change.
    pub fn reserve(&mut self, pages: usize) {
        self.reserved = self.reserved.saturating_add(pages);
    }

    /// Pages reserved so far.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Distinct pages changed so far.
    pub fn changed_pages(&self) -> usize {
        self.written.len()
    }

    /// Root of the tree as seen by this transaction.
    pub fn tree_root(&self) -> PageId {
        self.root.unwrap_or_else(|| self.pager.inner.lock().meta.tree_root)
    }

    /// Records a new tree root, applied to the meta page on commit.
    pub fn set_root(&mut self, root: PageId) {
        self.root = Some(root);
    }

    /// Records a CAS value stamped by this transaction. The largest one is
    /// folded into the meta page's high-water mark on commit.
    pub fn note_cas(&mut self, cas: u64) {
        self.cas = self.cas.max(cas);
    }

    /// Returns a mutable view of `id`, copying it into the transaction if needed.
    pub fn page_mut(&mut self, id: PageId) -> Result<PageMut<'_>> {
        if self.leased.contains(&id) {
            return Err(KvError::Invalid("page is leased"));
        }
        if !self.dirty.contains_key(&id) {
            let image = self.pager.read_committed(id)?;
            self.dirty.insert(id, Box::from(image.data()));
        }
        self.note_written(id);
        let data = self
            .dirty
            .get_mut(&id)
            .ok_or(KvError::Invalid("dirty page vanished"))?;
        Ok(PageMut {
            id,
            data: &mut data[..],
        })
    }

    /// Allocates a zeroed page carrying a header of `kind`.
    pub fn allocate_page(&mut self, kind: PageKind) -> Result<PageId> {
        let id = self.pager.allocate_id()?;
        let mut buf = vec![0u8; self.pager.page_size].into_boxed_slice();
        PageHeader::new(id, kind, self.pager.page_size as u32, self.pager.salt)?
            .encode(&mut buf[..PAGE_HDR_LEN])?;
        self.dirty.insert(id, buf);
        self.allocated.push(id);
        self.note_written(id);
        trace!(page = id.0, ?kind, "pager.allocate");
        Ok(id)
    }

    /// Releases `id`; it joins the free list when the transaction commits.
    pub fn free_page(&mut self, id: PageId) -> Result<()> {
        if id.0 == 0 {
            return Err(KvError::Invalid("cannot free the meta page"));
        }
        if self.leased.contains(&id) {
            return Err(KvError::Invalid("cannot free a leased page"));
        }
        self.dirty.remove(&id);
        self.written.remove(&id);
        self.freed.push(id);
        Ok(())
    }

    /// Checks `id` out of the transaction.
    pub fn lease_page(&mut self, id: PageId, mode: AccessMode) -> Result<PageLease> {
        if !self.leased.insert(id) {
            return Err(KvError::Invalid("page already leased"));
        }
        let (buf, was_dirty) = match self.dirty.remove(&id) {
            Some(buf) => (buf, true),
            None => match self.pager.read_committed(id) {
                Ok(image) => (Box::from(image.data()), false),
                Err(err) => {
                    self.leased.remove(&id);
                    return Err(err);
                }
            },
        };
        if mode == AccessMode::Write {
            self.note_written(id);
        }
        Ok(PageLease {
            id,
            buf,
            mode,
            was_dirty,
        })
    }

    /// Hands a lease back; write leases become part of the transaction.
    pub fn return_lease(&mut self, lease: PageLease) {
        self.leased.remove(&lease.id);
        if lease.mode == AccessMode::Write || lease.was_dirty {
            self.dirty.insert(lease.id, lease.buf);
        }
    }

    fn note_written(&mut self, id: PageId) {
        if self.written.insert(id) && self.written.len() > self.reserved && !self.overrun_reported
        {
            self.overrun_reported = true;
            self.pager.stats.lock().reservation_overruns += 1;
            warn!(
                reserved = self.reserved,
                changed = self.written.len(),
                "pager.reservation_overrun"
            );
        }
    }
}

impl PageRead for WriteGuard<'_> {
    fn read_page(&self, id: PageId) -> Result<PageRef> {
        if self.leased.contains(&id) {
            return Err(KvError::Invalid("page is leased"));
        }
        match self.dirty.get(&id) {
            Some(buf) => Ok(PageRef {
                id,
                data: Arc::from(&buf[..]),
            }),
            None => self.pager.read_committed(id),
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let allocated = std::mem::take(&mut self.allocated);
        if let Err(err) = self.pager.rollback(&allocated) {
            warn!(error = %err, pages = allocated.len(), "pager.rollback_failed");
        }
    }
}

struct PagerInner {
    meta: Meta,
    next_lsn: Lsn,
    poisoned: bool,
}

/// File-backed page store.
///
/// Multiple write transactions may be open at once. The pager serialises
/// allocation and commit; keeping transactions off each other's pages is the
/// job of the latching layer above it.
pub struct Pager {
    io: Arc<dyn FileIo>,
    options: PagerOptions,
    page_size: usize,
    salt: u64,
    inner: Mutex<PagerInner>,
    cache: Mutex<LruCache<PageId, Arc<[u8]>>>,
    stats: Mutex<PagerStats>,
}

impl Pager {
    /// Creates a new database file at `path`.
    pub fn create(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        if !io.is_empty()? {
            return Err(KvError::Invalid("database file already exists"));
        }
        let meta = create_meta(io.as_ref(), options.page_size)?;
        debug!(page_size = meta.page_size, "pager.create");
        Self::from_parts(io, options, meta)
    }

    /// Opens an existing database file at `path`.
    pub fn open(path: impl AsRef<Path>, mut options: PagerOptions) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        if io.is_empty()? {
            return Err(KvError::Invalid("database file is empty"));
        }
        let meta = load_meta(io.as_ref())?;
        if meta.page_size != options.page_size {
            debug!(
                requested = options.page_size,
                stored = meta.page_size,
                "pager.open.page_size_from_meta"
            );
            options.page_size = meta.page_size;
        }
        Self::from_parts(io, options, meta)
    }

    fn from_parts(io: Arc<dyn FileIo>, options: PagerOptions, meta: Meta) -> Result<Self> {
        let capacity = NonZeroUsize::new(options.cache_pages)
            .ok_or(KvError::Invalid("cache_pages must be non-zero"))?;
        let next_lsn = Lsn(meta.last_commit_lsn.0 + 1);
        Ok(Self {
            io,
            page_size: meta.page_size as usize,
            salt: meta.salt,
            options,
            inner: Mutex::new(PagerInner {
                meta,
                next_lsn,
                poisoned: false,
            }),
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(PagerStats::default()),
        })
    }

    /// Options the pager was opened with.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    fn page_offset(&self, id: PageId) -> u64 {
        id.0 * self.page_size as u64
    }

    fn read_committed(&self, id: PageId) -> Result<PageRef> {
        // A miss is filled under the cache lock so that a concurrent commit of
        // `id` cannot be overwritten by the older image read here.
        let mut cache = self.cache.lock();
        if let Some(data) = cache.get(&id).cloned() {
            drop(cache);
            self.stats.lock().hits += 1;
            return Ok(PageRef { id, data });
        }
        let mut buf = vec![0u8; self.page_size];
        self.io.read_at(self.page_offset(id), &mut buf)?;
        if self.options.checksum_verify_on_read {
            let header = PageHeader::decode(&buf)?;
            if header.page_no != id {
                return Err(KvError::Corruption("page number mismatch"));
            }
            if header.crc32 != page_image_crc32(id.0, self.salt, &buf) {
                return Err(KvError::Corruption("page checksum mismatch"));
            }
        }
        let data: Arc<[u8]> = Arc::from(buf);
        cache.put(id, Arc::clone(&data));
        drop(cache);
        self.stats.lock().misses += 1;
        Ok(PageRef { id, data })
    }

    fn allocate_id(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = if inner.meta.free_head.0 != 0 {
            let id = inner.meta.free_head;
            let image = self.read_committed(id)?;
            page::expect_kind(image.data(), id, PageKind::FreeList)?;
            inner.meta.free_head = PageId(read_free_next(image.data())?);
            id
        } else {
            let id = inner.meta.next_page;
            inner.meta.next_page = PageId(id.0 + 1);
            id
        };
        drop(inner);
        self.stats.lock().pages_allocated += 1;
        Ok(id)
    }

    /// Threads `id` onto the free list; the caller holds the inner lock.
    fn push_free(&self, inner: &mut PagerInner, id: PageId) -> Result<()> {
        let mut buf = vec![0u8; self.page_size];
        PageHeader::new(id, PageKind::FreeList, self.page_size as u32, self.salt)?
            .encode(&mut buf[..PAGE_HDR_LEN])?;
        buf[PAGE_HDR_LEN..PAGE_HDR_LEN + 8].copy_from_slice(&inner.meta.free_head.0.to_be_bytes());
        self.write_image(id, buf)?;
        inner.meta.free_head = id;
        Ok(())
    }

    fn write_image(&self, id: PageId, mut buf: Vec<u8>) -> Result<()> {
        let crc = page_image_crc32(id.0, self.salt, &buf);
        page::set_crc32(&mut buf, crc)?;
        let mut cache = self.cache.lock();
        self.io.write_at(self.page_offset(id), &buf)?;
        cache.put(id, Arc::from(buf));
        Ok(())
    }

    fn write_meta(&self, meta: &Meta) -> Result<()> {
        let mut buf = vec![0u8; self.page_size];
        write_meta_page(&mut buf, meta)?;
        self.io.write_at(0, &buf)
    }

    fn rollback(&self, allocated: &[PageId]) -> Result<()> {
        self.stats.lock().aborts += 1;
        if allocated.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        for id in allocated {
            self.push_free(&mut inner, *id)?;
        }
        self.write_meta(&inner.meta)?;
        trace!(pages = allocated.len(), "pager.rollback");
        Ok(())
    }

    fn commit_inner(&self, guard: &mut WriteGuard<'_>) -> Result<Lsn> {
        if !guard.leased.is_empty() {
            return Err(KvError::Invalid("commit with outstanding page leases"));
        }
        let mut inner = self.inner.lock();
        if inner.poisoned {
            return Err(KvError::Corruption("pager poisoned by a failed commit"));
        }
        let result = self.apply_commit(&mut inner, guard);
        if result.is_err() {
            inner.poisoned = true;
        }
        result
    }

    fn apply_commit(&self, inner: &mut PagerInner, guard: &mut WriteGuard<'_>) -> Result<Lsn> {
        let mut dirty: Vec<(PageId, Box<[u8]>)> = guard.dirty.drain().collect();
        dirty.sort_by_key(|(id, _)| *id);
        let pages = dirty.len();
        for (id, buf) in dirty {
            self.write_image(id, buf.into_vec())?;
        }
        let freed = std::mem::take(&mut guard.freed);
        for id in &freed {
            self.push_free(inner, *id)?;
        }
        if let Some(root) = guard.root {
            inner.meta.tree_root = root;
        }
        inner.meta.cas_high_water = inner.meta.cas_high_water.max(guard.cas);
        let lsn = inner.next_lsn;
        inner.next_lsn = Lsn(lsn.0 + 1);
        inner.meta.last_commit_lsn = lsn;
        self.write_meta(&inner.meta)?;
        if self.options.synchronous == Synchronous::Full {
            self.io.sync_all()?;
        }
        guard.allocated.clear();
        guard.committed = true;
        {
            let mut stats = self.stats.lock();
            stats.commits += 1;
            stats.pages_freed += freed.len() as u64;
        }
        trace!(
            lsn = lsn.0,
            pages,
            freed = freed.len(),
            reserved = guard.reserved,
            "pager.commit"
        );
        Ok(lsn)
    }
}

fn read_free_next(data: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = data
        .get(PAGE_HDR_LEN..PAGE_HDR_LEN + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(KvError::Corruption("free page truncated"))?;
    Ok(u64::from_be_bytes(bytes))
}

impl PageRead for Pager {
    fn read_page(&self, id: PageId) -> Result<PageRef> {
        self.read_committed(id)
    }
}

impl PageStore for Pager {
    fn page_size(&self) -> u32 {
        self.page_size as u32
    }

    fn begin_write(&self) -> Result<WriteGuard<'_>> {
        if self.inner.lock().poisoned {
            return Err(KvError::Corruption("pager poisoned by a failed commit"));
        }
        Ok(WriteGuard {
            pager: self,
            dirty: HashMap::new(),
            leased: HashSet::new(),
            written: HashSet::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
            root: None,
            cas: 0,
            reserved: 0,
            overrun_reported: false,
            committed: false,
        })
    }

    fn commit(&self, mut guard: WriteGuard<'_>) -> Result<Lsn> {
        self.commit_inner(&mut guard)
    }

    fn meta(&self) -> Result<Meta> {
        Ok(self.inner.lock().meta.clone())
    }

    fn stats(&self) -> PagerStats {
        self.stats.lock().clone()
    }
}
