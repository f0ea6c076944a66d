use std::convert::TryInto;
use std::io::ErrorKind;
use std::ops::Range;

use rand::{rngs::OsRng, RngCore};

use crate::primitives::io::FileIo;
use crate::types::{
    checksum::page_image_crc32,
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    KvError, Lsn, PageId, Result,
};

const META_SALT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const META_PAGE_SIZE: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
const META_FORMAT_VERSION: Range<usize> = PAGE_HDR_LEN + 12..PAGE_HDR_LEN + 14;
const META_RESERVED: Range<usize> = PAGE_HDR_LEN + 14..PAGE_HDR_LEN + 16;
const META_FREE_HEAD: Range<usize> = PAGE_HDR_LEN + 16..PAGE_HDR_LEN + 24;
const META_NEXT_PAGE: Range<usize> = PAGE_HDR_LEN + 24..PAGE_HDR_LEN + 32;
const META_TREE_ROOT: Range<usize> = PAGE_HDR_LEN + 32..PAGE_HDR_LEN + 40;
const META_LAST_COMMIT_LSN: Range<usize> = PAGE_HDR_LEN + 40..PAGE_HDR_LEN + 48;
const META_CAS_HIGH_WATER: Range<usize> = PAGE_HDR_LEN + 48..PAGE_HDR_LEN + 56;
const META_END: usize = PAGE_HDR_LEN + 56;

/// Database metadata stored in page 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Random salt mixed into page checksums.
    pub salt: u64,
    /// Database format version number.
    pub format_version: u16,
    /// Head of the free page chain, `PageId(0)` when empty.
    pub free_head: PageId,
    /// Next never-used page id.
    pub next_page: PageId,
    /// Root page of the key/value tree, `PageId(0)` before the tree exists.
    pub tree_root: PageId,
    /// LSN of the last successful commit.
    pub last_commit_lsn: Lsn,
    /// Largest CAS value stamped by a committed transaction.
    pub cas_high_water: u64,
}

/// Creates fresh metadata for an empty file and writes it to page 0.
pub fn create_meta(io: &dyn FileIo, page_size: u32) -> Result<Meta> {
    if (page_size as usize) < META_END {
        return Err(KvError::Invalid("page size smaller than meta layout"));
    }
    let meta = Meta {
        page_size,
        salt: OsRng.next_u64(),
        format_version: page::PAGE_FORMAT_VERSION,
        free_head: PageId(0),
        next_page: PageId(1),
        tree_root: PageId(0),
        last_commit_lsn: Lsn(0),
        cas_high_water: 0,
    };
    let mut buf = vec![0u8; page_size as usize];
    write_meta_page(&mut buf, &meta)?;
    io.write_at(0, &buf)?;
    io.sync_all()?;
    Ok(meta)
}

/// Loads and verifies page 0.
///
/// The page size is taken from the stored header, so callers do not need to
/// know it up front.
pub fn load_meta(io: &dyn FileIo) -> Result<Meta> {
    let mut hdr = [0u8; PAGE_HDR_LEN];
    read_or_truncated(io, 0, &mut hdr)?;
    let header = PageHeader::decode(&hdr)?;
    if header.kind != PageKind::Meta {
        return Err(KvError::Corruption("page 0 is not a meta page"));
    }
    let mut buf = vec![0u8; header.page_size as usize];
    read_or_truncated(io, 0, &mut buf)?;
    read_meta_page(&buf)
}

/// Encodes `meta` into a page image and stamps its checksum.
pub fn write_meta_page(buf: &mut [u8], meta: &Meta) -> Result<()> {
    let page_size = meta.page_size as usize;
    if buf.len() < page_size || page_size < META_END {
        return Err(KvError::Invalid("meta buffer too small"));
    }
    buf[..page_size].fill(0);
    let header = PageHeader::new(PageId(0), PageKind::Meta, meta.page_size, meta.salt)?;
    header.encode(&mut buf[..PAGE_HDR_LEN])?;
    buf[META_SALT].copy_from_slice(&meta.salt.to_be_bytes());
    buf[META_PAGE_SIZE].copy_from_slice(&meta.page_size.to_be_bytes());
    buf[META_FORMAT_VERSION].copy_from_slice(&meta.format_version.to_be_bytes());
    buf[META_RESERVED].fill(0);
    buf[META_FREE_HEAD].copy_from_slice(&meta.free_head.0.to_be_bytes());
    buf[META_NEXT_PAGE].copy_from_slice(&meta.next_page.0.to_be_bytes());
    buf[META_TREE_ROOT].copy_from_slice(&meta.tree_root.0.to_be_bytes());
    buf[META_LAST_COMMIT_LSN].copy_from_slice(&meta.last_commit_lsn.0.to_be_bytes());
    buf[META_CAS_HIGH_WATER].copy_from_slice(&meta.cas_high_water.to_be_bytes());
    let crc = page_image_crc32(0, meta.salt, &buf[..page_size]);
    page::set_crc32(buf, crc)
}

/// Decodes and verifies a meta page image.
pub fn read_meta_page(buf: &[u8]) -> Result<Meta> {
    let header = PageHeader::decode(buf)?;
    if header.kind != PageKind::Meta || header.page_no != PageId(0) {
        return Err(KvError::Corruption("meta header mismatch"));
    }
    let page_size = header.page_size as usize;
    if buf.len() < page_size || page_size < META_END {
        return Err(KvError::Corruption("meta page truncated"));
    }
    let crc = page_image_crc32(0, header.salt, &buf[..page_size]);
    if crc != header.crc32 {
        return Err(KvError::Corruption("meta checksum mismatch"));
    }
    let salt = read_u64(&buf[META_SALT])?;
    if salt != header.salt {
        return Err(KvError::Corruption("meta salt mismatch"));
    }
    let stored_size = u32::from_be_bytes(
        buf[META_PAGE_SIZE]
            .try_into()
            .map_err(|_| KvError::Corruption("meta page size truncated"))?,
    );
    if stored_size != header.page_size {
        return Err(KvError::Corruption("meta page size mismatch"));
    }
    let format_version = u16::from_be_bytes(
        buf[META_FORMAT_VERSION]
            .try_into()
            .map_err(|_| KvError::Corruption("meta format version truncated"))?,
    );
    Ok(Meta {
        page_size: stored_size,
        salt,
        format_version,
        free_head: PageId(read_u64(&buf[META_FREE_HEAD])?),
        next_page: PageId(read_u64(&buf[META_NEXT_PAGE])?),
        tree_root: PageId(read_u64(&buf[META_TREE_ROOT])?),
        last_commit_lsn: Lsn(read_u64(&buf[META_LAST_COMMIT_LSN])?),
        cas_high_water: read_u64(&buf[META_CAS_HIGH_WATER])?,
    })
}

fn read_u64(src: &[u8]) -> Result<u64> {
    Ok(u64::from_be_bytes(src.try_into().map_err(|_| {
        KvError::Corruption("meta field truncated")
    })?))
}

fn read_or_truncated(io: &dyn FileIo, off: u64, dst: &mut [u8]) -> Result<()> {
    match io.read_at(off, dst) {
        Ok(()) => Ok(()),
        Err(KvError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            Err(KvError::Corruption("meta page truncated"))
        }
        Err(err) => Err(err),
    }
}
