//! Shared on-disk page header used by every page kind.

use core::convert::{TryFrom, TryInto};

use super::{KvError, PageId, Result};

/// Magic bytes at the start of every page.
pub const PAGE_MAGIC: [u8; 4] = *b"BLKV";
/// Current page format version.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Default page (block) size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
/// Length of the fixed page header.
pub const PAGE_HDR_LEN: usize = 32;

pub mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    /// Magic bytes.
    pub const MAGIC: Range<usize> = 0..4;
    /// Format version.
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    /// Page kind tag.
    pub const PAGE_KIND: usize = 6;
    /// Must be zero.
    pub const RESERVED: usize = 7;
    /// Page size in bytes.
    pub const PAGE_SIZE: Range<usize> = 8..12;
    /// Page number.
    pub const PAGE_NO: Range<usize> = 12..20;
    /// Database salt.
    pub const SALT: Range<usize> = 20..28;
    /// CRC32 of the page payload.
    pub const CRC32: Range<usize> = 28..32;
}

/// Kind tag stored in every page header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Database metadata (page 0).
    Meta = 1,
    /// Unused page threaded on the free list.
    FreeList = 2,
    /// B+ tree leaf.
    BTreeLeaf = 3,
    /// B+ tree internal node.
    BTreeInternal = 4,
    /// Data block of a large value.
    Overflow = 5,
    /// Block list of a large value.
    BlobIndex = 6,
}

impl PageKind {
    /// Returns the on-disk tag.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = KvError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Meta),
            2 => Ok(PageKind::FreeList),
            3 => Ok(PageKind::BTreeLeaf),
            4 => Ok(PageKind::BTreeInternal),
            5 => Ok(PageKind::Overflow),
            6 => Ok(PageKind::BlobIndex),
            _ => Err(KvError::Corruption("unknown page kind")),
        }
    }
}

/// Decoded page header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Format version.
    pub format_version: u16,
    /// Page kind.
    pub kind: PageKind,
    /// Page size in bytes.
    pub page_size: u32,
    /// Page number.
    pub page_no: PageId,
    /// Database salt.
    pub salt: u64,
    /// Payload checksum.
    pub crc32: u32,
}

impl PageHeader {
    /// Builds a header with a zero checksum.
    pub fn new(page_no: PageId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(KvError::Invalid("page size smaller than header"));
        }
        Ok(Self {
            format_version: PAGE_FORMAT_VERSION,
            kind,
            page_size,
            page_no,
            salt,
            crc32: 0,
        })
    }

    /// Sets the checksum field.
    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = crc32;
        self
    }

    /// Encodes the header into the first `PAGE_HDR_LEN` bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HDR_LEN {
            return Err(KvError::Invalid("page header buffer too small"));
        }
        let hdr = &mut dst[..PAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_KIND] = self.kind.as_u8();
        hdr[header::RESERVED] = 0;
        hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
        hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
        hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
        Ok(())
    }

    /// Decodes and validates a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HDR_LEN {
            return Err(KvError::Corruption("page header truncated"));
        }
        let hdr = &src[..PAGE_HDR_LEN];
        if hdr[header::MAGIC] != PAGE_MAGIC {
            return Err(KvError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes(read_array(&hdr[header::FORMAT_VERSION])?);
        if format_version != PAGE_FORMAT_VERSION {
            return Err(KvError::Corruption("unsupported page format version"));
        }
        if hdr[header::RESERVED] != 0 {
            return Err(KvError::Corruption("page header reserved byte not zero"));
        }
        let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
        let page_size = u32::from_be_bytes(read_array(&hdr[header::PAGE_SIZE])?);
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(KvError::Corruption("page size smaller than header"));
        }
        let page_no = PageId(u64::from_be_bytes(read_array(&hdr[header::PAGE_NO])?));
        let salt = u64::from_be_bytes(read_array(&hdr[header::SALT])?);
        let crc32 = u32::from_be_bytes(read_array(&hdr[header::CRC32])?);
        Ok(Self {
            format_version,
            kind,
            page_size,
            page_no,
            salt,
            crc32,
        })
    }
}

/// Overwrites the checksum field of an encoded header.
pub fn set_crc32(buf: &mut [u8], crc32: u32) -> Result<()> {
    if buf.len() < header::CRC32.end {
        return Err(KvError::Invalid("page header buffer too small"));
    }
    buf[header::CRC32].copy_from_slice(&crc32.to_be_bytes());
    Ok(())
}

/// Checks that `buf` carries a header of the expected kind and page number.
pub fn expect_kind(buf: &[u8], id: PageId, kind: PageKind) -> Result<PageHeader> {
    let header = PageHeader::decode(buf)?;
    if header.kind != kind {
        return Err(KvError::Corruption("page kind mismatch"));
    }
    if header.page_no != id {
        return Err(KvError::Corruption("page number mismatch"));
    }
    Ok(header)
}

fn read_array<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
    src.try_into()
        .map_err(|_| KvError::Corruption("page header field truncated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; PAGE_HDR_LEN];
        let header = PageHeader::new(PageId(42), PageKind::BlobIndex, DEFAULT_PAGE_SIZE, 777)
            .unwrap()
            .with_crc32(0xDEADBEEF);
        header.encode(&mut buf).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn set_crc32_overwrites_field() {
        let mut buf = [0u8; PAGE_HDR_LEN];
        PageHeader::new(PageId(1), PageKind::Overflow, DEFAULT_PAGE_SIZE, 1)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        set_crc32(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(PageHeader::decode(&buf).unwrap().crc32, 0x0102_0304);
    }

    #[test]
    fn expect_kind_rejects_other_kinds() {
        let mut buf = [0u8; PAGE_HDR_LEN];
        PageHeader::new(PageId(9), PageKind::BTreeLeaf, DEFAULT_PAGE_SIZE, 1)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        assert!(expect_kind(&buf, PageId(9), PageKind::BTreeLeaf).is_ok());
        assert!(expect_kind(&buf, PageId(9), PageKind::Overflow).is_err());
        assert!(expect_kind(&buf, PageId(8), PageKind::BTreeLeaf).is_err());
    }

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(7).is_err());
    }
}
