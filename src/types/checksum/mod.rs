#![forbid(unsafe_code)]
//! CRC helpers for page payloads.

use super::page::header;

/// Incremental checksum over a byte stream.
pub trait Checksum {
    /// Clears accumulated state.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed so far.
    fn finalize(&self) -> u32;
}

/// `crc32fast` backed [`Checksum`].
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC of a page payload bound to its page number and the database salt.
pub fn page_crc32(page_no: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// CRC of a whole page image. The header is covered with its CRC field
/// read as zero.
pub fn page_image_crc32(page_no: u64, salt: u64, image: &[u8]) -> u32 {
    let crc_field = header::CRC32;
    let mut hasher = Crc32Fast::default();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(image.get(..crc_field.start).unwrap_or(image));
    if image.len() > crc_field.start {
        hasher.update(&[0u8; 4]);
        hasher.update(image.get(crc_field.end..).unwrap_or(&[]));
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_trait_resets() {
        let mut c = Crc32Fast::default();
        c.update(b"hello");
        let first = c.finalize();
        c.update(b" world");
        let second = c.finalize();
        assert_ne!(first, second);
        c.reset();
        c.update(b"hello world");
        assert_eq!(c.finalize(), second);
    }

    #[test]
    fn page_crc32_binds_page_number_and_salt() {
        let payload = vec![0u8; 16];
        let crc = page_crc32(1, 2, &payload);
        assert_eq!(crc, page_crc32(1, 2, &payload));
        assert_ne!(crc, page_crc32(3, 2, &payload));
        assert_ne!(crc, page_crc32(1, 3, &payload));
    }

    #[test]
    fn image_crc_covers_header_except_its_own_field() {
        let mut image = vec![0u8; 64];
        let before = page_image_crc32(5, 9, &image);
        image[header::CRC32.start] = 0xFF;
        assert_eq!(before, page_image_crc32(5, 9, &image));
        image[header::PAGE_KIND] = 2;
        assert_ne!(before, page_image_crc32(5, 9, &image));
        image[header::PAGE_KIND] = 0;
        image[header::PAGE_SIZE.start] = 1;
        assert_ne!(before, page_image_crc32(5, 9, &image));
        image[header::PAGE_SIZE.start] = 0;
        image[40] = 1;
        assert_ne!(before, page_image_crc32(5, 9, &image));
    }
}
