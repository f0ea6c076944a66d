use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::{PagerOptions, Synchronous};
use crate::storage::blob::BlobLayout;
use crate::storage::btree::SliceOptions;
use crate::types::page::DEFAULT_PAGE_SIZE;
use crate::types::{KvError, Result};

/// Durability setting as written in configuration files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSetting {
    /// fsync after every commit.
    #[default]
    Full,
    /// Leave flushing to the operating system.
    Off,
}

impl From<SyncSetting> for Synchronous {
    fn from(value: SyncSetting) -> Self {
        match value {
            SyncSetting::Full => Synchronous::Full,
            SyncSetting::Off => Synchronous::Off,
        }
    }
}

/// Tunables for opening a [`Store`](super::Store).
///
/// Every field has a default, so a TOML file only needs to name the values
/// it changes:
///
/// ```toml
/// page_size = 8192
/// synchronous = "off"
/// max_value_size = 4194304
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Page size for newly created files; existing files keep their own.
    pub page_size: u32,
    /// Pages held by the read cache.
    pub cache_pages: usize,
    /// Commit durability.
    pub synchronous: SyncSetting,
    /// Verify page checksums when reading from disk.
    pub checksum_verify_on_read: bool,
    /// Longest accepted key.
    pub max_key_size: usize,
    /// Longest accepted value.
    pub max_value_size: usize,
    /// Values of this many bytes or more are stored out of line.
    pub max_in_node_value_size: usize,
    /// Latch wait budget in milliseconds.
    pub latch_timeout_ms: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let slice = SliceOptions::default();
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: 256,
            synchronous: SyncSetting::Full,
            checksum_verify_on_read: true,
            max_key_size: slice.max_key_size,
            max_value_size: slice.max_value_size,
            max_in_node_value_size: slice.max_in_node_value_size,
            latch_timeout_ms: 5_000,
        }
    }
}

impl StoreOptions {
    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(text).map_err(|err| KvError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            KvError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks that the options describe a usable store.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || !(512..=65_536).contains(&self.page_size) {
            return Err(KvError::Config(format!(
                "page_size {} must be a power of two between 512 and 65536",
                self.page_size
            )));
        }
        if self.cache_pages == 0 {
            return Err(KvError::Config("cache_pages must be at least 1".into()));
        }
        if self.max_key_size == 0 || self.max_key_size > u8::MAX as usize {
            return Err(KvError::Config(format!(
                "max_key_size {} must be between 1 and 255",
                self.max_key_size
            )));
        }
        if self.max_in_node_value_size == 0 || self.max_in_node_value_size > u16::MAX as usize {
            return Err(KvError::Config(format!(
                "max_in_node_value_size {} must be between 1 and 65535",
                self.max_in_node_value_size
            )));
        }
        if self.max_in_node_value_size > self.max_value_size {
            return Err(KvError::Config(
                "max_in_node_value_size exceeds max_value_size".into(),
            ));
        }
        let layout = BlobLayout::new(self.page_size as usize, self.max_in_node_value_size)?;
        if self.max_value_size > layout.max_blob_size() {
            return Err(KvError::Config(format!(
                "max_value_size {} exceeds the {} bytes a blob can hold at page_size {}",
                self.max_value_size,
                layout.max_blob_size(),
                self.page_size
            )));
        }
        Ok(())
    }

    /// Pager settings derived from these options.
    pub fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            page_size: self.page_size,
            cache_pages: self.cache_pages,
            synchronous: self.synchronous.into(),
            checksum_verify_on_read: self.checksum_verify_on_read,
        }
    }

    /// Tree settings derived from these options.
    pub fn slice_options(&self) -> SliceOptions {
        SliceOptions {
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
            max_in_node_value_size: self.max_in_node_value_size,
            latch_timeout: Duration::from_millis(self.latch_timeout_ms),
        }
    }
}
