use serde::{Deserialize, Serialize};

use crate::storage::format::group::DEFAULT_DENSE_NODE_THRESHOLD;
use crate::types::{PenumbraError, Result};

/// Which optional value kinds the on-disk format can represent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatCapabilities {
    /// Spatial points and point arrays.
    pub points: bool,
    /// Temporal values and temporal arrays.
    pub temporal: bool,
}

impl Default for FormatCapabilities {
    fn default() -> Self {
        Self {
            points: true,
            temporal: true,
        }
    }
}

/// Configuration options supplied when opening a [`super::stores::StoreAggregate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Page size of the shared page cache in bytes.
    pub page_size: usize,
    /// Payload bytes per block of the string store.
    pub string_block_size: usize,
    /// Payload bytes per block of the array store.
    pub array_block_size: usize,
    /// Payload bytes per block of the dynamic label store.
    pub label_block_size: usize,
    /// Payload bytes per block of the token name stores.
    pub token_name_block_size: usize,
    /// Payload bytes per block of the schema store.
    pub schema_block_size: usize,
    /// Relationships after which a node becomes dense.
    pub dense_node_threshold: i32,
    /// Whether id generator rebuilds only restore the high id.
    pub rebuild_idgen_fast: bool,
    /// Value kinds the format supports.
    pub format: FormatCapabilities,
    /// Whether chain reads keep a visited set and fail on cycles.
    pub guard_chains_for_cycles: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            string_block_size: 120,
            array_block_size: 120,
            label_block_size: 60,
            token_name_block_size: 30,
            schema_block_size: 56,
            dense_node_threshold: DEFAULT_DENSE_NODE_THRESHOLD,
            rebuild_idgen_fast: true,
            format: FormatCapabilities::default(),
            guard_chains_for_cycles: true,
        }
    }
}

impl StoreOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from TOML; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: StoreOptions = toml::from_str(text).map_err(|err| {
            PenumbraError::UnderlyingStorage(format!("invalid store options: {err}"))
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Rejects sizes the record formats cannot work with.
    pub fn validate(&self) -> Result<()> {
        let blocks = [
            self.string_block_size,
            self.array_block_size,
            self.label_block_size,
            self.token_name_block_size,
            self.schema_block_size,
        ];
        if blocks.iter().any(|&b| b == 0 || b > 0xFF_FFFF) {
            return Err(PenumbraError::Invalid("dynamic block sizes must be between 1 and 2^24-1"));
        }
        if blocks.iter().any(|&b| b + 8 > self.page_size) {
            return Err(PenumbraError::Invalid("dynamic blocks must fit in a page"));
        }
        if self.page_size < 64 {
            return Err(PenumbraError::Invalid("page size must be at least 64 bytes"));
        }
        Ok(())
    }

    /// Sets the page cache page size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the string store block payload size.
    pub fn string_block_size(mut self, bytes: usize) -> Self {
        self.string_block_size = bytes;
        self
    }

    /// Sets the array store block payload size.
    pub fn array_block_size(mut self, bytes: usize) -> Self {
        self.array_block_size = bytes;
        self
    }

    /// Sets the label store block payload size.
    pub fn label_block_size(mut self, bytes: usize) -> Self {
        self.label_block_size = bytes;
        self
    }

    /// Sets the dense node threshold written into new group stores.
    pub fn dense_node_threshold(mut self, threshold: i32) -> Self {
        self.dense_node_threshold = threshold;
        self
    }

    /// Chooses between fast (high id only) and full id generator rebuilds.
    pub fn rebuild_idgen_fast(mut self, fast: bool) -> Self {
        self.rebuild_idgen_fast = fast;
        self
    }

    /// Sets which optional value kinds are supported.
    pub fn format(mut self, format: FormatCapabilities) -> Self {
        self.format = format;
        self
    }

    /// Enables or disables the cycle guard on chain reads.
    pub fn guard_chains_for_cycles(mut self, enabled: bool) -> Self {
        self.guard_chains_for_cycles = enabled;
        self
    }
}
