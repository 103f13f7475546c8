//! Creation parameters for a chunk store.

use lks_error::{LksError, Result};
use lks_types::{LINK_OVERHEAD_U32, MIN_BLOCK_SIZE};
use serde::{Deserialize, Serialize};

/// Logical block size giving 4 KiB physical blocks.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096 - LINK_OVERHEAD_U32;

/// Parameters used when creating a store and when recovering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkStoreConfig {
    /// Logical payload bytes per block (excluding link metadata).
    pub block_size: u32,
    /// Byte offset of the chunk store header inside the stream.
    pub seek_start: u64,
    /// Fail recovery on chunks missing from the manifest instead of
    /// releasing them.
    pub strict_recovery: bool,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            seek_start: 0,
            strict_recovery: false,
        }
    }
}

impl ChunkStoreConfig {
    #[must_use]
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Check the block size against the minimum and against the 32-bit
    /// on-disk field once link metadata is added.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(LksError::Config(format!(
                "block_size={} is below the minimum of {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        let physical = u64::from(self.block_size) + u64::from(LINK_OVERHEAD_U32);
        if physical > u64::from(i32::MAX.unsigned_abs()) {
            return Err(LksError::Config(format!(
                "block_size={} does not fit the on-disk block size field",
                self.block_size
            )));
        }
        Ok(())
    }

    /// Physical block size: logical size plus link metadata.
    #[must_use]
    pub fn physical_block_size(&self) -> u32 {
        self.block_size.saturating_add(LINK_OVERHEAD_U32)
    }
}
