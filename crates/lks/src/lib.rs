#![forbid(unsafe_code)]
//! linkstore public API facade.
//!
//! Re-exports the chunk store, the block layer it sits on, and the shared
//! types and errors through one stable interface. This is the crate that
//! downstream consumers (the CLI, embedding applications) depend on.

pub use lks_block::{ByteStream, FileByteStream, FixedBlockStore, MemByteStream};
pub use lks_chunk::{
    ChunkManifest, ChunkStoreConfig, DEFAULT_BLOCK_SIZE, LinkedChunkStore, StructureReport,
};
pub use lks_error::{LksError, Result};
pub use lks_types::{BlockKind, BlockNumber, ChunkHandle, LINK_OVERHEAD_U32, MIN_BLOCK_SIZE};

/// On-disk encodings, for tools that inspect raw regions.
pub mod ondisk {
    pub use lks_ondisk::*;
}

use std::path::Path;

/// A chunk store backed by a regular file.
pub type ChunkFile = LinkedChunkStore<FileByteStream>;

/// Create (or truncate) `path` and initialize a chunk store in it.
pub fn create_file(path: impl AsRef<Path>, config: &ChunkStoreConfig) -> Result<ChunkFile> {
    config.validate()?;
    ChunkFile::create(FileByteStream::create(path)?, config)
}

/// Open the chunk store at `seek_start` inside an existing file.
pub fn open_file(path: impl AsRef<Path>, seek_start: u64) -> Result<ChunkFile> {
    ChunkFile::open(FileByteStream::open(path)?, seek_start)
}
