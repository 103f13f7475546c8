//! In-memory copy of the chunk store header plus its dirty flag.

use lks_ondisk::ChunkStoreHeader;
use lks_types::BlockNumber;

/// Mutated only through setters, which mark the header dirty when the value
/// actually changes. `flush` persists and calls [`HeaderState::mark_clean`].
#[derive(Debug, Clone)]
pub(crate) struct HeaderState {
    header: ChunkStoreHeader,
    dirty: bool,
}

impl HeaderState {
    pub(crate) fn clean(header: ChunkStoreHeader) -> Self {
        Self {
            header,
            dirty: false,
        }
    }

    pub(crate) fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub(crate) fn free_head(&self) -> Option<BlockNumber> {
        self.header.free_head
    }

    pub(crate) fn set_free_head(&mut self, free_head: Option<BlockNumber>) {
        if self.header.free_head != free_head {
            self.header.free_head = free_head;
            self.dirty = true;
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn header(&self) -> &ChunkStoreHeader {
        &self.header
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
