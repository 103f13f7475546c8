//! Block allocation: free-list pop/push and growth past the end.

use crate::{LinkedChunkStore, corrupt};
use lks_block::ByteStream;
use lks_error::{LksError, Result};
use lks_ondisk::BlockLink;
use lks_types::{BlockKind, BlockNumber};
use tracing::{debug, trace};

impl<S: ByteStream> LinkedChunkStore<S> {
    /// Hand out a block for a chunk under construction.
    ///
    /// Free blocks are reused first. Otherwise the block just past the end is
    /// returned; when that number is the one handed out by the previous call
    /// and is still unwritten, the one after it is returned instead so two
    /// pending blocks never alias.
    pub(crate) fn allocate_block(&mut self) -> Result<BlockNumber> {
        if let Some(free) = self.header.free_head() {
            let end = self.blocks.next_block_number()?;
            if free >= end {
                return Err(corrupt(
                    free,
                    format!("free-list head is past the last block ({end} blocks)"),
                ));
            }
            let link = self.read_link(free)?;
            if link.kind != BlockKind::Free {
                return Err(corrupt(
                    free,
                    format!("free-list head is flagged {}", link.kind),
                ));
            }
            self.header.set_free_head(link.next);
            self.pending = None;
            trace!(
                target: "lks::chunk",
                event = "free_list_pop",
                block = free.0,
                new_head = ?link.next
            );
            return Ok(free);
        }

        let mut candidate = self.blocks.next_block_number()?;
        if let Some(pending) = self.pending.filter(|pending| *pending == candidate) {
            candidate = pending
                .checked_next()
                .ok_or_else(|| LksError::Bounds("block numbers exhausted".to_owned()))?;
        }
        self.pending = Some(candidate);
        debug!(target: "lks::chunk", event = "block_alloc", block = candidate.0);
        Ok(candidate)
    }

    /// Flag `block` free and push it on the front of the free list.
    pub(crate) fn push_free(&mut self, block: BlockNumber) -> Result<()> {
        let link = BlockLink::new(BlockKind::Free, self.header.free_head());
        self.write_link(block, link)?;
        self.header.set_free_head(Some(block));
        trace!(target: "lks::chunk", event = "free_list_push", block = block.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::LinkedChunkStore;
    use lks_block::MemByteStream;
    use lks_types::BlockNumber;

    #[test]
    fn back_to_back_growth_does_not_alias() {
        let mut store = LinkedChunkStore::initialize(MemByteStream::new(), 0, 32).unwrap();
        let a = store.allocate_block().unwrap();
        let b = store.allocate_block().unwrap();
        let c = store.allocate_block().unwrap();
        assert_eq!(a, BlockNumber(0));
        assert_eq!(b, BlockNumber(1));
        assert_eq!(c, BlockNumber(2));
    }

    #[test]
    fn free_list_is_lifo() {
        let mut store = LinkedChunkStore::initialize(MemByteStream::new(), 0, 32).unwrap();
        for _ in 0..3 {
            store.store(b"x").unwrap();
        }
        store.push_free(BlockNumber(0)).unwrap();
        store.push_free(BlockNumber(2)).unwrap();
        assert!(store.header_dirty());

        assert_eq!(store.allocate_block().unwrap(), BlockNumber(2));
        assert_eq!(store.allocate_block().unwrap(), BlockNumber(0));
        assert_eq!(store.allocate_block().unwrap(), BlockNumber(3));
    }

    #[test]
    fn popping_a_non_free_block_is_corruption() {
        let mut store = LinkedChunkStore::initialize(MemByteStream::new(), 0, 32).unwrap();
        store.store(b"a").unwrap();
        store.store(b"b").unwrap();
        store.push_free(BlockNumber(1)).unwrap();
        // Block 1 is reused as a head, then the free list is pointed back at it.
        store.store(b"c").unwrap();
        store.header.set_free_head(Some(BlockNumber(1)));

        let err = store.allocate_block().unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
    }
}
