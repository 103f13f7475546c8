#![forbid(unsafe_code)]
//! Linked chunk store.
//!
//! Stores variable-length byte chunks as singly linked chains of fixed-size
//! blocks on top of a [`FixedBlockStore`]. Every physical block starts with a
//! [`BlockLink`] (`[kind: u8][next: i64]`) followed by `block_size` payload
//! bytes.
//!
//! ```text
//! seek_start
//! │ chunk store header  [LKSC\x01][block_size: i32][free_head: i64]
//! │ block store header  [LKSB\x01][block_size + 9: i32]
//! │ block 0             [kind][next][payload ...]
//! │ block 1             ...
//! ```
//!
//! A chunk is addressed by the number of its head block ([`ChunkHandle`]).
//! The head payload begins with the chunk length; body blocks carry the rest.
//! Released blocks go onto a LIFO free list threaded through the `next`
//! fields, whose head lives in the chunk store header.
//!
//! ## Layering
//!
//! 1. **Allocation** (`alloc`): free-list pop/push and growth past the end.
//! 2. **Chunks** (this module): `store`, `get`, `release`.
//! 3. **Recovery** ([`recovery`]): full structural scan, manifest
//!    reconciliation, orphan release.
//!
//! The store performs no locking and no autosave. Header changes (the
//! free-list head) reach the stream only on [`LinkedChunkStore::flush`] or
//! [`LinkedChunkStore::close`].

mod alloc;
pub mod config;
mod header;
pub mod recovery;

pub use config::{ChunkStoreConfig, DEFAULT_BLOCK_SIZE};
pub use recovery::{ChunkManifest, StructureReport};

use header::HeaderState;
use lks_block::{ByteStream, FixedBlockStore};
use lks_error::{LksError, Result};
use lks_ondisk::{
    BLOCK_STORE_MAGIC, BlockLink, ChunkStoreHeader, parse_chunk_len, write_chunk_len,
};
use lks_types::{BlockKind, BlockNumber, CHUNK_LENGTH_PREFIX, ChunkHandle, LINK_OVERHEAD};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// Log a corruption finding and build the matching error.
pub(crate) fn corrupt(block: BlockNumber, detail: impl Into<String>) -> LksError {
    let detail = detail.into();
    warn!(
        target: "lks::chunk",
        event = "corruption_detected",
        block = block.0,
        detail = %detail
    );
    LksError::corruption(block.0, detail)
}

/// Variable-length chunks over chained blocks.
#[derive(Debug)]
pub struct LinkedChunkStore<S: ByteStream> {
    blocks: FixedBlockStore<S>,
    seek_start: u64,
    header: HeaderState,
    /// Logical payload bytes per block.
    logical: usize,
    /// Block handed out from growth past the end that has not been written.
    pending: Option<BlockNumber>,
}

impl<S: ByteStream> LinkedChunkStore<S> {
    /// Create a new store at `seek_start` with `block_size` logical bytes per
    /// block.
    pub fn initialize(stream: S, seek_start: u64, block_size: u32) -> Result<Self> {
        let config = ChunkStoreConfig {
            block_size,
            seek_start,
            ..ChunkStoreConfig::default()
        };
        Self::create(stream, &config)
    }

    /// Create a new store from a validated [`ChunkStoreConfig`].
    pub fn create(stream: S, config: &ChunkStoreConfig) -> Result<Self> {
        config.validate()?;
        let header = ChunkStoreHeader {
            block_size: config.block_size,
            free_head: None,
        };
        let bytes = header
            .to_bytes()
            .map_err(|err| LksError::Config(format!("chunk store header: {err}")))?;
        stream.write_all_at(config.seek_start, &bytes)?;

        let blocks = FixedBlockStore::initialize(
            stream,
            Self::block_store_start(config.seek_start)?,
            BLOCK_STORE_MAGIC,
            config.physical_block_size(),
        )?;
        debug!(
            target: "lks::chunk",
            event = "chunk_store_init",
            seek_start = config.seek_start,
            block_size = config.block_size
        );
        Self::assemble(blocks, config.seek_start, HeaderState::clean(header))
    }

    /// Open an existing store at `seek_start`.
    pub fn open(stream: S, seek_start: u64) -> Result<Self> {
        let header_end = Self::block_store_start(seek_start)?;
        let stream_len = stream.len_bytes()?;
        if stream_len < header_end {
            return Err(LksError::Format(format!(
                "region too short for a chunk store header: need {header_end} bytes, stream has {stream_len}"
            )));
        }

        let mut raw = [0_u8; ChunkStoreHeader::ENCODED_LEN];
        stream.read_exact_at(seek_start, &mut raw)?;
        let header = ChunkStoreHeader::parse_from_bytes(&raw)
            .map_err(|err| LksError::Format(format!("chunk store header: {err}")))?;
        let config = ChunkStoreConfig {
            block_size: header.block_size,
            seek_start,
            ..ChunkStoreConfig::default()
        };
        config
            .validate()
            .map_err(|err| LksError::Format(format!("stored {err}")))?;

        let blocks = FixedBlockStore::open(stream, header_end, BLOCK_STORE_MAGIC)?;
        if blocks.block_size() != config.physical_block_size() {
            return Err(LksError::Format(format!(
                "block store size {} does not match chunk block size {} + {LINK_OVERHEAD}",
                blocks.block_size(),
                header.block_size
            )));
        }
        debug!(
            target: "lks::chunk",
            event = "chunk_store_open",
            seek_start,
            block_size = header.block_size,
            free_head = ?header.free_head
        );
        Self::assemble(blocks, seek_start, HeaderState::clean(header))
    }

    fn block_store_start(seek_start: u64) -> Result<u64> {
        seek_start
            .checked_add(ChunkStoreHeader::ENCODED_LEN as u64)
            .ok_or_else(|| LksError::Config("seek_start + header overflows u64".to_owned()))
    }

    fn assemble(blocks: FixedBlockStore<S>, seek_start: u64, header: HeaderState) -> Result<Self> {
        let logical = usize::try_from(header.block_size())
            .map_err(|_| LksError::Config("block_size does not fit usize".to_owned()))?;
        Ok(Self {
            blocks,
            seek_start,
            header,
            logical,
            pending: None,
        })
    }

    /// Logical payload bytes per block.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.header.block_size()
    }

    #[must_use]
    pub fn seek_start(&self) -> u64 {
        self.seek_start
    }

    /// True when the in-memory header differs from what was last persisted.
    #[must_use]
    pub fn header_dirty(&self) -> bool {
        self.header.is_dirty()
    }

    /// Number of physical blocks currently in the region.
    pub fn next_block_number(&self) -> Result<BlockNumber> {
        self.blocks.next_block_number()
    }

    fn physical_len(&self) -> usize {
        self.logical + LINK_OVERHEAD
    }

    // ── Block-level helpers ────────────────────────────────────────────────

    pub(crate) fn read_link(&self, block: BlockNumber) -> Result<BlockLink> {
        let mut raw = [0_u8; BlockLink::ENCODED_LEN];
        self.blocks.read_block(block, &mut raw)?;
        BlockLink::parse_from_bytes(&raw)
            .map_err(|err| corrupt(block, format!("unreadable link metadata: {err}")))
    }

    pub(crate) fn write_link(&mut self, block: BlockNumber, link: BlockLink) -> Result<()> {
        let raw = link
            .to_bytes()
            .map_err(|err| LksError::Bounds(format!("link for block {block}: {err}")))?;
        self.blocks.write_block(block, &raw)?;
        self.written(block);
        Ok(())
    }

    /// Read a whole physical block into `buf` and decode its link.
    fn read_full(&self, block: BlockNumber, buf: &mut [u8]) -> Result<BlockLink> {
        self.blocks.read_block(block, buf)?;
        BlockLink::parse_from_bytes(buf)
            .map_err(|err| corrupt(block, format!("unreadable link metadata: {err}")))
    }

    /// Stamp `link` into the first bytes of `buf` and write it as `block`.
    fn write_full(&mut self, block: BlockNumber, link: BlockLink, buf: &mut [u8]) -> Result<()> {
        link.write_to(buf)
            .map_err(|err| LksError::Bounds(format!("link for block {block}: {err}")))?;
        self.blocks.write_block(block, buf)?;
        self.written(block);
        Ok(())
    }

    fn written(&mut self, block: BlockNumber) {
        if self.pending == Some(block) {
            self.pending = None;
        }
    }

    /// Validate a chain successor against the current end of the region.
    pub(crate) fn follow(
        from: BlockNumber,
        next: BlockNumber,
        end: BlockNumber,
    ) -> Result<BlockNumber> {
        if next >= end {
            return Err(corrupt(
                from,
                format!("next pointer {next} is past the last block ({end} blocks)"),
            ));
        }
        Ok(next)
    }

    // ── Chunk operations ───────────────────────────────────────────────────

    /// Store `bytes` as a new chunk and return its handle.
    pub fn store(&mut self, bytes: &[u8]) -> Result<ChunkHandle> {
        self.store_range(bytes, 0, bytes.len())
    }

    /// Store `buf[offset..offset + len]` as a new chunk.
    pub fn store_range(&mut self, buf: &[u8], offset: usize, len: usize) -> Result<ChunkHandle> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                LksError::Bounds(format!(
                    "slice offset={offset} len={len} exceeds buffer of {} bytes",
                    buf.len()
                ))
            })?;
        let data = &buf[offset..end];

        let stored = self.write_chain(data);
        if stored.is_err() {
            // A block handed out for this chunk may never have been written.
            self.pending = None;
        }
        stored
    }

    /// Allocate and write the blocks of one chunk, returning its head.
    fn write_chain(&mut self, data: &[u8]) -> Result<ChunkHandle> {
        let mut block_buf = vec![0_u8; self.physical_len()];
        write_chunk_len(&mut block_buf[LINK_OVERHEAD..], data.len())
            .map_err(|err| LksError::Bounds(format!("chunk of {} bytes: {err}", data.len())))?;

        let head = self.allocate_block()?;
        let first = data.len().min(self.logical - CHUNK_LENGTH_PREFIX);
        let payload_start = LINK_OVERHEAD + CHUNK_LENGTH_PREFIX;
        block_buf[payload_start..payload_start + first].copy_from_slice(&data[..first]);

        let mut current = head;
        let mut kind = BlockKind::Head;
        let mut pos = first;
        let mut block_count = 1_u64;
        while pos < data.len() {
            let next = self.allocate_block()?;
            self.write_full(current, BlockLink::new(kind, Some(next)), &mut block_buf)?;

            block_buf.fill(0);
            let take = (data.len() - pos).min(self.logical);
            block_buf[LINK_OVERHEAD..LINK_OVERHEAD + take].copy_from_slice(&data[pos..pos + take]);
            pos += take;
            current = next;
            kind = BlockKind::Body;
            block_count += 1;
        }
        self.write_full(current, BlockLink::new(kind, None), &mut block_buf)?;

        debug!(
            target: "lks::chunk",
            event = "chunk_store",
            head = head.0,
            len = data.len(),
            blocks = block_count
        );
        Ok(ChunkHandle::from(head))
    }

    /// Read the head block of `handle` and return it with its declared length.
    fn read_head(&self, handle: ChunkHandle, buf: &mut [u8]) -> Result<(BlockLink, usize)> {
        let head = handle.head();
        let link = self.read_full(head, buf)?;
        if link.kind != BlockKind::Head {
            return Err(corrupt(
                head,
                format!("expected a head block, found {}", link.kind),
            ));
        }
        let len = parse_chunk_len(&buf[LINK_OVERHEAD..])
            .map_err(|err| corrupt(head, format!("bad chunk length: {err}")))?;
        let len = usize::try_from(len)
            .map_err(|_| corrupt(head, format!("chunk length {len} does not fit usize")))?;
        Ok((link, len))
    }

    /// Declared length of a chunk, from its head block alone.
    pub fn chunk_len(&self, handle: ChunkHandle) -> Result<usize> {
        let mut buf = [0_u8; LINK_OVERHEAD + CHUNK_LENGTH_PREFIX];
        self.read_head(handle, &mut buf).map(|(_, len)| len)
    }

    /// Read a whole chunk.
    pub fn get(&self, handle: ChunkHandle) -> Result<Vec<u8>> {
        let end = self.blocks.next_block_number()?;
        let mut block_buf = vec![0_u8; self.physical_len()];
        let (mut link, len) = self.read_head(handle, &mut block_buf)?;

        // The declared length is untrusted until the chain delivers it.
        let reachable = usize::try_from(end.0)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.logical);
        let mut out = Vec::with_capacity(len.min(reachable));
        let first = len.min(self.logical - CHUNK_LENGTH_PREFIX);
        let payload_start = LINK_OVERHEAD + CHUNK_LENGTH_PREFIX;
        out.extend_from_slice(&block_buf[payload_start..payload_start + first]);

        let mut current = handle.head();
        while out.len() < len {
            let Some(next) = link.next else {
                return Err(corrupt(
                    current,
                    format!(
                        "chain of chunk {handle} ends after {} of {len} bytes",
                        out.len()
                    ),
                ));
            };
            let next = Self::follow(current, next, end)?;
            link = self.read_full(next, &mut block_buf)?;
            if link.kind != BlockKind::Body {
                return Err(corrupt(
                    next,
                    format!("expected a body block of chunk {handle}, found {}", link.kind),
                ));
            }
            let take = (len - out.len()).min(self.logical);
            out.extend_from_slice(&block_buf[LINK_OVERHEAD..LINK_OVERHEAD + take]);
            current = next;
        }

        if let Some(extra) = link.next {
            return Err(corrupt(
                current,
                format!("chain of chunk {handle} continues to block {extra} past its {len} bytes"),
            ));
        }
        trace!(target: "lks::chunk", event = "chunk_get", head = handle.0, len);
        Ok(out)
    }

    /// Walk the chain of `handle`, checking `Head` then `Body` flags, and
    /// return its blocks in chain order.
    pub(crate) fn collect_chain(&self, handle: ChunkHandle) -> Result<Vec<BlockNumber>> {
        let end = self.blocks.next_block_number()?;
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(handle.head());
        let mut expected = BlockKind::Head;
        let mut prev = handle.head();

        while let Some(block) = cursor {
            let block = if chain.is_empty() {
                block
            } else {
                Self::follow(prev, block, end)?
            };
            if !seen.insert(block) {
                return Err(corrupt(
                    block,
                    format!("chain of chunk {handle} loops back to block {block}"),
                ));
            }
            let link = self.read_link(block)?;
            if link.kind != expected {
                return Err(corrupt(
                    block,
                    format!(
                        "chunk {handle}: expected a {expected} block, found {}",
                        link.kind
                    ),
                ));
            }
            chain.push(block);
            prev = block;
            cursor = link.next;
            expected = BlockKind::Body;
        }
        Ok(chain)
    }

    /// Return every block of `handle` to the free list.
    ///
    /// The chain is validated before anything is freed. Blocks are pushed
    /// tail first, so the head ends up at the front of the free list and the
    /// next allocations reuse the chain in its original order.
    pub fn release(&mut self, handle: ChunkHandle) -> Result<u64> {
        let chain = self.collect_chain(handle)?;
        for block in chain.iter().rev() {
            self.push_free(*block)?;
        }
        let freed = chain.len() as u64;
        debug!(
            target: "lks::chunk",
            event = "chunk_release",
            head = handle.0,
            blocks = freed
        );
        Ok(freed)
    }

    /// Number of blocks on the free list.
    pub fn free_list_len(&self) -> Result<u64> {
        let end = self.blocks.next_block_number()?;
        let mut seen = HashSet::new();
        let mut cursor = self.header.free_head();
        let mut prev = None;
        while let Some(block) = cursor {
            if block >= end {
                return Err(corrupt(
                    prev.unwrap_or(block),
                    format!("free list points past the last block: {block}"),
                ));
            }
            if !seen.insert(block) {
                return Err(corrupt(block, "free list contains a cycle"));
            }
            let link = self.read_link(block)?;
            if link.kind != BlockKind::Free {
                return Err(corrupt(
                    block,
                    format!("free list entry flagged {}", link.kind),
                ));
            }
            prev = Some(block);
            cursor = link.next;
        }
        Ok(seen.len() as u64)
    }

    // ── Persistence ────────────────────────────────────────────────────────

    /// Write the header back if it changed, then flush the stream.
    pub fn flush(&mut self) -> Result<()> {
        if self.header.is_dirty() {
            let bytes = self
                .header
                .header()
                .to_bytes()
                .map_err(|err| LksError::Bounds(format!("chunk store header: {err}")))?;
            self.blocks.inner().write_all_at(self.seek_start, &bytes)?;
            self.header.mark_clean();
            debug!(
                target: "lks::chunk",
                event = "header_flush",
                free_head = ?self.header.free_head()
            );
        }
        self.blocks.flush()
    }

    /// Flush and release the stream.
    pub fn close(self) -> Result<()> {
        self.into_inner().map(drop)
    }

    /// Flush and hand the stream back.
    pub fn into_inner(mut self) -> Result<S> {
        self.flush()?;
        Ok(self.blocks.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lks_block::MemByteStream;
    use proptest::prelude::*;

    fn fresh(block_size: u32) -> (MemByteStream, LinkedChunkStore<MemByteStream>) {
        let mem = MemByteStream::new();
        let store = LinkedChunkStore::initialize(mem.clone(), 0, block_size).expect("init");
        (mem, store)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn chain_of(store: &LinkedChunkStore<MemByteStream>, handle: ChunkHandle) -> Vec<BlockLink> {
        store
            .collect_chain(handle)
            .unwrap()
            .into_iter()
            .map(|b| store.read_link(b).unwrap())
            .collect()
    }

    #[test]
    fn empty_chunk_fits_in_head_block() {
        let (_, mut store) = fresh(32);
        let handle = store.store(&[]).unwrap();
        assert_eq!(store.get(handle).unwrap(), Vec::<u8>::new());
        assert_eq!(store.chunk_len(handle).unwrap(), 0);
        assert_eq!(store.next_block_number().unwrap(), BlockNumber(1));
    }

    #[test]
    fn two_stores_on_empty_file_get_sequential_handles() {
        let (_, mut store) = fresh(32);
        let a = store.store(b"first").unwrap();
        let b = store.store(b"second").unwrap();
        assert_eq!(a, ChunkHandle(0));
        assert_eq!(b, ChunkHandle(1));
    }

    #[test]
    fn two_hundred_bytes_span_four_blocks_of_64() {
        let (_, mut store) = fresh(64);
        let data = pattern(200);
        let handle = store.store(&data).unwrap();

        let chain = chain_of(&store, handle);
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].kind, BlockKind::Head);
        assert!(chain[1..].iter().all(|link| link.kind == BlockKind::Body));
        assert!(chain[..3].iter().all(|link| link.next.is_some()));
        assert_eq!(chain[3].next, None);
        assert_eq!(store.get(handle).unwrap(), data);
    }

    #[test]
    fn payload_exactly_filling_head_uses_one_block() {
        let (_, mut store) = fresh(32);
        let handle = store.store(&pattern(28)).unwrap();
        assert_eq!(chain_of(&store, handle).len(), 1);

        let handle = store.store(&pattern(29)).unwrap();
        assert_eq!(chain_of(&store, handle).len(), 2);
        assert_eq!(store.get(handle).unwrap(), pattern(29));
    }

    #[test]
    fn store_range_checks_slice_bounds() {
        let (_, mut store) = fresh(32);
        let buf = pattern(50);
        let handle = store.store_range(&buf, 10, 30).unwrap();
        assert_eq!(store.get(handle).unwrap(), buf[10..40].to_vec());

        assert!(matches!(
            store.store_range(&buf, 40, 11),
            Err(LksError::Bounds(_))
        ));
        assert!(matches!(
            store.store_range(&buf, usize::MAX, 2),
            Err(LksError::Bounds(_))
        ));
    }

    #[test]
    fn released_chunk_blocks_are_reused_first() {
        let (_, mut store) = fresh(32);
        let first = store.store(&pattern(100)).unwrap();
        let blocks_before = store.next_block_number().unwrap();

        assert_eq!(store.release(first).unwrap(), 4);
        assert_eq!(store.free_list_len().unwrap(), 4);

        let second = store.store(&pattern(90)).unwrap();
        assert_eq!(second, first);
        assert_eq!(store.next_block_number().unwrap(), blocks_before);
        assert_eq!(store.get(second).unwrap(), pattern(90));
        // 90 bytes need three of the four released blocks.
        assert_eq!(store.free_list_len().unwrap(), 1);
    }

    #[test]
    fn chunk_spanning_free_and_new_blocks() {
        let (_, mut store) = fresh(24);
        let small = store.store(b"tiny").unwrap();
        let keep = store.store(b"keep").unwrap();
        store.release(small).unwrap();

        let data = pattern(120);
        let big = store.store(&data).unwrap();
        assert_eq!(big, small);
        assert_eq!(store.get(big).unwrap(), data);
        assert_eq!(store.get(keep).unwrap(), b"keep".to_vec());
        store.verify(None).unwrap();
    }

    #[test]
    fn get_rejects_non_head_block() {
        let (_, mut store) = fresh(32);
        let handle = store.store(&pattern(80)).unwrap();
        let body = ChunkHandle(handle.0 + 1);
        let err = store.get(body).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
    }

    #[test]
    fn get_past_end_is_bounds_error() {
        let (_, store) = fresh(32);
        assert!(matches!(store.get(ChunkHandle(3)), Err(LksError::Bounds(_))));
    }

    #[test]
    fn negative_length_is_corruption() {
        let (mem, mut store) = fresh(32);
        let handle = store.store(b"abc").unwrap();
        let offset = store.blocks.block_offset(handle.head()).unwrap() + LINK_OVERHEAD as u64;
        mem.write_all_at(offset, &(-1_i32).to_le_bytes()).unwrap();

        let err = store.get(handle).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
        assert!(store.chunk_len(handle).unwrap_err().is_corruption());
    }

    #[test]
    fn huge_declared_length_is_corruption() {
        let (mem, mut store) = fresh(32);
        let handle = store.store(b"abc").unwrap();
        let offset = store.blocks.block_offset(handle.head()).unwrap() + LINK_OVERHEAD as u64;
        mem.write_all_at(offset, &i32::MAX.to_le_bytes()).unwrap();

        assert_eq!(store.chunk_len(handle).unwrap(), i32::MAX as usize);
        let err = store.get(handle).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
        assert!(store.verify(None).unwrap_err().is_corruption());
    }

    /// Fails the next write when armed, otherwise defers to the inner stream.
    struct FailingWrites {
        inner: MemByteStream,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl ByteStream for FailingWrites {
        fn len_bytes(&self) -> Result<u64> {
            self.inner.len_bytes()
        }

        fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
            self.inner.read_exact_at(offset, buf)
        }

        fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(LksError::Io(std::io::Error::other("transient")));
            }
            self.inner.write_all_at(offset, buf)
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn growth_continues_after_a_failed_write() {
        let stream = FailingWrites {
            inner: MemByteStream::new(),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        };
        let mut store = LinkedChunkStore::initialize(stream, 0, 32).unwrap();
        assert_eq!(store.store(b"first").unwrap(), ChunkHandle(0));

        store
            .blocks
            .inner()
            .fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = store.store(&pattern(100)).unwrap_err();
        assert!(matches!(err, LksError::Io(_)), "{err:?}");
        assert_eq!(store.next_block_number().unwrap(), BlockNumber(1));

        let retry = store.store(&pattern(100)).unwrap();
        assert_eq!(retry, ChunkHandle(1));
        assert_eq!(store.get(retry).unwrap(), pattern(100));
        assert_eq!(store.store(b"after").unwrap(), ChunkHandle(5));
        store.verify(None).unwrap();
    }

    #[test]
    fn truncated_chain_is_corruption() {
        let (_, mut store) = fresh(32);
        let handle = store.store(&pattern(70)).unwrap();
        store
            .write_link(BlockNumber(1), BlockLink::new(BlockKind::Body, None))
            .unwrap();
        assert!(store.get(handle).unwrap_err().is_corruption());
    }

    #[test]
    fn release_rejects_inconsistent_flags() {
        let (_, mut store) = fresh(32);
        let handle = store.store(&pattern(70)).unwrap();
        store
            .write_link(BlockNumber(2), BlockLink::new(BlockKind::Free, None))
            .unwrap();
        let err = store.release(handle).unwrap_err();
        assert!(err.is_corruption());
        // Nothing was freed.
        assert_eq!(store.free_list_len().unwrap(), 0);
    }

    #[test]
    fn release_of_body_block_is_corruption() {
        let (_, mut store) = fresh(32);
        store.store(&pattern(70)).unwrap();
        assert!(store.release(ChunkHandle(1)).unwrap_err().is_corruption());
    }

    #[test]
    fn double_release_is_corruption() {
        let (_, mut store) = fresh(32);
        let handle = store.store(b"once").unwrap();
        store.release(handle).unwrap();
        assert!(store.release(handle).unwrap_err().is_corruption());
    }

    #[test]
    fn flush_persists_free_head_and_reopen_sees_it() {
        let (mem, mut store) = fresh(32);
        let a = store.store(&pattern(40)).unwrap();
        let b = store.store(b"b").unwrap();
        store.release(a).unwrap();
        assert!(store.header_dirty());
        store.flush().unwrap();
        assert!(!store.header_dirty());

        let mut reopened = LinkedChunkStore::open(mem, 0).unwrap();
        assert_eq!(reopened.block_size(), 32);
        assert_eq!(reopened.free_list_len().unwrap(), 2);
        assert_eq!(reopened.get(b).unwrap(), b"b".to_vec());
        assert_eq!(reopened.store(b"again").unwrap(), a);
    }

    #[test]
    fn second_flush_is_a_no_op() {
        let (mem, mut store) = fresh(32);
        let handle = store.store(b"x").unwrap();
        store.release(handle).unwrap();
        store.flush().unwrap();
        let after_first = mem.snapshot();

        store.flush().unwrap();
        assert!(!store.header_dirty());
        assert_eq!(mem.snapshot(), after_first);
    }

    #[test]
    fn unflushed_header_is_not_visible_to_reopen() {
        let (mem, mut store) = fresh(32);
        let handle = store.store(b"x").unwrap();
        store.flush().unwrap();
        store.release(handle).unwrap();

        let reopened = LinkedChunkStore::open(mem, 0).unwrap();
        // Block is flagged free on disk but the persisted free list is empty.
        assert_eq!(reopened.free_list_len().unwrap(), 0);
        assert!(reopened.verify(None).unwrap_err().is_corruption());
    }

    #[test]
    fn open_rejects_wrong_magic_and_short_region() {
        let err = LinkedChunkStore::open(MemByteStream::new(), 0).unwrap_err();
        assert!(matches!(err, LksError::Format(_)));

        let junk = MemByteStream::from_bytes(vec![0x5A; 64]);
        let err = LinkedChunkStore::open(junk, 0).unwrap_err();
        assert!(matches!(err, LksError::Format(_)));
    }

    #[test]
    fn initialize_rejects_small_block_size() {
        let err = LinkedChunkStore::initialize(MemByteStream::new(), 0, 19).unwrap_err();
        assert!(matches!(err, LksError::Config(_)));
    }

    #[test]
    fn store_at_nonzero_seek_start_round_trips() {
        let mem = MemByteStream::from_bytes(b"prefix-bytes".to_vec());
        let mut store = LinkedChunkStore::initialize(mem.clone(), 12, 40).unwrap();
        let handle = store.store(&pattern(150)).unwrap();
        store.close().unwrap();

        assert_eq!(&mem.snapshot()[..12], b"prefix-bytes");
        let reopened = LinkedChunkStore::open(mem, 12).unwrap();
        assert_eq!(reopened.get(handle).unwrap(), pattern(150));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn get_returns_what_store_wrote(
            block_size in 20_u32..80,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..400), 1..8),
        ) {
            let (_, mut store) = fresh(block_size);
            let handles: Vec<_> = chunks.iter().map(|c| store.store(c).unwrap()).collect();
            for (handle, chunk) in handles.iter().zip(&chunks) {
                prop_assert_eq!(&store.get(*handle).unwrap(), chunk);
            }
        }

        #[test]
        fn random_store_release_keeps_structure_valid(
            ops in proptest::collection::vec((any::<bool>(), 0_usize..200), 1..40),
        ) {
            let (_, mut store) = fresh(24);
            let mut live: Vec<(ChunkHandle, Vec<u8>)> = Vec::new();
            for (i, (release, len)) in ops.into_iter().enumerate() {
                if release && !live.is_empty() {
                    let (handle, _) = live.swap_remove(i % live.len());
                    store.release(handle).unwrap();
                } else {
                    let data = vec![(i % 256) as u8; len];
                    let handle = store.store(&data).unwrap();
                    live.push((handle, data));
                }
            }
            let report = store.verify(None).unwrap();
            prop_assert_eq!(report.chunks, live.len() as u64);
            for (handle, data) in &live {
                prop_assert_eq!(&store.get(*handle).unwrap(), data);
            }
        }
    }
}
