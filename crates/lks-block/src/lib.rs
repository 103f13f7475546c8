#![forbid(unsafe_code)]
//! Fixed-size block layer.
//!
//! A [`FixedBlockStore`] carves the region of a [`ByteStream`] that starts at
//! `seek_start` into a small header followed by an array of equally sized
//! blocks:
//!
//! ```text
//! seek_start: [prefix][block_size: i32][block 0][block 1] ...
//! ```
//!
//! The block count is never persisted. It is derived from the stream length,
//! so the store grows by writing the block just past the current end.

pub mod stream;

pub use stream::{ByteStream, FileByteStream, MemByteStream};

use lks_error::{LksError, Result};
use lks_ondisk::BlockStoreHeader;
use lks_types::{BlockNumber, MIN_BLOCK_SIZE, MIN_HEADER_PREFIX_LEN, ParseError};
use tracing::{debug, trace};

fn header_len(prefix: &[u8]) -> Result<u64> {
    u64::try_from(BlockStoreHeader::encoded_len(prefix.len()))
        .map_err(|_| LksError::Config("header length overflows u64".to_owned()))
}

fn check_prefix(prefix: &[u8]) -> Result<()> {
    if prefix.len() < MIN_HEADER_PREFIX_LEN {
        return Err(LksError::Config(format!(
            "header prefix must be at least {MIN_HEADER_PREFIX_LEN} bytes, got {}",
            prefix.len()
        )));
    }
    Ok(())
}

fn header_format_error(err: &ParseError) -> LksError {
    LksError::Format(format!("block store header: {err}"))
}

/// Block-indexed random access over one region of a stream.
#[derive(Debug)]
pub struct FixedBlockStore<S: ByteStream> {
    stream: S,
    seek_start: u64,
    header_len: u64,
    block_size: u32,
}

impl<S: ByteStream> FixedBlockStore<S> {
    /// Write a fresh header at `seek_start` and return a store using
    /// `block_size`. Any previous header at that location is overwritten.
    pub fn initialize(
        stream: S,
        seek_start: u64,
        header_prefix: &[u8],
        block_size: u32,
    ) -> Result<Self> {
        check_prefix(header_prefix)?;
        if block_size < MIN_BLOCK_SIZE {
            return Err(LksError::Config(format!(
                "block_size={block_size} is below the minimum of {MIN_BLOCK_SIZE}"
            )));
        }

        let header = BlockStoreHeader {
            prefix: header_prefix.to_vec(),
            block_size,
        };
        let bytes = header
            .to_bytes()
            .map_err(|err| LksError::Config(format!("block_size={block_size}: {err}")))?;
        stream.write_all_at(seek_start, &bytes)?;

        debug!(
            target: "lks::block",
            event = "block_store_init",
            seek_start,
            block_size
        );
        Ok(Self {
            stream,
            seek_start,
            header_len: header_len(header_prefix)?,
            block_size,
        })
    }

    /// Read and validate the header at `seek_start`; the block size comes
    /// from the stored header.
    pub fn open(stream: S, seek_start: u64, header_prefix: &[u8]) -> Result<Self> {
        check_prefix(header_prefix)?;
        let header_len = header_len(header_prefix)?;

        let header_end = seek_start
            .checked_add(header_len)
            .ok_or_else(|| LksError::Config("seek_start + header overflows u64".to_owned()))?;
        let stream_len = stream.len_bytes()?;
        if stream_len < header_end {
            return Err(LksError::Format(format!(
                "region too short for a block store header: need {header_end} bytes, stream has {stream_len}"
            )));
        }

        let mut raw = vec![
            0_u8;
            usize::try_from(header_len)
                .map_err(|_| LksError::Config("header length overflows usize".to_owned()))?
        ];
        stream.read_exact_at(seek_start, &mut raw)?;
        let header = BlockStoreHeader::parse_from_bytes(&raw, header_prefix)
            .map_err(|err| header_format_error(&err))?;
        if header.block_size < MIN_BLOCK_SIZE {
            return Err(LksError::Format(format!(
                "stored block_size={} is below the minimum of {MIN_BLOCK_SIZE}",
                header.block_size
            )));
        }

        debug!(
            target: "lks::block",
            event = "block_store_open",
            seek_start,
            block_size = header.block_size
        );
        Ok(Self {
            stream,
            seek_start,
            header_len,
            block_size: header.block_size,
        })
    }

    /// Payload bytes per block.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Byte offset of block 0.
    #[must_use]
    pub fn data_start(&self) -> u64 {
        self.seek_start.saturating_add(self.header_len)
    }

    /// First block number that does not exist yet:
    /// `ceil((stream_len - data_start) / block_size)`.
    pub fn next_block_number(&self) -> Result<BlockNumber> {
        let len = self.stream.len_bytes()?;
        let data = len.saturating_sub(self.data_start());
        Ok(BlockNumber(data.div_ceil(u64::from(self.block_size))))
    }

    /// Byte offset of block `block` within the stream.
    pub fn block_offset(&self, block: BlockNumber) -> Result<u64> {
        block
            .0
            .checked_mul(u64::from(self.block_size))
            .and_then(|rel| rel.checked_add(self.data_start()))
            .ok_or_else(|| LksError::Bounds(format!("byte offset of block {block} overflows")))
    }

    fn check_len(&self, len: usize, op: &str) -> Result<()> {
        let fits = u32::try_from(len).is_ok_and(|len| len <= self.block_size);
        if !fits {
            return Err(LksError::Bounds(format!(
                "{op} length {len} exceeds block_size={}",
                self.block_size
            )));
        }
        Ok(())
    }

    /// Read `dst.len()` bytes from the start of `block`.
    pub fn read_block(&self, block: BlockNumber, dst: &mut [u8]) -> Result<()> {
        self.check_len(dst.len(), "read")?;
        let next = self.next_block_number()?;
        if block >= next {
            return Err(LksError::Bounds(format!(
                "read of block {block} at or past next block number {next}"
            )));
        }
        let offset = self.block_offset(block)?;
        trace!(target: "lks::block", event = "read_block", block = block.0, len = dst.len());
        self.stream.read_exact_at(offset, dst)
    }

    /// Write `src` at the start of `block`. `block` may be at most one past
    /// the current last block.
    pub fn write_block(&self, block: BlockNumber, src: &[u8]) -> Result<()> {
        self.check_len(src.len(), "write")?;
        let next = self.next_block_number()?;
        if block > next {
            return Err(LksError::Bounds(format!(
                "write of block {block} would leave a gap: next block number is {next}"
            )));
        }
        let offset = self.block_offset(block)?;
        trace!(target: "lks::block", event = "write_block", block = block.0, len = src.len());
        self.stream.write_all_at(offset, src)
    }

    /// Flush the underlying stream.
    pub fn flush(&self) -> Result<()> {
        self.stream.sync()
    }

    #[must_use]
    pub fn inner(&self) -> &S {
        &self.stream
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.stream
    }
}
