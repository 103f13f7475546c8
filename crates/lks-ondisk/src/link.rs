//! Per-block link metadata and the chunk length prefix.

use lks_types::{
    BlockKind, BlockNumber, LINK_OVERHEAD, NULL_BLOCK_NUMBER, ParseError,
    read_le_i32, read_le_i64, write_le_i32, write_le_i64,
};
use serde::{Deserialize, Serialize};

/// Decode an on-disk block reference. `-1` means "none"; any other negative
/// value is invalid.
pub fn decode_block_ref(raw: i64) -> Result<Option<BlockNumber>, ParseError> {
    if raw == NULL_BLOCK_NUMBER {
        return Ok(None);
    }
    u64::try_from(raw)
        .map(|n| Some(BlockNumber(n)))
        .map_err(|_| ParseError::InvalidField {
            field: "block_ref",
            reason: "negative and not the null sentinel",
        })
}

pub fn encode_block_ref(block: Option<BlockNumber>) -> Result<i64, ParseError> {
    match block {
        None => Ok(NULL_BLOCK_NUMBER),
        Some(block) => i64::try_from(block.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_ref",
        }),
    }
}

/// The `[kind][next]` prefix carried by every physical block of a chunk
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLink {
    pub kind: BlockKind,
    pub next: Option<BlockNumber>,
}

impl BlockLink {
    pub const ENCODED_LEN: usize = LINK_OVERHEAD;

    #[must_use]
    pub fn new(kind: BlockKind, next: Option<BlockNumber>) -> Self {
        Self { kind, next }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(ParseError::InsufficientData {
                needed: Self::ENCODED_LEN,
                offset: 0,
                actual: bytes.len(),
            });
        }
        let kind = BlockKind::from_raw(bytes[0])?;
        let next = decode_block_ref(read_le_i64(bytes, 1)?)?;
        Ok(Self { kind, next })
    }

    /// Write the link into the first [`Self::ENCODED_LEN`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), ParseError> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(ParseError::InsufficientData {
                needed: Self::ENCODED_LEN,
                offset: 0,
                actual: buf.len(),
            });
        }
        buf[0] = self.kind.as_raw();
        write_le_i64(buf, 1, encode_block_ref(self.next)?)
    }

    pub fn to_bytes(&self) -> Result<[u8; Self::ENCODED_LEN], ParseError> {
        let mut out = [0_u8; Self::ENCODED_LEN];
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// Read the chunk length prefix at the start of a head block's payload.
pub fn parse_chunk_len(payload: &[u8]) -> Result<u32, ParseError> {
    let raw = read_le_i32(payload, 0)?;
    u32::try_from(raw).map_err(|_| ParseError::InvalidField {
        field: "chunk_length",
        reason: "negative",
    })
}

pub fn write_chunk_len(payload: &mut [u8], len: usize) -> Result<(), ParseError> {
    let raw = i32::try_from(len).map_err(|_| ParseError::IntegerConversion {
        field: "chunk_length",
    })?;
    write_le_i32(payload, 0, raw)
}
