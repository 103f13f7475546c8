#![forbid(unsafe_code)]
//! Shared newtypes, format constants, and fixed-width codec helpers.
//!
//! Every multi-byte integer linkstore persists is little-endian. The
//! `read_le_*` / `write_le_*` helpers check bounds before touching the
//! buffer and report [`ParseError::InsufficientData`] instead of panicking or
//! truncating.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Smallest logical block size accepted by either store layer.
pub const MIN_BLOCK_SIZE: u32 = 20;

/// Shortest header magic prefix a fixed block store accepts.
pub const MIN_HEADER_PREFIX_LEN: usize = 3;

/// Width of the on-disk block-size field that follows a header prefix.
pub const BLOCK_SIZE_FIELD_LEN: usize = 4;

/// Width of the free-list head pointer in the chunk store header.
pub const BLOCK_REF_FIELD_LEN: usize = 8;

/// Per-block link metadata: one kind byte followed by a signed 64-bit
/// next-block pointer.
pub const LINK_OVERHEAD: usize = 1 + BLOCK_REF_FIELD_LEN;

/// [`LINK_OVERHEAD`] as a block-size quantity.
pub const LINK_OVERHEAD_U32: u32 = 9;

/// Chunk length prefix at the start of a head block's payload.
pub const CHUNK_LENGTH_PREFIX: usize = 4;

/// On-disk encoding of "no block" (end of chain, empty free list).
pub const NULL_BLOCK_NUMBER: i64 = -1;

/// Physical block index inside a block store region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub const ZERO: Self = Self(0);

    /// The following block number, or `None` on overflow.
    #[must_use]
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

/// Opaque reference to a stored chunk: the block number of its head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkHandle(pub u64);

impl ChunkHandle {
    #[must_use]
    pub fn head(self) -> BlockNumber {
        BlockNumber(self.0)
    }
}

impl From<BlockNumber> for ChunkHandle {
    fn from(block: BlockNumber) -> Self {
        Self(block.0)
    }
}

/// Occupancy tag stored in the first byte of every linked block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BlockKind {
    /// On the free list.
    Free = 0,
    /// First block of a chunk; payload starts with the chunk length.
    Head = 1,
    /// Continuation block of a chunk.
    Body = 2,
}

impl BlockKind {
    pub fn from_raw(raw: u8) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::Head),
            2 => Ok(Self::Body),
            _ => Err(ParseError::InvalidField {
                field: "block_kind",
                reason: "must be 0 (free), 1 (head) or 2 (body)",
            }),
        }
    }

    #[must_use]
    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:02x?}, got {actual:02x?}")]
    InvalidMagic { expected: Vec<u8>, actual: Vec<u8> },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn ensure_slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&mut data[offset..end])
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[inline]
pub fn write_fixed<const N: usize>(
    data: &mut [u8],
    offset: usize,
    bytes: [u8; N],
) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, N)?.copy_from_slice(&bytes);
    Ok(())
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    read_fixed::<2>(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    read_fixed::<4>(data, offset).map(u32::from_le_bytes)
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    read_fixed::<8>(data, offset).map(u64::from_le_bytes)
}

#[inline]
pub fn read_le_i32(data: &[u8], offset: usize) -> Result<i32, ParseError> {
    read_fixed::<4>(data, offset).map(i32::from_le_bytes)
}

#[inline]
pub fn read_le_i64(data: &[u8], offset: usize) -> Result<i64, ParseError> {
    read_fixed::<8>(data, offset).map(i64::from_le_bytes)
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    write_fixed(data, offset, value.to_le_bytes())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    write_fixed(data, offset, value.to_le_bytes())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    write_fixed(data, offset, value.to_le_bytes())
}

#[inline]
pub fn write_le_i32(data: &mut [u8], offset: usize, value: i32) -> Result<(), ParseError> {
    write_fixed(data, offset, value.to_le_bytes())
}

#[inline]
pub fn write_le_i64(data: &mut [u8], offset: usize, value: i64) -> Result<(), ParseError> {
    write_fixed(data, offset, value.to_le_bytes())
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChunkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Head => write!(f, "head"),
            Self::Body => write!(f, "body"),
        }
    }
}
