//! Store headers.

use crate::link::{decode_block_ref, encode_block_ref};
use lks_types::{
    BLOCK_REF_FIELD_LEN, BLOCK_SIZE_FIELD_LEN, BlockNumber, ParseError, ensure_slice, read_le_i32,
    read_le_i64, write_le_i32, write_le_i64,
};
use serde::{Deserialize, Serialize};

/// Magic prefix of the block store embedded in a chunk store.
pub const BLOCK_STORE_MAGIC: &[u8] = b"LKSB\x01";

/// Magic prefix of a chunk store header.
pub const CHUNK_STORE_MAGIC: &[u8] = b"LKSC\x01";

fn check_magic(bytes: &[u8], expected: &[u8]) -> Result<(), ParseError> {
    let actual = ensure_slice(bytes, 0, expected.len())?;
    if actual != expected {
        return Err(ParseError::InvalidMagic {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

fn parse_block_size(bytes: &[u8], offset: usize) -> Result<u32, ParseError> {
    let raw = read_le_i32(bytes, offset)?;
    u32::try_from(raw).map_err(|_| ParseError::InvalidField {
        field: "block_size",
        reason: "negative",
    })
}

fn encode_block_size(block_size: u32) -> Result<i32, ParseError> {
    i32::try_from(block_size).map_err(|_| ParseError::IntegerConversion {
        field: "block_size",
    })
}

/// Header of a fixed block store: `[prefix][block_size: i32]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStoreHeader {
    pub prefix: Vec<u8>,
    pub block_size: u32,
}

impl BlockStoreHeader {
    /// Encoded size for a given prefix length.
    #[must_use]
    pub fn encoded_len(prefix_len: usize) -> usize {
        prefix_len + BLOCK_SIZE_FIELD_LEN
    }

    /// Parse a header, requiring its leading bytes to equal `expected_prefix`.
    ///
    /// The block size is returned as stored; range policy belongs to the
    /// caller.
    pub fn parse_from_bytes(bytes: &[u8], expected_prefix: &[u8]) -> Result<Self, ParseError> {
        check_magic(bytes, expected_prefix)?;
        let block_size = parse_block_size(bytes, expected_prefix.len())?;
        Ok(Self {
            prefix: expected_prefix.to_vec(),
            block_size,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = vec![0_u8; Self::encoded_len(self.prefix.len())];
        out[..self.prefix.len()].copy_from_slice(&self.prefix);
        write_le_i32(&mut out, self.prefix.len(), encode_block_size(self.block_size)?)?;
        Ok(out)
    }
}

/// Header of a linked chunk store:
/// `[CHUNK_STORE_MAGIC][logical_block_size: i32][free_list_head: i64]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStoreHeader {
    pub block_size: u32,
    pub free_head: Option<BlockNumber>,
}

impl ChunkStoreHeader {
    pub const ENCODED_LEN: usize =
        CHUNK_STORE_MAGIC.len() + BLOCK_SIZE_FIELD_LEN + BLOCK_REF_FIELD_LEN;

    const BLOCK_SIZE_OFFSET: usize = CHUNK_STORE_MAGIC.len();
    const FREE_HEAD_OFFSET: usize = Self::BLOCK_SIZE_OFFSET + BLOCK_SIZE_FIELD_LEN;

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        check_magic(bytes, CHUNK_STORE_MAGIC)?;
        let block_size = parse_block_size(bytes, Self::BLOCK_SIZE_OFFSET)?;
        let free_head = decode_block_ref(read_le_i64(bytes, Self::FREE_HEAD_OFFSET)?)?;
        Ok(Self {
            block_size,
            free_head,
        })
    }

    pub fn to_bytes(&self) -> Result<[u8; Self::ENCODED_LEN], ParseError> {
        let mut out = [0_u8; Self::ENCODED_LEN];
        out[..CHUNK_STORE_MAGIC.len()].copy_from_slice(CHUNK_STORE_MAGIC);
        write_le_i32(
            &mut out,
            Self::BLOCK_SIZE_OFFSET,
            encode_block_size(self.block_size)?,
        )?;
        write_le_i64(
            &mut out,
            Self::FREE_HEAD_OFFSET,
            encode_block_ref(self.free_head)?,
        )?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_store_header_layout() {
        let header = BlockStoreHeader {
            prefix: b"ABC".to_vec(),
            block_size: 0x0102_0304,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes, [b'A', b'B', b'C', 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(BlockStoreHeader::encoded_len(3), 7);
        assert_eq!(
            BlockStoreHeader::parse_from_bytes(&bytes, b"ABC").unwrap(),
            header
        );
    }

    #[test]
    fn block_store_header_rejects_foreign_magic() {
        let bytes = [b'X', b'B', b'C', 64, 0, 0, 0];
        let err = BlockStoreHeader::parse_from_bytes(&bytes, b"ABC").unwrap_err();
        assert!(matches!(err, ParseError::InvalidMagic { .. }));
    }

    #[test]
    fn block_store_header_rejects_negative_size() {
        let bytes = [b'A', b'B', b'C', 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            BlockStoreHeader::parse_from_bytes(&bytes, b"ABC"),
            Err(ParseError::InvalidField {
                field: "block_size",
                reason: "negative",
            })
        );
    }

    #[test]
    fn block_size_must_fit_i32() {
        let header = BlockStoreHeader {
            prefix: b"ABC".to_vec(),
            block_size: u32::MAX,
        };
        assert!(matches!(
            header.to_bytes(),
            Err(ParseError::IntegerConversion { .. })
        ));
    }

    #[test]
    fn truncated_header_is_insufficient_data() {
        let err = ChunkStoreHeader::parse_from_bytes(&CHUNK_STORE_MAGIC[..3]).unwrap_err();
        assert!(matches!(err, ParseError::InsufficientData { .. }));
    }

    #[test]
    fn chunk_store_header_empty_free_list_is_minus_one() {
        let header = ChunkStoreHeader {
            block_size: 64,
            free_head: None,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(&bytes[..CHUNK_STORE_MAGIC.len()], CHUNK_STORE_MAGIC);
        assert_eq!(&bytes[CHUNK_STORE_MAGIC.len() + 4..], &[0xFF; 8]);
        assert_eq!(ChunkStoreHeader::parse_from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn chunk_store_header_keeps_free_head() {
        let header = ChunkStoreHeader {
            block_size: 4087,
            free_head: Some(BlockNumber(12)),
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(ChunkStoreHeader::parse_from_bytes(&bytes).unwrap(), header);
    }
}
