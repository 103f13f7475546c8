#![forbid(unsafe_code)]
//! On-disk layouts for linkstore.
//!
//! Pure encode/decode crate: no I/O, no side effects. Turns byte slices into
//! typed headers and per-block link metadata and back.
//!
//! ```text
//! chunk store header   [magic][logical_block_size: i32][free_list_head: i64]
//! block store header   [magic][block_size: i32]
//! block n              [kind: u8][next: i64][payload: logical_block_size]
//! head block payload   [chunk_length: i32][first segment ...]
//! ```

pub mod header;
pub mod link;

pub use header::{BLOCK_STORE_MAGIC, BlockStoreHeader, CHUNK_STORE_MAGIC, ChunkStoreHeader};
pub use link::{
    BlockLink, decode_block_ref, encode_block_ref, parse_chunk_len, write_chunk_len,
};
