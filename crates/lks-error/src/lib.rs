#![forbid(unsafe_code)]
//! Error types for linkstore.
//!
//! # Error Taxonomy
//!
//! linkstore uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Codec | `ParseError` | `lks-types` | Byte-level layout violations (short buffers, bad magic, invalid fields) |
//! | Runtime | `LksError` | `lks-error` (this crate) | Errors returned by the block and chunk stores |
//!
//! `lks-error` does not depend on `lks-types`. The conversion from
//! `ParseError` happens where the context is known:
//!
//! | Where the `ParseError` surfaces | `LksError` variant |
//! |---------------------------------|--------------------|
//! | Decoding a store header on `open` | `Format(detail)` |
//! | Decoding link metadata or a chunk length from a live block | `Corruption { block, detail }` |
//! | Encoding into a caller-sized buffer | `Bounds(detail)` |
//!
//! ## Usage errors vs corruption
//!
//! `Config`, `Format` and `Bounds` are caller-side problems: wrong
//! parameters, the wrong kind of file, an out-of-range block number. They say
//! nothing about the health of the persisted structure.
//!
//! `Corruption` means the persisted structure itself is inconsistent: a block
//! flagged `Free` inside a chunk chain, a cycle on the free list, a block owned
//! by nobody, a manifest entry with no chunk behind it. The only operation
//! that repairs anything is the explicit, caller-invoked chunk store
//! `recover`, and only for unreferenced chunks.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `Corruption` | `EIO` |
//! | `Config` | `EINVAL` |
//! | `Format` | `EINVAL` |
//! | `Bounds` | `ERANGE` |

use thiserror::Error;

/// Unified error type for all linkstore operations.
#[derive(Debug, Error)]
pub enum LksError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid construction parameters (header prefix too short, block size
    /// below the minimum or too large for the on-disk field).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The region does not hold a store of the expected kind (magic mismatch,
    /// unreadable header).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Caller asked for a block or byte range outside what the store allows.
    #[error("out of bounds: {0}")]
    Bounds(String),

    /// Persisted structure is inconsistent at a known block.
    #[error("corrupt structure at block {block}: {detail}")]
    Corruption { block: u64, detail: String },
}

impl LksError {
    /// Shorthand for building a [`LksError::Corruption`].
    pub fn corruption(block: u64, detail: impl Into<String>) -> Self {
        Self::Corruption {
            block,
            detail: detail.into(),
        }
    }

    /// True when the error signals an inconsistent on-disk structure rather
    /// than a usage or environment problem.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; a new variant does not compile until it has
    /// an errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Config(_) | Self::Format(_) => libc::EINVAL,
            Self::Bounds(_) => libc::ERANGE,
        }
    }
}

/// Result alias using `LksError`.
pub type Result<T> = std::result::Result<T, LksError>;
