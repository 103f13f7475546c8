//! Structural verification and manifest-driven recovery.
//!
//! A check scans every physical block once and proves the three occupancy
//! invariants of a chunk store:
//!
//! - every block is either on the free list, the head of exactly one chunk,
//!   or a body block of exactly one chunk;
//! - the free list has no cycle and holds only `Free` blocks;
//! - every chain is `Head`, then `Body`..., terminated by a null `next`.
//!
//! Each chunk is additionally decoded in full, so payload-level damage (a
//! negative length, a chain shorter than its declared length) also fails the
//! check.
//!
//! With a [`ChunkManifest`] the discovered chunks are reconciled against what
//! the caller still references. A manifest entry without a chunk is always
//! fatal. A chunk without a manifest entry is fatal in strict mode, and
//! released in non-strict mode, highest head block first.

use crate::{LinkedChunkStore, corrupt};
use lks_block::ByteStream;
use lks_error::{LksError, Result};
use lks_ondisk::BlockLink;
use lks_types::{BlockKind, BlockNumber, ChunkHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Chunks the caller still references, each with a human-readable label
/// (e.g. the key of the tree node that owns it).
pub type ChunkManifest = BTreeMap<ChunkHandle, String>;

/// Summary of a structural check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    /// Physical blocks scanned.
    pub blocks_scanned: u64,
    /// Blocks on the free list.
    pub free_blocks: u64,
    /// Live chunks.
    pub chunks: u64,
    /// Body blocks across all live chunks.
    pub body_blocks: u64,
    /// Unreferenced chunks returned to the free list, in release order.
    pub released: Vec<ChunkHandle>,
}

impl StructureReport {
    /// True if recovery did not have to release anything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.released.is_empty()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for StructureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} blocks: {} chunks, {} body blocks, {} free, {} released",
            self.blocks_scanned,
            self.chunks,
            self.body_blocks,
            self.free_blocks,
            self.released.len(),
        )
    }
}

fn index_of(block: BlockNumber) -> Result<usize> {
    usize::try_from(block.0)
        .map_err(|_| LksError::Bounds(format!("block {block} does not fit usize")))
}

impl<S: ByteStream> LinkedChunkStore<S> {
    /// Read-only check. Any chunk missing from `manifest` is an error.
    pub fn verify(&self, manifest: Option<&ChunkManifest>) -> Result<StructureReport> {
        self.check_structure(manifest, true)
            .map(|(report, _unreferenced)| report)
    }

    /// Check the structure and, unless `strict`, release chunks that
    /// `manifest` does not reference.
    pub fn recover(
        &mut self,
        manifest: Option<&ChunkManifest>,
        strict: bool,
    ) -> Result<StructureReport> {
        let (mut report, unreferenced) = self.check_structure(manifest, strict)?;
        for handle in unreferenced {
            let freed = self.release(handle)?;
            info!(
                target: "lks::recovery",
                event = "orphan_chunk_release",
                head = handle.0,
                blocks = freed
            );
            report.chunks -= 1;
            report.body_blocks -= freed - 1;
            report.free_blocks += freed;
            report.released.push(handle);
        }
        Ok(report)
    }

    /// Full scan. Returns the report and the unreferenced chunks in
    /// descending head order (empty when `strict` or without a manifest).
    fn check_structure(
        &self,
        manifest: Option<&ChunkManifest>,
        strict: bool,
    ) -> Result<(StructureReport, Vec<ChunkHandle>)> {
        let end = self.blocks.next_block_number()?;
        let count = index_of(end)?;
        let mut report = StructureReport {
            blocks_scanned: end.0,
            ..StructureReport::default()
        };

        // Link metadata of every block, indexed by block number.
        let mut links: Vec<BlockLink> = Vec::with_capacity(count);
        for n in 0..end.0 {
            let block = BlockNumber(n);
            let link = self.read_link(block)?;
            if let Some(next) = link.next {
                Self::follow(block, next, end)?;
            }
            links.push(link);
        }
        debug!(target: "lks::recovery", event = "recover_scan", blocks = end.0);

        let mut visited = vec![false; count];

        let mut cursor = self.header.free_head();
        let mut prev: Option<BlockNumber> = None;
        while let Some(block) = cursor {
            if block >= end {
                return Err(corrupt(
                    prev.unwrap_or(block),
                    format!("free list points past the last block: {block}"),
                ));
            }
            let idx = index_of(block)?;
            if visited[idx] {
                return Err(corrupt(block, "free list contains a cycle"));
            }
            if links[idx].kind != BlockKind::Free {
                return Err(corrupt(
                    block,
                    format!("free list entry flagged {}", links[idx].kind),
                ));
            }
            visited[idx] = true;
            report.free_blocks += 1;
            prev = Some(block);
            cursor = links[idx].next;
        }

        let mut known = BTreeSet::new();
        for idx in 0..count {
            if links[idx].kind != BlockKind::Head || visited[idx] {
                continue;
            }
            visited[idx] = true;
            let head = BlockNumber(idx as u64);
            let mut cursor = links[idx].next;
            while let Some(block) = cursor {
                let next_idx = index_of(block)?;
                if visited[next_idx] {
                    return Err(corrupt(
                        block,
                        format!("block is linked from chunk {head} but already owned elsewhere"),
                    ));
                }
                if links[next_idx].kind != BlockKind::Body {
                    return Err(corrupt(
                        block,
                        format!(
                            "chunk {head}: expected a body block, found {}",
                            links[next_idx].kind
                        ),
                    ));
                }
                visited[next_idx] = true;
                report.body_blocks += 1;
                cursor = links[next_idx].next;
            }

            let handle = ChunkHandle::from(head);
            self.get(handle)?;
            known.insert(handle);
        }
        report.chunks = known.len() as u64;

        if let Some(orphan) = visited.iter().position(|seen| !seen) {
            return Err(corrupt(
                BlockNumber(orphan as u64),
                format!(
                    "orphan block flagged {}: neither on the free list nor owned by a chunk",
                    links[orphan].kind
                ),
            ));
        }

        let Some(manifest) = manifest else {
            return Ok((report, Vec::new()));
        };

        for (handle, label) in manifest {
            if !known.contains(handle) {
                return Err(corrupt(
                    handle.head(),
                    format!("manifest entry '{label}' references missing chunk {handle}"),
                ));
            }
        }

        let mut unreferenced = Vec::new();
        for handle in known.iter().rev() {
            if manifest.contains_key(handle) {
                continue;
            }
            if strict {
                return Err(corrupt(
                    handle.head(),
                    format!("chunk {handle} is not referenced by the manifest"),
                ));
            }
            unreferenced.push(*handle);
        }
        Ok((report, unreferenced))
    }
}
