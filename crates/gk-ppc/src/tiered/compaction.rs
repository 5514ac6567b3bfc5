//! Block compaction
//!
//! Interpreter blocks are appended to one growing instruction store.
//! Compaction walks the dispatch cache, copies every block decoded since
//! the previous compaction into a fresh store and drops entries that
//! still point below the low-water mark.

use super::dispatch::DispatchCache;
use super::DecodedInstruction;
use crate::interpreter::CodeInvalidation;

/// One block in a [`BaselineReport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportBlock {
    pub address: u32,
    /// Index of the block's first instruction in `instructions`
    pub start: u32,
    pub usecount: u32,
}

/// Snapshot handed to the Baseline tier.
///
/// `blocks` ends with a sentinel `{address: 0, start: instructions.len()}`
/// so every block's length is `blocks[i + 1].start - blocks[i].start`.
#[derive(Debug, Clone, Default)]
pub struct BaselineReport {
    pub blocks: Vec<ReportBlock>,
    pub instructions: Vec<DecodedInstruction>,
    pub invalidations: Vec<CodeInvalidation>,
    /// OR of the blooms of `invalidations`
    pub invalidation_bloom: u64,
    pub generation: u64,
}

impl BaselineReport {
    /// Real blocks, without the sentinel
    pub fn block_count(&self) -> usize {
        self.blocks.len().saturating_sub(1)
    }

    /// Instructions of the `index`th block
    pub fn block_instructions(&self, index: usize) -> &[DecodedInstruction] {
        let start = self.blocks[index].start as usize;
        let end = self.blocks[index + 1].start as usize;
        &self.instructions[start..end]
    }
}

/// Result of one compaction pass
#[derive(Debug, Default)]
pub struct Compacted {
    pub store: Vec<DecodedInstruction>,
    pub blocks: Vec<ReportBlock>,
    /// Entries dropped because they pointed below the low-water mark
    pub dropped: usize,
}

/// Linearize the live interpreter blocks at or above `offset_new`.
///
/// Rewrites each surviving entry's offset to its place in the new store.
pub fn compact(cache: &mut DispatchCache, store: &[DecodedInstruction], offset_new: usize) -> Compacted {
    let mut out = Compacted::default();

    for entry in cache.entries_mut() {
        if !entry.is_interpreter() {
            continue;
        }
        let offset = entry.offset as usize;
        if offset < offset_new {
            entry.invalidate();
            out.dropped += 1;
            continue;
        }

        let len = entry.len() as usize;
        let start = out.store.len();
        out.store.extend_from_slice(&store[offset..offset + len]);
        out.blocks.push(ReportBlock {
            address: entry.guest_address(),
            start: start as u32,
            usecount: entry.usecount(),
        });
        entry.offset = start as u32;
    }

    out.blocks.push(ReportBlock {
        address: 0,
        start: out.store.len() as u32,
        usecount: 0,
    });
    out
}
