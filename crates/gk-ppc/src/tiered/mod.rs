//! Tiered execution core
//!
//! Guest code runs from cached interpreter blocks: runs of pre-decoded
//! instructions found through the [`DispatchCache`]. Blocks live in one
//! append-only instruction store which is periodically compacted. Each
//! compaction is offered to the Baseline worker, whose compiled blocks
//! replace interpreter blocks once they come back.

pub mod baseline;
pub mod bloom;
pub mod compaction;
pub mod dispatch;
pub mod handshake;

use std::collections::{HashMap, VecDeque};

use gk_core::config::CpuConfig;
use gk_core::CpuError;
use gk_memory::Memory;

use crate::breakpoint::BreakPoints;
use crate::decoder::Instruction;
use crate::exceptions::Exceptions;
use crate::interpreter::{execute_checked, CodeInvalidation, ExecContext, Interpreter, PassResult};
use crate::state::Msr;
use crate::tables::{self, Op, OpFlags};

pub use baseline::{Baseline, CompiledBatch, CompiledBlock};
pub use compaction::{BaselineReport, ReportBlock};
pub use dispatch::{DispatchCache, DispatchEntry, Probe};
pub use handshake::HandShake;

use bloom::{overlaps, range_bloom, LinePresence};

/// Invalidations held for one report before they collapse into a full flush
const MAX_PENDING_INVALIDATIONS: usize = 256;

/// One pre-decoded instruction in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub op: Op,
    pub inst: Instruction,
    /// Cycles of this and every earlier instruction in the block
    pub cycles: u32,
    pub uses_fpu: bool,
}

/// Counters for the tiered core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieredStats {
    pub decoded_instructions: u64,
    /// Dispatch cache misses
    pub lookups: u64,
    pub hits: u64,
    pub victim_hits: u64,
    pub extensions: u64,
    pub relocations: u64,
    pub invalidated_entries: u64,
    pub compactions: u64,
    pub handoffs: u64,
    pub compiled_installed: u64,
    pub compiled_discarded: u64,
}

/// A cached block as seen from outside the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub address: u32,
    /// Store offset, or compiled-slab index
    pub offset: u32,
    pub len: u32,
    pub usecount: u32,
    pub compiled: bool,
}

pub struct Tiered {
    cache: DispatchCache,
    store: Vec<DecodedInstruction>,
    /// Store entries below this were already handed out by a compaction
    offset_new: usize,
    compiled: Vec<Option<CompiledBlock>>,
    free_slots: Vec<u32>,
    compiled_index: HashMap<u32, u32>,
    lines: LinePresence,
    /// Invalidations not yet reported to the Baseline worker
    pending: Vec<CodeInvalidation>,
    /// Invalidation blooms per report generation, for discarding stale results
    history: VecDeque<(u64, u64)>,
    generation: u64,
    advances: u32,
    max_block: u32,
    store_capacity: usize,
    publish_interval: u32,
    baseline: Option<Baseline>,
    stats: TieredStats,
}

impl Tiered {
    pub fn new(config: &CpuConfig) -> Result<Self, CpuError> {
        tables::init();
        let baseline = if config.baseline {
            Some(Baseline::spawn()?)
        } else {
            None
        };
        Ok(Self {
            cache: DispatchCache::new(config.victim_ways),
            store: Vec::new(),
            offset_new: 0,
            compiled: Vec::new(),
            free_slots: Vec::new(),
            compiled_index: HashMap::new(),
            lines: LinePresence::default(),
            pending: Vec::new(),
            history: VecDeque::new(),
            generation: 0,
            advances: 0,
            max_block: config.max_block_instructions.max(1),
            store_capacity: config.store_capacity,
            publish_interval: config.publish_interval.max(1),
            baseline,
            stats: TieredStats::default(),
        })
    }

    pub fn stats(&self) -> TieredStats {
        self.stats
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Instructions currently held in the backing store
    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Inspect the cached block at `address` without touching the cache
    pub fn block_info(&self, address: u32) -> Option<BlockInfo> {
        let entry = self.cache.peek(address)?;
        let (len, usecount) = if entry.is_compiled() {
            let len = self.compiled_block_by_slot(entry.offset).map_or(0, CompiledBlock::len);
            (len, 0)
        } else {
            (entry.len(), entry.usecount())
        };
        Some(BlockInfo {
            address,
            offset: entry.offset,
            len,
            usecount,
            compiled: entry.is_compiled(),
        })
    }

    pub fn compiled_block(&self, address: u32) -> Option<&CompiledBlock> {
        let slot = *self.compiled_index.get(&address)?;
        self.compiled_block_by_slot(slot)
    }

    fn compiled_block_by_slot(&self, slot: u32) -> Option<&CompiledBlock> {
        self.compiled.get(slot as usize).and_then(Option::as_ref)
    }

    /// Run one block starting at PC.
    ///
    /// On return PC is the next instruction to execute, or still addresses
    /// the faulting instruction when a synchronous exception is pending.
    pub fn dispatch(&mut self, ctx: &mut ExecContext, breakpoints: &BreakPoints) -> PassResult {
        let pc = ctx.state.pc;
        // Unaligned PCs would alias the entry tag bits
        if pc == 0 || pc & 3 != 0 {
            return self.run_ad_hoc(ctx);
        }

        let index = match self.cache.find(pc) {
            Some((index, probe)) => {
                self.stats.hits += 1;
                if probe == Probe::Victim {
                    self.stats.victim_hits += 1;
                }
                index
            }
            None => {
                self.stats.lookups += 1;
                match self.lookup_block(ctx.memory, breakpoints, pc) {
                    Some(index) => index,
                    None => return self.run_ad_hoc(ctx),
                }
            }
        };

        let entry = self.cache.entry(index);
        if entry.is_compiled() {
            let slot = entry.offset;
            return self.run_compiled(ctx, slot);
        }
        self.run_interpreter_block(ctx, breakpoints, index)
    }

    /// Single instruction outside the cache
    fn run_ad_hoc(&mut self, ctx: &mut ExecContext) -> PassResult {
        let result = Interpreter.step(ctx);
        self.stats.decoded_instructions += result.instructions as u64;
        result
    }

    /// Materialize an entry for `address` after a cache miss
    fn lookup_block(&mut self, memory: &dyn Memory, breakpoints: &BreakPoints, address: u32) -> Option<usize> {
        if let Some(&slot) = self.compiled_index.get(&address) {
            if let Some(block) = self.compiled_block_by_slot(slot) {
                let entry = DispatchEntry::compiled(address, slot, block.bloom);
                return Some(self.cache.insert(entry));
            }
        }

        let offset = self.store.len();
        let len = self.decode_run(memory, breakpoints, address, self.max_block, 0, false);
        if len == 0 {
            return None;
        }
        gk_core::jit_trace!("new block 0x{:08x} ({} instructions)", address, len);
        self.lines.mark(address, len);
        Some(self.cache.insert(DispatchEntry::interpreter(address, offset as u32, len)))
    }

    /// Decode forward from `start`, appending to the store.
    ///
    /// Stops after a block-ending instruction, at `limit`, at a fetch fault,
    /// or before an enabled breakpoint (the first address is only checked
    /// when `check_first` is set). Returns the number of records appended.
    fn decode_run(
        &mut self,
        memory: &dyn Memory,
        breakpoints: &BreakPoints,
        start: u32,
        limit: u32,
        mut cycles: u32,
        check_first: bool,
    ) -> u32 {
        let mut count = 0;
        while count < limit {
            let address = start.wrapping_add(count * 4);
            if (count > 0 || check_first) && breakpoints.is_address_breakpoint(address) {
                break;
            }
            let Ok(word) = memory.fetch_instruction(address) else {
                break;
            };
            let op = tables::decode(word);
            let info = op.info();
            cycles += info.cycles;
            self.store.push(DecodedInstruction {
                op,
                inst: Instruction(word),
                cycles,
                uses_fpu: info.flags.contains(OpFlags::USE_FPU),
            });
            count += 1;
            if info.ends_block() {
                break;
            }
        }
        self.stats.decoded_instructions += count as u64;
        count
    }

    fn run_interpreter_block(
        &mut self,
        ctx: &mut ExecContext,
        breakpoints: &BreakPoints,
        index: usize,
    ) -> PassResult {
        let entry = self.cache.entry_mut(index);
        entry.bump_usecount();
        let entry = *entry;

        let offset = entry.offset as usize;
        let len = entry.len() as usize;
        let (result, completed) = execute_run(ctx, &self.store[offset..offset + len], true);

        let falls_through = completed
            && entry.len() < self.max_block
            && !self.store[offset + len - 1].op.info().ends_block()
            && ctx.state.pc == entry.guest_address().wrapping_add(entry.len() * 4);
        if falls_through {
            self.extend(ctx.memory, breakpoints, index);
        }
        result
    }

    fn run_compiled(&mut self, ctx: &mut ExecContext, slot: u32) -> PassResult {
        let Some(block) = self.compiled.get(slot as usize).and_then(Option::as_ref) else {
            debug_assert!(false, "dispatch entry points at empty compiled slot {}", slot);
            return PassResult::default();
        };
        // FP availability is checked once for the whole block
        if block.uses_fpu && !ctx.state.msr_has(Msr::FP) {
            return execute_run(ctx, &block.instructions, true).0;
        }
        execute_run(ctx, &block.instructions, false).0
    }

    /// Grow a block that fell through its last instruction.
    ///
    /// A block at the tail of the store grows in place; any other block is
    /// copied to the tail first.
    fn extend(&mut self, memory: &dyn Memory, breakpoints: &BreakPoints, index: usize) {
        let entry = *self.cache.entry(index);
        let address = entry.guest_address();
        let offset = entry.offset as usize;
        let len = entry.len();
        let end = address.wrapping_add(len * 4);
        let base_cycles = self.store[offset + len as usize - 1].cycles;

        let at_tail = offset >= self.offset_new && offset + len as usize == self.store.len();
        let new_offset = if at_tail {
            offset
        } else {
            let start = self.store.len();
            self.store.extend_from_within(offset..offset + len as usize);
            start
        };

        let added = self.decode_run(memory, breakpoints, end, self.max_block - len, base_cycles, true);
        if added == 0 {
            if !at_tail {
                self.store.truncate(new_offset);
            }
            return;
        }

        self.stats.extensions += 1;
        if !at_tail {
            self.stats.relocations += 1;
        }
        gk_core::jit_trace!(
            "extended block 0x{:08x} by {} instructions (offset {} -> {})",
            address,
            added,
            offset,
            new_offset
        );
        let entry = self.cache.entry_mut(index);
        entry.offset = new_offset as u32;
        entry.set_len(len + added);
        self.lines.mark(address, len + added);
    }

    /// Drop every cached block overlapping `[address, address + size)`
    pub fn invalidate_icache(&mut self, address: u32, size: u32, forced: bool) {
        if size == 0 {
            return;
        }
        let size = size as u64;
        if !forced && !self.lines.may_contain(address, size) {
            return;
        }

        let bloom = range_bloom(address, size);
        let compiled = &self.compiled;
        let mut dropped = 0u64;
        for entry in self.cache.entries_mut() {
            let hit = if entry.is_interpreter() {
                overlaps(entry.guest_address(), entry.len(), address, size)
            } else if entry.is_compiled() && entry.bloom() & bloom != 0 {
                let len = compiled
                    .get(entry.offset as usize)
                    .and_then(Option::as_ref)
                    .map_or(0, CompiledBlock::len);
                overlaps(entry.guest_address(), len, address, size)
            } else {
                false
            };
            if hit {
                entry.invalidate();
                dropped += 1;
            }
        }

        let stale: Vec<(u32, u32)> = self
            .compiled_index
            .iter()
            .filter_map(|(&block_address, &slot)| {
                let block = self.compiled.get(slot as usize)?.as_ref()?;
                (block.bloom & bloom != 0 && overlaps(block_address, block.len(), address, size))
                    .then_some((block_address, slot))
            })
            .collect();
        for (block_address, slot) in stale {
            self.compiled_index.remove(&block_address);
            self.free_slot(slot);
        }

        if dropped > 0 {
            gk_core::jit_trace!(
                "invalidated {} entries for 0x{:08x}+0x{:x}",
                dropped,
                address,
                size
            );
        }
        self.stats.invalidated_entries += dropped;
        self.record_invalidation(
            CodeInvalidation {
                address,
                size: size as u32,
                forced,
            },
            bloom,
        );
    }

    fn record_invalidation(&mut self, range: CodeInvalidation, bloom: u64) {
        if self.baseline.is_none() {
            return;
        }
        if self.pending.len() >= MAX_PENDING_INVALIDATIONS {
            // Collapse into one flush of everything
            self.pending.clear();
            self.pending.push(CodeInvalidation {
                address: 0,
                size: u32::MAX,
                forced: true,
            });
        } else if !self.pending.first().is_some_and(|inv| inv.size == u32::MAX) {
            self.pending.push(range);
        }
        match self.history.back_mut() {
            Some((generation, acc)) if *generation == self.generation => *acc |= bloom,
            _ => self.history.push_back((self.generation, bloom)),
        }
    }

    fn free_slot(&mut self, slot: u32) {
        if let Some(block) = self.compiled.get_mut(slot as usize) {
            if block.take().is_some() {
                self.free_slots.push(slot);
            }
        }
    }

    /// Called after every timing advance: install Baseline results, hand
    /// over a new report when due, and compact an overgrown store.
    pub fn on_advance(&mut self) {
        while let Some(batch) = self.baseline.as_ref().and_then(Baseline::try_recv) {
            self.install_batch(batch);
        }

        self.advances = self.advances.wrapping_add(1);
        if self.baseline.is_some() && self.advances % self.publish_interval == 0 && self.publish() {
            return;
        }
        if self.store.len() > self.store_capacity {
            self.compact();
        }
    }

    /// Install compiled blocks, discarding any invalidated since their report
    pub fn install_batch(&mut self, batch: CompiledBatch) {
        while self.history.front().is_some_and(|&(g, _)| g < batch.generation) {
            self.history.pop_front();
        }
        let stale = self.history.iter().fold(0u64, |acc, &(_, bloom)| acc | bloom);

        for block in batch.blocks {
            if block.is_empty() || block.bloom & stale != 0 {
                self.stats.compiled_discarded += 1;
                continue;
            }
            let address = block.address;
            self.cache.remove(address);
            if let Some(old) = self.compiled_index.remove(&address) {
                self.free_slot(old);
            }
            let slot = match self.free_slots.pop() {
                Some(slot) => {
                    self.compiled[slot as usize] = Some(block);
                    slot
                }
                None => {
                    self.compiled.push(Some(block));
                    (self.compiled.len() - 1) as u32
                }
            };
            self.compiled_index.insert(address, slot);
            self.stats.compiled_installed += 1;
        }
    }

    /// Compact the store and hand the result to the Baseline worker.
    ///
    /// Nothing is compacted when the worker has not consumed the last report.
    pub fn publish(&mut self) -> bool {
        let Some(baseline) = self.baseline.as_ref() else {
            return false;
        };
        let generation = self.generation + 1;
        let mut compacted = None;
        let published = baseline.publish(|report| {
            let out = compaction::compact(&mut self.cache, &self.store, self.offset_new);
            report.blocks.clone_from(&out.blocks);
            report.instructions.clone_from(&out.store);
            report.invalidations.clone_from(&self.pending);
            report.invalidation_bloom = self
                .pending
                .iter()
                .fold(0, |acc, inv| acc | range_bloom(inv.address, inv.size as u64));
            report.generation = generation;
            compacted = Some(out);
        });

        if let Some(out) = compacted {
            self.replace_store(out);
        }
        if published {
            gk_core::jit_debug!(
                "handed generation {} to baseline ({} invalidations)",
                generation,
                self.pending.len()
            );
            self.generation = generation;
            self.pending.clear();
            self.stats.handoffs += 1;
        }
        published
    }

    /// Compact the store without a handoff. Returns the number of live blocks.
    pub fn compact(&mut self) -> usize {
        let out = compaction::compact(&mut self.cache, &self.store, self.offset_new);
        let blocks = out.blocks.len() - 1;
        self.replace_store(out);
        blocks
    }

    fn replace_store(&mut self, out: compaction::Compacted) {
        gk_core::jit_debug!(
            "compacted store {} -> {} instructions, {} blocks kept, {} dropped",
            self.store.len(),
            out.store.len(),
            out.blocks.len() - 1,
            out.dropped
        );
        self.store = out.store;
        self.offset_new = self.store.len();
        self.stats.compactions += 1;
    }

    /// Forget every cached and compiled block
    pub fn clear(&mut self) {
        self.cache.clear();
        self.store.clear();
        self.offset_new = 0;
        self.compiled.clear();
        self.free_slots.clear();
        self.compiled_index.clear();
        self.lines.clear();
        // Results already in flight must not be installed
        self.record_invalidation(
            CodeInvalidation {
                address: 0,
                size: u32::MAX,
                forced: true,
            },
            u64::MAX,
        );
    }
}

impl std::fmt::Debug for Tiered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tiered")
            .field("store_len", &self.store.len())
            .field("offset_new", &self.offset_new)
            .field("compiled", &self.compiled_index.len())
            .field("generation", &self.generation)
            .field("baseline", &self.baseline)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Execute a run of pre-decoded instructions.
///
/// Returns the pass result and whether every instruction retired.
fn execute_run(
    ctx: &mut ExecContext,
    instructions: &[DecodedInstruction],
    check_fpu: bool,
) -> (PassResult, bool) {
    for (i, record) in instructions.iter().enumerate() {
        ctx.state.npc = ctx.state.pc.wrapping_add(4);
        execute_checked(ctx, record.op, record.inst, check_fpu);
        if ctx.state.has_synchronous_exception() {
            // The prefix sum makes the early-exit charge a single lookup
            let cycles = if ctx.state.exceptions.contains(Exceptions::FPU_UNAVAILABLE) {
                record.cycles - record.op.info().cycles
            } else {
                record.cycles
            };
            let result = PassResult {
                instructions: i as u32 + 1,
                cycles,
            };
            return (result, false);
        }
        ctx.state.pc = ctx.state.npc;
    }
    let result = PassResult {
        instructions: instructions.len() as u32,
        cycles: instructions.last().map_or(0, |r| r.cycles),
    };
    (result, true)
}
