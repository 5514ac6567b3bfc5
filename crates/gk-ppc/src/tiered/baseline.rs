//! Baseline tier
//!
//! A worker thread that turns the interpreter blocks of each
//! [`BaselineReport`] into [`CompiledBlock`]s. Compiled blocks carry their
//! whole instruction run with the FPU check hoisted to block entry.
//! Results travel back to the CPU thread over a bounded channel and are
//! installed between dispatch passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use gk_core::CpuError;

use super::bloom::{self, overlaps};
use super::compaction::BaselineReport;
use super::handshake::HandShake;
use super::DecodedInstruction;

/// Batches the CPU thread has not yet drained
const RESULT_QUEUE_DEPTH: usize = 8;

/// A block produced by the Baseline tier
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    pub address: u32,
    pub instructions: Vec<DecodedInstruction>,
    /// Total cycle cost of the block
    pub cycles: u32,
    /// Any instruction needs MSR.FP
    pub uses_fpu: bool,
    /// Last instruction ends the block (branch, rfi and so on)
    pub ends_block: bool,
    pub bloom: u64,
    /// Generation of the report this block was built from
    pub generation: u64,
}

impl CompiledBlock {
    pub fn compile(address: u32, instructions: &[DecodedInstruction], generation: u64) -> Self {
        let len = instructions.len() as u32;
        Self {
            address,
            instructions: instructions.to_vec(),
            cycles: instructions.last().map_or(0, |d| d.cycles),
            uses_fpu: instructions.iter().any(|d| d.uses_fpu),
            ends_block: instructions.last().is_some_and(|d| d.op.info().ends_block()),
            bloom: bloom::block_bloom(address, len),
            generation,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.instructions.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Blocks compiled from one report
#[derive(Debug)]
pub struct CompiledBatch {
    pub generation: u64,
    pub blocks: Vec<CompiledBlock>,
}

/// Worker-side bookkeeping: what has already been compiled, by address
#[derive(Debug, Default)]
struct Compiler {
    known: HashMap<u32, u32>,
}

impl Compiler {
    fn process(&mut self, report: &BaselineReport) -> CompiledBatch {
        if !report.invalidations.is_empty() {
            let before = self.known.len();
            self.known.retain(|&address, &mut len| {
                bloom::block_bloom(address, len) & report.invalidation_bloom == 0
                    || !report
                        .invalidations
                        .iter()
                        .any(|inv| inv.size != 0 && overlaps(address, len, inv.address, inv.size as u64))
            });
            gk_core::jit_debug!(
                "baseline evicted {} blocks for {} invalidations",
                before - self.known.len(),
                report.invalidations.len()
            );
        }

        let mut blocks = Vec::new();
        for index in 0..report.block_count() {
            let address = report.blocks[index].address;
            let instructions = report.block_instructions(index);
            if instructions.is_empty() {
                continue;
            }
            let len = instructions.len() as u32;
            if self.known.get(&address) == Some(&len) {
                continue;
            }
            self.known.insert(address, len);
            blocks.push(CompiledBlock::compile(address, instructions, report.generation));
        }

        CompiledBatch {
            generation: report.generation,
            blocks,
        }
    }
}

/// Handle to the Baseline worker thread
pub struct Baseline {
    handshake: Arc<HandShake<BaselineReport>>,
    results: Receiver<CompiledBatch>,
    worker: Option<JoinHandle<()>>,
}

impl Baseline {
    pub fn spawn() -> Result<Self, CpuError> {
        let handshake = Arc::new(HandShake::new());
        let (tx, results) = channel::bounded(RESULT_QUEUE_DEPTH);

        let worker = {
            let handshake = Arc::clone(&handshake);
            thread::Builder::new()
                .name("baseline".to_string())
                .spawn(move || worker_loop(&handshake, &tx))
                .map_err(|e| CpuError::ThreadSpawn(e.to_string()))?
        };

        tracing::info!("Baseline tier started");
        Ok(Self {
            handshake,
            results,
            worker: Some(worker),
        })
    }

    /// Hand a report to the worker without blocking
    pub fn publish(&self, fill: impl FnOnce(&mut BaselineReport)) -> bool {
        self.handshake.try_yield(fill)
    }

    /// Next finished batch, if any
    pub fn try_recv(&self) -> Option<CompiledBatch> {
        match self.results.try_recv() {
            Ok(batch) => Some(batch),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("Baseline worker exited unexpectedly");
                None
            }
        }
    }
}

impl std::fmt::Debug for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Baseline")
            .field("pending_batches", &self.results.len())
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl Drop for Baseline {
    fn drop(&mut self) {
        self.handshake.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Baseline worker panicked");
            }
        }
    }
}

fn worker_loop(handshake: &HandShake<BaselineReport>, tx: &Sender<CompiledBatch>) {
    let mut compiler = Compiler::default();
    while let Some(report) = handshake.wait() {
        let batch = compiler.process(&report);
        drop(report);

        gk_core::jit_debug!(
            "baseline generation {}: {} blocks compiled",
            batch.generation,
            batch.blocks.len()
        );
        match tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                // The CPU thread is behind; these blocks will be reported again
                gk_core::jit_debug!("dropping baseline generation {}", batch.generation);
                for block in &batch.blocks {
                    compiler.known.remove(&block.address);
                }
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    gk_core::jit_debug!("baseline worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Instruction;
    use crate::interpreter::CodeInvalidation;
    use crate::tables;
    use crate::tiered::compaction::ReportBlock;
    use std::time::Duration;

    fn record(word: u32, cycles: u32) -> DecodedInstruction {
        let op = tables::decode(word);
        DecodedInstruction {
            op,
            inst: Instruction(word),
            cycles,
            uses_fpu: op.info().flags.contains(tables::OpFlags::USE_FPU),
        }
    }

    fn report(generation: u64) -> BaselineReport {
        BaselineReport {
            blocks: vec![
                ReportBlock { address: 0x8000_0000, start: 0, usecount: 4 },
                ReportBlock { address: 0x8000_0100, start: 2, usecount: 1 },
                ReportBlock { address: 0, start: 4, usecount: 0 },
            ],
            instructions: vec![
                // addi r3, r0, 1 ; blr
                record(0x3860_0001, 1),
                record(0x4E80_0020, 2),
                // fadd f1, f2, f3 ; fadd f1, f2, f3
                record(0xFC22_182A, 1),
                record(0xFC22_182A, 2),
            ],
            generation,
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_block_summary() {
        let r = report(1);
        let block = CompiledBlock::compile(0x8000_0000, r.block_instructions(0), 1);
        assert_eq!(block.len(), 2);
        assert_eq!(block.cycles, 2);
        assert!(block.ends_block);
        assert!(!block.uses_fpu);

        let fp = CompiledBlock::compile(0x8000_0100, r.block_instructions(1), 1);
        assert!(fp.uses_fpu);
        assert!(!fp.ends_block);
    }

    #[test]
    fn test_compiler_skips_known_blocks() {
        let mut compiler = Compiler::default();
        assert_eq!(compiler.process(&report(1)).blocks.len(), 2);
        assert!(compiler.process(&report(2)).blocks.is_empty());

        let mut invalidated = report(3);
        invalidated.invalidations.push(CodeInvalidation {
            address: 0x8000_0104,
            size: 4,
            forced: false,
        });
        invalidated.invalidation_bloom = bloom::range_bloom(0x8000_0104, 4);
        let batch = compiler.process(&invalidated);
        assert_eq!(batch.blocks.len(), 1);
        assert_eq!(batch.blocks[0].address, 0x8000_0100);
        assert_eq!(batch.generation, 3);
    }

    #[test]
    fn test_worker_round_trip() {
        let baseline = Baseline::spawn().unwrap();
        assert!(baseline.publish(|r| *r = report(5)));

        let batch = baseline
            .results
            .recv_timeout(Duration::from_secs(5))
            .expect("worker produced a batch");
        assert_eq!(batch.generation, 5);
        assert_eq!(batch.blocks.len(), 2);
    }
}
