//! PowerPC interpreter
//!
//! Executes one decoded instruction against the register state. Nothing
//! here returns an error: faults set a bit in the Exceptions mask and
//! the caller services it after the instruction retires.

mod branch;
mod float;
mod integer;
mod load_store;
mod paired;
mod system;

use gk_memory::Memory;

use crate::breakpoint::BreakPoints;
use crate::decoder::Instruction;
use crate::exceptions::{Exceptions, ProgramCause};
use crate::state::{Msr, PowerPcState};
use crate::tables::{self, Op, OpFlags, OpType};
use crate::timing::{CoreTiming, EventType};

pub use system::{read_decrementer, read_time_base};

/// A request to drop cached code covering `[address, address + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInvalidation {
    pub address: u32,
    pub size: u32,
    /// Skip the line-presence shortcut
    pub forced: bool,
}

/// Everything an instruction may touch
pub struct ExecContext<'a> {
    pub state: &'a mut PowerPcState,
    pub memory: &'a dyn Memory,
    pub timing: &'a mut CoreTiming,
    pub decrementer: EventType,
    /// Code ranges written by icbi and data cache flushes, applied after the pass
    pub invalidations: &'a mut Vec<CodeInvalidation>,
}

impl ExecContext<'_> {
    pub(crate) fn read_u8(&mut self, ea: u32) -> Option<u8> {
        let result = self.memory.read_u8(ea);
        self.check_read(ea, result)
    }

    pub(crate) fn read_u16(&mut self, ea: u32) -> Option<u16> {
        let result = self.memory.read_be16(ea);
        self.check_read(ea, result)
    }

    pub(crate) fn read_u32(&mut self, ea: u32) -> Option<u32> {
        let result = self.memory.read_be32(ea);
        self.check_read(ea, result)
    }

    pub(crate) fn read_u64(&mut self, ea: u32) -> Option<u64> {
        let result = self.memory.read_be64(ea);
        self.check_read(ea, result)
    }

    pub(crate) fn write_u8(&mut self, ea: u32, value: u8) -> bool {
        let result = self.memory.write_u8(ea, value);
        self.check_write(ea, result)
    }

    pub(crate) fn write_u16(&mut self, ea: u32, value: u16) -> bool {
        let result = self.memory.write_be16(ea, value);
        self.check_write(ea, result)
    }

    pub(crate) fn write_u32(&mut self, ea: u32, value: u32) -> bool {
        let result = self.memory.write_be32(ea, value);
        self.check_write(ea, result)
    }

    pub(crate) fn write_u64(&mut self, ea: u32, value: u64) -> bool {
        let result = self.memory.write_be64(ea, value);
        self.check_write(ea, result)
    }

    pub(crate) fn write_bytes(&mut self, ea: u32, data: &[u8]) -> bool {
        let result = self.memory.write_bytes(ea, data);
        self.check_write(ea, result)
    }

    /// Check a whole store range up front, raising DSI at the first bad word
    pub(crate) fn probe_words(&mut self, ea: u32, count: u32) -> bool {
        let bad = (0..count)
            .map(|i| ea.wrapping_add(i * 4))
            .find(|&addr| !self.memory.is_writable(addr, 4));
        match bad {
            Some(addr) => {
                tracing::warn!("Invalid write to 0x{:08x} at PC 0x{:08x}", addr, self.state.pc);
                self.state.generate_dsi(addr, true);
                false
            }
            None => true,
        }
    }

    pub(crate) fn invalidate_code(&mut self, address: u32, size: u32, forced: bool) {
        self.invalidations.push(CodeInvalidation {
            address,
            size,
            forced,
        });
    }

    fn check_read<T>(&mut self, ea: u32, result: Result<T, gk_memory::MemoryError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Invalid read from 0x{:08x} at PC 0x{:08x}: {}", ea, self.state.pc, e);
                self.state.generate_dsi(ea, false);
                None
            }
        }
    }

    fn check_write(&mut self, ea: u32, result: Result<(), gk_memory::MemoryError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Invalid write to 0x{:08x} at PC 0x{:08x}: {}", ea, self.state.pc, e);
                self.state.generate_dsi(ea, true);
                false
            }
        }
    }
}

/// Apply the precondition checks every instruction is subject to, then execute.
///
/// `check_fpu` is false only when the caller already proved MSR.FP is set.
/// Returns false when a precondition failed and the instruction did not run.
pub fn execute_checked(ctx: &mut ExecContext, op: Op, inst: Instruction, check_fpu: bool) -> bool {
    let flags = op.info().flags;
    if check_fpu && flags.contains(OpFlags::USE_FPU) && !ctx.state.msr_has(Msr::FP) {
        ctx.state.exceptions |= Exceptions::FPU_UNAVAILABLE;
        return false;
    }
    if flags.contains(OpFlags::PRIVILEGED) && ctx.state.msr_has(Msr::PR) {
        ctx.state.generate_program_exception(ProgramCause::Privileged);
        return false;
    }
    execute(ctx, op, inst);
    true
}

/// Execute one instruction with no precondition checks
pub fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    match op.info().kind {
        OpType::Integer | OpType::Compare => integer::execute(ctx, op, inst),
        OpType::Branch | OpType::ConditionRegister => branch::execute(ctx, op, inst),
        OpType::Load | OpType::Store => load_store::execute(ctx, op, inst),
        OpType::LoadFp | OpType::StoreFp | OpType::SingleFp | OpType::DoubleFp => {
            float::execute(ctx, op, inst)
        }
        OpType::PairedSingle | OpType::LoadPs | OpType::StorePs => paired::execute(ctx, op, inst),
        OpType::System | OpType::Spr | OpType::DataCache | OpType::InstructionCache => {
            system::execute(ctx, op, inst)
        }
        OpType::Unknown => {
            tracing::warn!(
                "Illegal instruction 0x{:08x} at 0x{:08x}",
                inst.0,
                ctx.state.pc
            );
            ctx.state.generate_program_exception(ProgramCause::IllegalInstruction);
        }
    }
}

/// Cycles an instruction is charged once it has been attempted
#[inline]
pub fn charged_cycles(state: &PowerPcState, op: Op) -> u32 {
    if state.exceptions.contains(Exceptions::FPU_UNAVAILABLE) {
        0
    } else {
        op.info().cycles
    }
}

/// The uncached execution core: fetches and decodes every instruction it runs
#[derive(Debug, Default)]
pub struct Interpreter;

/// Result of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassResult {
    pub instructions: u32,
    pub cycles: u32,
}

impl Interpreter {
    pub fn new() -> Self {
        tables::init();
        Self
    }

    /// Fetch, decode and execute the instruction at PC.
    ///
    /// On return PC has advanced to NPC unless a synchronous exception is
    /// pending, in which case PC still addresses the faulting instruction.
    pub fn step(&self, ctx: &mut ExecContext) -> PassResult {
        let pc = ctx.state.pc;
        let word = match ctx.memory.fetch_instruction(pc) {
            Ok(word) => word,
            Err(_) => {
                ctx.state.generate_isi(pc);
                return PassResult::default();
            }
        };
        let op = tables::decode(word);
        ctx.state.npc = pc.wrapping_add(4);
        execute_checked(ctx, op, Instruction(word), true);
        let cycles = charged_cycles(ctx.state, op);
        if !ctx.state.has_synchronous_exception() {
            ctx.state.pc = ctx.state.npc;
        }
        PassResult {
            instructions: 1,
            cycles,
        }
    }

    /// Run instructions until a block-ending instruction, a synchronous
    /// exception, a breakpoint, the end of the timing slice, or `limit`.
    pub fn run_block(&self, ctx: &mut ExecContext, breakpoints: &BreakPoints, limit: u32) -> PassResult {
        let mut result = PassResult::default();
        let budget = ctx.timing.downcount();
        loop {
            let pc = ctx.state.pc;
            let word = match ctx.memory.fetch_instruction(pc) {
                Ok(word) => word,
                Err(_) => {
                    ctx.state.generate_isi(pc);
                    break;
                }
            };
            let op = tables::decode(word);
            ctx.state.npc = pc.wrapping_add(4);
            execute_checked(ctx, op, Instruction(word), true);
            result.instructions += 1;
            result.cycles += charged_cycles(ctx.state, op);

            if ctx.state.has_synchronous_exception() {
                break;
            }
            ctx.state.pc = ctx.state.npc;

            if op.info().ends_block()
                || result.instructions >= limit
                || result.cycles as i64 >= budget
                || breakpoints.is_address_breakpoint(ctx.state.pc)
            {
                break;
            }
        }
        result
    }
}

/// (rA|0): register A, or zero when rA is r0
#[inline]
pub(crate) fn ra_or_zero(state: &PowerPcState, inst: Instruction) -> u32 {
    match inst.ra() {
        0 => 0,
        ra => state.gpr[ra],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_memory::GuestMemory;

    struct Harness {
        state: PowerPcState,
        memory: GuestMemory,
        timing: CoreTiming,
        decrementer: EventType,
        invalidations: Vec<CodeInvalidation>,
    }

    fn noop(_: &mut crate::machine::Machine, _: u64, _: i64) {}

    impl Harness {
        fn new() -> Self {
            let mut timing = CoreTiming::new();
            let decrementer = timing.register_event("DecrementerCallback", noop);
            Self {
                state: PowerPcState::new(),
                memory: GuestMemory::new(),
                timing,
                decrementer,
                invalidations: Vec::new(),
            }
        }

        fn run(&mut self, word: u32) -> bool {
            let mut ctx = ExecContext {
                state: &mut self.state,
                memory: &self.memory,
                timing: &mut self.timing,
                decrementer: self.decrementer,
                invalidations: &mut self.invalidations,
            };
            let op = tables::decode(word);
            ctx.state.npc = ctx.state.pc.wrapping_add(4);
            execute_checked(&mut ctx, op, Instruction(word), true)
        }
    }

    #[test]
    fn test_fpu_unavailable_skips_instruction() {
        let mut h = Harness::new();
        h.state.ps[2].set_ps0(1.0);
        h.state.ps[3].set_ps0(2.0);
        // fadd f1, f2, f3
        let ran = h.run((63 << 26) | (1 << 21) | (2 << 16) | (3 << 11) | (21 << 1));
        assert!(!ran);
        assert_eq!(h.state.exceptions, Exceptions::FPU_UNAVAILABLE);
        assert_eq!(h.state.ps[1].ps0, 0);
        assert_eq!(charged_cycles(&h.state, Op::Fadd), 0);
    }

    #[test]
    fn test_privileged_in_user_mode() {
        let mut h = Harness::new();
        h.state.msr = Msr::PR.bits();
        // mfmsr r3
        assert!(!h.run(0x7C6000A6));
        assert!(h.state.exceptions.contains(Exceptions::PROGRAM));
        assert_eq!(h.state.gpr[3], 0);
    }

    #[test]
    fn test_unknown_is_illegal() {
        let mut h = Harness::new();
        h.run(0);
        assert!(h.state.exceptions.contains(Exceptions::PROGRAM));
        assert_eq!(
            h.state.spr[crate::state::spr::SRR1] & 0x001E_0000,
            ProgramCause::IllegalInstruction.srr1_bits()
        );
    }

    #[test]
    fn test_step_fetch_fault_raises_isi() {
        let mut h = Harness::new();
        h.state.pc = 0x4000_0000;
        let interpreter = Interpreter::new();
        let mut ctx = ExecContext {
            state: &mut h.state,
            memory: &h.memory,
            timing: &mut h.timing,
            decrementer: h.decrementer,
            invalidations: &mut h.invalidations,
        };
        let result = interpreter.step(&mut ctx);
        assert_eq!(result.instructions, 0);
        assert!(h.state.exceptions.contains(Exceptions::ISI));
        assert_eq!(h.state.npc, 0x4000_0000);
    }

    #[test]
    fn test_run_block_stops_at_branch() {
        let mut h = Harness::new();
        h.state.pc = 0x8000_0000;
        // addi r3, 0, 1 ; addi r3, r3, 1 ; b +0x10 ; addi r3, r3, 100
        for (i, word) in [0x3860_0001u32, 0x3863_0001, 0x4800_0010, 0x3863_0064]
            .iter()
            .enumerate()
        {
            h.memory.write_be32(0x8000_0000 + i as u32 * 4, *word).unwrap();
        }
        let interpreter = Interpreter::new();
        let breakpoints = BreakPoints::new();
        let mut ctx = ExecContext {
            state: &mut h.state,
            memory: &h.memory,
            timing: &mut h.timing,
            decrementer: h.decrementer,
            invalidations: &mut h.invalidations,
        };
        let result = interpreter.run_block(&mut ctx, &breakpoints, 1024);
        assert_eq!(result.instructions, 3);
        assert_eq!(h.state.gpr[3], 2);
        assert_eq!(h.state.pc, 0x8000_0018);
    }

    #[test]
    fn test_run_block_stops_before_breakpoint() {
        let mut h = Harness::new();
        h.state.pc = 0x8000_0000;
        for i in 0..4 {
            h.memory.write_be32(0x8000_0000 + i * 4, 0x3863_0001).unwrap();
        }
        let interpreter = Interpreter::new();
        let mut breakpoints = BreakPoints::new();
        breakpoints.add(0x8000_0008, false);
        let mut ctx = ExecContext {
            state: &mut h.state,
            memory: &h.memory,
            timing: &mut h.timing,
            decrementer: h.decrementer,
            invalidations: &mut h.invalidations,
        };
        let result = interpreter.run_block(&mut ctx, &breakpoints, 1024);
        assert_eq!(result.instructions, 2);
        assert_eq!(h.state.pc, 0x8000_0008);
    }
}
