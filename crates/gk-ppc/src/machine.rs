//! The emulated machine
//!
//! One [`Machine`] owns everything a running CPU touches: registers,
//! guest memory, the event scheduler, the processor interface,
//! breakpoints and the execution core. It is driven by exactly one
//! thread at a time; see [`crate::cpu::Cpu`] for the threading surface.

use std::sync::Arc;

use gk_core::config::{CpuConfig, CpuCore};
use gk_core::CpuError;
use gk_memory::Memory;

use crate::breakpoint::BreakPoints;
use crate::cpu::CpuControl;
use crate::exceptions::Exceptions;
use crate::interpreter::{CodeInvalidation, ExecContext, Interpreter, PassResult};
use crate::processor_interface::{InterruptCause, ProcessorInterface};
use crate::state::PowerPcState;
use crate::tables;
use crate::tiered::{Tiered, TieredStats};
use crate::timing::{CoreTiming, EventType, ThreadsafeScheduler, TimedCallback};

/// Name the decrementer event is registered and saved under
pub const DECREMENTER_EVENT: &str = "DecrementerCallback";

/// Most instructions the plain interpreter runs in one pass
const INTERPRETER_PASS_LIMIT: u32 = 1024;

/// The execution core behind [`Machine::dispatch`]
#[derive(Debug)]
pub enum ExecutionCore {
    Interpreter(Interpreter),
    Tiered(Box<Tiered>),
}

/// What a dispatch pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Executed(PassResult),
    /// PC sits on an enabled breakpoint; nothing ran
    Breakpoint(u32),
}

/// Execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineStats {
    pub instructions: u64,
    pub cycles: u64,
    pub exceptions_taken: u64,
    pub tiered: Option<TieredStats>,
}

pub struct Machine {
    pub state: PowerPcState,
    pub(crate) memory: Arc<dyn Memory>,
    pub(crate) timing: CoreTiming,
    pub(crate) pi: ProcessorInterface,
    pub(crate) breakpoints: BreakPoints,
    pub(crate) core: ExecutionCore,
    decrementer: EventType,
    /// Code ranges written during the current pass
    invalidations: Vec<CodeInvalidation>,
    instructions: u64,
    exceptions_taken: u64,
}

fn decrementer_callback(machine: &mut Machine, _userdata: u64, _cycles_late: i64) {
    machine.state.exceptions |= Exceptions::DECREMENTER;
}

impl Machine {
    pub fn new(config: &CpuConfig, memory: Arc<dyn Memory>) -> Result<Self, CpuError> {
        let mut timing = CoreTiming::new();
        let decrementer = timing.register_event(DECREMENTER_EVENT, decrementer_callback);

        let core = match config.core {
            CpuCore::Interpreter => ExecutionCore::Interpreter(Interpreter::new()),
            CpuCore::Tiered => ExecutionCore::Tiered(Box::new(Tiered::new(config)?)),
        };
        tracing::info!("CPU core: {:?}", config.core);

        Ok(Self {
            state: PowerPcState::new(),
            memory,
            timing,
            pi: ProcessorInterface::new(),
            breakpoints: BreakPoints::new(),
            core,
            decrementer,
            invalidations: Vec::new(),
            instructions: 0,
            exceptions_taken: 0,
        })
    }

    /// Power-on reset. Breakpoints and registered events survive.
    pub fn reset(&mut self) {
        self.state.reset_registers();
        self.timing.reset();
        self.pi.reset();
        self.invalidations.clear();
        if let ExecutionCore::Tiered(tiered) = &mut self.core {
            tiered.clear();
        }
        self.instructions = 0;
        self.exceptions_taken = 0;
        tracing::info!("Machine reset");
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    pub fn timing(&self) -> &CoreTiming {
        &self.timing
    }

    pub fn processor_interface(&self) -> &ProcessorInterface {
        &self.pi
    }

    pub fn breakpoints(&self) -> &BreakPoints {
        &self.breakpoints
    }

    pub fn decrementer_event(&self) -> EventType {
        self.decrementer
    }

    pub fn tiered(&self) -> Option<&Tiered> {
        match &self.core {
            ExecutionCore::Tiered(tiered) => Some(tiered),
            ExecutionCore::Interpreter(_) => None,
        }
    }

    pub fn tiered_mut(&mut self) -> Option<&mut Tiered> {
        match &mut self.core {
            ExecutionCore::Tiered(tiered) => Some(tiered),
            ExecutionCore::Interpreter(_) => None,
        }
    }

    /// One dispatch pass: a block on the tiered core, a run of
    /// instructions up to the next branch on the interpreter.
    ///
    /// With `check_breakpoints`, an enabled breakpoint at PC stops the pass
    /// before anything executes.
    pub fn dispatch(&mut self, check_breakpoints: bool) -> PassOutcome {
        let pc = self.state.pc;
        if check_breakpoints && self.breakpoints.is_address_breakpoint(pc) {
            self.breakpoints.record_hit(pc);
            tracing::info!("Breakpoint hit at 0x{:08x}", pc);
            return PassOutcome::Breakpoint(pc);
        }

        let mut ctx = ExecContext {
            state: &mut self.state,
            memory: &*self.memory,
            timing: &mut self.timing,
            decrementer: self.decrementer,
            invalidations: &mut self.invalidations,
        };
        let result = match &mut self.core {
            ExecutionCore::Interpreter(interpreter) => {
                interpreter.run_block(&mut ctx, &self.breakpoints, INTERPRETER_PASS_LIMIT)
            }
            ExecutionCore::Tiered(tiered) => tiered.dispatch(&mut ctx, &self.breakpoints),
        };
        gk_core::ppc_trace!(
            "pass at 0x{:08x}: {} instructions, {} cycles",
            pc,
            result.instructions,
            result.cycles
        );

        self.finish_pass(result);
        PassOutcome::Executed(result)
    }

    /// Execute exactly one instruction, then advance the scheduler
    pub fn single_step(&mut self) -> PassResult {
        let mut ctx = ExecContext {
            state: &mut self.state,
            memory: &*self.memory,
            timing: &mut self.timing,
            decrementer: self.decrementer,
            invalidations: &mut self.invalidations,
        };
        let result = Interpreter.step(&mut ctx);
        self.finish_pass(result);
        self.advance_timing();
        result
    }

    fn finish_pass(&mut self, result: PassResult) {
        // A pass that faulted before retiring anything still costs a cycle,
        // so a fault loop keeps the scheduler moving
        self.timing.consume(result.cycles.max(1));
        self.instructions += result.instructions as u64;
        self.apply_invalidations();
        self.check_exceptions();
    }

    fn apply_invalidations(&mut self) {
        for inv in self.invalidations.drain(..) {
            if let ExecutionCore::Tiered(tiered) = &mut self.core {
                tiered.invalidate_icache(inv.address, inv.size, inv.forced);
            }
        }
    }

    /// Service one pending exception, if any
    pub fn check_exceptions(&mut self) -> Option<Exceptions> {
        let taken = self.state.check_exceptions();
        if taken.is_some() {
            self.exceptions_taken += 1;
        }
        taken
    }

    /// Fire due events and start the next timing slice
    pub fn advance_timing(&mut self) {
        self.timing.drain_threadsafe();
        while let Some((event, late)) = self.timing.pop_due() {
            let callback = self.timing.callback(event.event_type);
            callback(self, event.userdata, late);
        }
        self.timing.reset_downcount();

        if let ExecutionCore::Tiered(tiered) = &mut self.core {
            tiered.on_advance();
        }
        if self.state.check_external_exceptions().is_some() {
            self.exceptions_taken += 1;
        }
    }

    /// Execute while `control` stays Running.
    ///
    /// The pass right after entry skips the breakpoint check so execution
    /// can resume from a breakpoint.
    pub fn run_loop(&mut self, control: &CpuControl) {
        let mut check_breakpoints = false;
        while control.is_running() {
            if self.timing.downcount() <= 0 {
                self.advance_timing();
            }
            if let PassOutcome::Breakpoint(address) = self.dispatch(check_breakpoints) {
                control.break_to_stepping(address);
                return;
            }
            check_breakpoints = true;
        }
    }

    /// Run for at least `cycles` cycles on the calling thread.
    ///
    /// Returns the address of the breakpoint that stopped execution early.
    pub fn run_for(&mut self, cycles: u64) -> Option<u32> {
        let target = self.timing.ticks() + cycles;
        let mut check_breakpoints = false;
        while self.timing.ticks() < target {
            if self.timing.downcount() <= 0 {
                self.advance_timing();
            }
            if let PassOutcome::Breakpoint(address) = self.dispatch(check_breakpoints) {
                return Some(address);
            }
            check_breakpoints = true;
        }
        None
    }

    /// Raise or lower an external interrupt cause
    pub fn set_interrupt(&mut self, cause: InterruptCause, set: bool) {
        self.pi.set_interrupt(&mut self.state, cause, set);
    }

    pub fn set_interrupt_mask(&mut self, mask: InterruptCause) {
        self.pi.set_mask(&mut self.state, mask);
    }

    /// Drop cached code covering `[address, address + size)`
    pub fn invalidate_icache(&mut self, address: u32, size: u32, forced: bool) {
        if let ExecutionCore::Tiered(tiered) = &mut self.core {
            tiered.invalidate_icache(address, size, forced);
        }
    }

    /// Add a breakpoint; blocks covering it are rebuilt to stop in front of it
    pub fn add_breakpoint(&mut self, address: u32, temporary: bool) {
        self.breakpoints.add(address, temporary);
        self.invalidate_icache(address, 4, false);
    }

    pub fn remove_breakpoint(&mut self, address: u32) -> bool {
        self.breakpoints.remove(address).is_some()
    }

    pub fn set_breakpoint_enabled(&mut self, address: u32, enabled: bool) -> bool {
        let found = self.breakpoints.set_enabled(address, enabled);
        if found && enabled {
            self.invalidate_icache(address, 4, false);
        }
        found
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    pub fn register_event(&mut self, name: &'static str, callback: TimedCallback) -> EventType {
        self.timing.register_event(name, callback)
    }

    pub fn schedule_event(&mut self, delay: u64, event_type: EventType, userdata: u64) {
        self.timing.schedule_event(delay, event_type, userdata);
    }

    pub fn threadsafe_scheduler(&self) -> ThreadsafeScheduler {
        self.timing.threadsafe_scheduler()
    }

    /// Instruction word at `address`, for debuggers
    pub fn read_instruction(&self, address: u32) -> Option<u32> {
        self.memory.read_be32(address).ok()
    }

    /// Mnemonic of the instruction at `address`
    pub fn disassemble_name(&self, address: u32) -> Option<&'static str> {
        self.read_instruction(address).map(|word| tables::decode(word).name())
    }

    pub fn stats(&self) -> MachineStats {
        MachineStats {
            instructions: self.instructions,
            cycles: self.timing.ticks(),
            exceptions_taken: self.exceptions_taken,
            tiered: self.tiered().map(Tiered::stats),
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("0x{:08x}", self.state.pc))
            .field("msr", &format_args!("0x{:08x}", self.state.msr))
            .field("timing", &self.timing)
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{spr, Msr};
    use gk_memory::GuestMemory;

    fn machine(core: CpuCore) -> Machine {
        let config = CpuConfig {
            core,
            baseline: false,
            ..CpuConfig::default()
        };
        Machine::new(&config, Arc::new(GuestMemory::new())).unwrap()
    }

    fn load(m: &Machine, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            m.memory.write_be32(address + i as u32 * 4, *word).unwrap();
        }
    }

    #[test]
    fn test_decrementer_fires_through_timing() {
        let mut m = machine(CpuCore::Interpreter);
        // li r3, 100 ; mtdec r3 ; b .
        load(&m, 0x8000_0000, &[0x3860_0064, 0x7C76_03A6, 0x4800_0000]);
        load(&m, 0x900, &[0x4800_0000]);
        m.state.pc = 0x8000_0000;
        m.state.msr = Msr::EE.bits();
        m.run_for(101 * 12 + 200);
        assert_eq!(m.state.pc & 0xFFF, 0x900);
        assert_eq!(m.state.spr[spr::SRR0], 0x8000_0008);
    }

    #[test]
    fn test_external_interrupt_needs_ee() {
        let mut m = machine(CpuCore::Tiered);
        load(&m, 0x8000_0000, &[0x4800_0000]);
        m.state.pc = 0x8000_0000;
        m.set_interrupt_mask(InterruptCause::VI);
        m.set_interrupt(InterruptCause::VI, true);
        m.dispatch(true);
        assert_eq!(m.state.pc, 0x8000_0000);

        m.state.msr = Msr::EE.bits();
        m.dispatch(true);
        assert_eq!(m.state.pc, 0x500);
    }

    #[test]
    fn test_breakpoint_stops_pass() {
        let mut m = machine(CpuCore::Tiered);
        load(&m, 0x8000_0000, &[0x3863_0001, 0x3863_0001, 0x4800_0000]);
        m.state.pc = 0x8000_0000;
        m.add_breakpoint(0x8000_0004, true);
        assert_eq!(m.run_for(100), Some(0x8000_0004));
        assert_eq!(m.state.gpr[3], 1);
        // Temporary breakpoints are consumed by the hit
        assert!(m.breakpoints().is_empty());
    }

    #[test]
    fn test_disassemble_name() {
        let m = machine(CpuCore::Interpreter);
        load(&m, 0x8000_0000, &[0x3860_0005]);
        assert_eq!(m.disassemble_name(0x8000_0000), Some("addi"));
        assert_eq!(m.disassemble_name(0x4000_0000), None);
    }
}
