//! Exception delivery
//!
//! Instructions never unwind. They set a bit in [`Exceptions`] and the
//! controller services one pending exception per check, in fixed
//! priority order.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::state::{spr, Msr, PowerPcState};

bitflags! {
    /// Pending architectural exceptions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Exceptions: u32 {
        const DECREMENTER         = 0x0001;
        const SYSCALL             = 0x0002;
        const EXTERNAL_INT        = 0x0004;
        const DSI                 = 0x0008;
        const ISI                 = 0x0010;
        const ALIGNMENT           = 0x0020;
        const FPU_UNAVAILABLE     = 0x0040;
        const PROGRAM             = 0x0080;
        const PERFORMANCE_MONITOR = 0x0100;

        /// Raised by the instruction that just executed
        const SYNCHRONOUS = Self::ISI.bits()
            | Self::PROGRAM.bits()
            | Self::SYSCALL.bits()
            | Self::FPU_UNAVAILABLE.bits()
            | Self::DSI.bits()
            | Self::ALIGNMENT.bits();

        /// Raised by devices and timers; gated on MSR.EE
        const ASYNCHRONOUS = Self::EXTERNAL_INT.bits()
            | Self::PERFORMANCE_MONITOR.bits()
            | Self::DECREMENTER.bits();
    }
}

/// Reason bits a program exception reports in SRR1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramCause {
    FloatingPoint,
    IllegalInstruction,
    Privileged,
    Trap,
}

impl ProgramCause {
    pub fn srr1_bits(self) -> u32 {
        match self {
            ProgramCause::FloatingPoint => 0x0010_0000,
            ProgramCause::IllegalInstruction => 0x0008_0000,
            ProgramCause::Privileged => 0x0004_0000,
            ProgramCause::Trap => 0x0002_0000,
        }
    }
}

/// Exception vector offsets
pub mod vector {
    pub const DSI: u32 = 0x300;
    pub const ISI: u32 = 0x400;
    pub const EXTERNAL_INT: u32 = 0x500;
    pub const ALIGNMENT: u32 = 0x600;
    pub const PROGRAM: u32 = 0x700;
    pub const FPU_UNAVAILABLE: u32 = 0x800;
    pub const DECREMENTER: u32 = 0x900;
    pub const SYSCALL: u32 = 0xC00;
    pub const PERFORMANCE_MONITOR: u32 = 0xF00;
}

/// MSR bits preserved into SRR1
const SRR1_MSR_MASK: u32 = 0x87C0_FFFF;
/// MSR bits cleared on exception entry
const MSR_CLEAR_ON_ENTRY: u32 = 0x0004_EF36;
/// Cause bits a program exception may carry in SRR1
const PROGRAM_CAUSE_MASK: u32 = 0x001E_0000;

/// DSISR: no translation found
pub const DSISR_PAGE: u32 = 1 << 30;
/// DSISR: the access was a store
pub const DSISR_STORE: u32 = 1 << 25;

/// Where SRR0 points after an exception
#[derive(Clone, Copy)]
enum Resume {
    /// Re-execute the faulting instruction
    Pc,
    /// Continue after it
    Npc,
}

/// Synchronous exceptions in priority order
const SYNC_ORDER: [(Exceptions, u32, Resume); 6] = [
    (Exceptions::ISI, vector::ISI, Resume::Npc),
    (Exceptions::PROGRAM, vector::PROGRAM, Resume::Pc),
    (Exceptions::SYSCALL, vector::SYSCALL, Resume::Npc),
    (Exceptions::FPU_UNAVAILABLE, vector::FPU_UNAVAILABLE, Resume::Pc),
    (Exceptions::DSI, vector::DSI, Resume::Pc),
    (Exceptions::ALIGNMENT, vector::ALIGNMENT, Resume::Pc),
];

/// Asynchronous exceptions in priority order
const ASYNC_ORDER: [(Exceptions, u32); 3] = [
    (Exceptions::EXTERNAL_INT, vector::EXTERNAL_INT),
    (Exceptions::PERFORMANCE_MONITOR, vector::PERFORMANCE_MONITOR),
    (Exceptions::DECREMENTER, vector::DECREMENTER),
];

impl PowerPcState {
    /// Service the highest-priority pending exception, if any.
    ///
    /// Returns the exception that was taken.
    pub fn check_exceptions(&mut self) -> Option<Exceptions> {
        let pending = self.exceptions;
        if pending.is_empty() {
            return None;
        }

        for (bit, vector, resume) in SYNC_ORDER {
            if pending.contains(bit) {
                let srr0 = match resume {
                    Resume::Pc => self.pc,
                    Resume::Npc => self.npc,
                };
                let mut srr1 = self.msr & SRR1_MSR_MASK;
                if bit == Exceptions::ISI {
                    srr1 |= 1 << 30;
                } else if bit == Exceptions::PROGRAM {
                    // Cause bits were latched when the exception was raised
                    srr1 |= self.spr[spr::SRR1] & PROGRAM_CAUSE_MASK;
                }
                self.enter_exception(bit, vector, srr0, srr1);
                return Some(bit);
            }
        }

        self.check_external_exceptions()
    }

    /// Service the highest-priority pending asynchronous exception when MSR.EE is set
    pub fn check_external_exceptions(&mut self) -> Option<Exceptions> {
        if !self.msr_has(Msr::EE) {
            return None;
        }
        let pending = self.exceptions;
        for (bit, vector) in ASYNC_ORDER {
            if pending.contains(bit) {
                let srr1 = self.msr & SRR1_MSR_MASK;
                self.enter_exception(bit, vector, self.npc, srr1);
                return Some(bit);
            }
        }
        None
    }

    fn enter_exception(&mut self, bit: Exceptions, vector: u32, srr0: u32, srr1: u32) {
        self.spr[spr::SRR0] = srr0;
        self.spr[spr::SRR1] = srr1;

        let ile = self.msr & Msr::ILE.bits() != 0;
        self.msr = (self.msr & !Msr::LE.bits()) | if ile { Msr::LE.bits() } else { 0 };
        self.msr &= !MSR_CLEAR_ON_ENTRY;

        // Vectors relocate to 0xFFF0_0000 when MSR.IP is set
        let base = if srr1 & Msr::IP.bits() != 0 { 0xFFF0_0000 } else { 0 };
        self.pc = base | vector;
        self.npc = self.pc;
        self.exceptions.remove(bit);

        tracing::trace!(
            target: "ppc",
            "Exception {:?}: SRR0=0x{:08x} SRR1=0x{:08x} -> 0x{:08x}",
            bit,
            srr0,
            srr1,
            self.pc
        );
    }

    /// Raise a program exception with the given cause
    pub fn generate_program_exception(&mut self, cause: ProgramCause) {
        self.spr[spr::SRR1] = (self.spr[spr::SRR1] & !PROGRAM_CAUSE_MASK) | cause.srr1_bits();
        self.exceptions |= Exceptions::PROGRAM;
    }

    /// Raise a data storage exception for `addr`
    pub fn generate_dsi(&mut self, addr: u32, store: bool) {
        self.spr[spr::DSISR] = if store {
            DSISR_PAGE | DSISR_STORE
        } else {
            DSISR_PAGE
        };
        self.spr[spr::DAR] = addr;
        self.exceptions |= Exceptions::DSI;
    }

    /// Raise an instruction storage exception for a failed fetch at `addr`
    pub fn generate_isi(&mut self, addr: u32) {
        self.npc = addr;
        self.exceptions |= Exceptions::ISI;
        tracing::warn!("ISI exception at 0x{:08x}", addr);
    }

    /// Raise an alignment exception for `addr`
    pub fn generate_alignment(&mut self, addr: u32) {
        self.spr[spr::DAR] = addr;
        self.exceptions |= Exceptions::ALIGNMENT;
    }

    /// True when the last instruction raised a synchronous exception
    #[inline]
    pub fn has_synchronous_exception(&self) -> bool {
        self.exceptions.intersects(Exceptions::SYNCHRONOUS)
    }
}
