//! Gekko/Broadway PowerPC CPU core for gekko
//!
//! This crate implements the GameCube/Wii CPU: a 32-bit PowerPC 750 with
//! paired-single floating point. Two execution cores share the same
//! instruction semantics: a plain interpreter and a tiered core that
//! caches decoded blocks and feeds them to a Baseline worker thread.

pub mod breakpoint;
pub mod cpu;
pub mod decoder;
pub mod exceptions;
pub mod interpreter;
pub mod machine;
pub mod processor_interface;
pub mod savestate;
pub mod state;
pub mod tables;
pub mod tiered;
pub mod timing;

pub use breakpoint::BreakPoints;
pub use cpu::{Cpu, CpuState};
pub use decoder::Instruction;
pub use exceptions::Exceptions;
pub use interpreter::{Interpreter, PassResult};
pub use machine::{Machine, MachineStats, PassOutcome};
pub use processor_interface::{InterruptCause, ProcessorInterface};
pub use savestate::MachineState;
pub use state::PowerPcState;
pub use tiered::{Tiered, TieredStats};
pub use timing::{CoreTiming, EventType};
