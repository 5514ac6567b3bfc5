//! Save states
//!
//! A save state holds the architectural state, the scheduler, interrupt
//! registers, breakpoints and a full memory image, encoded with bincode.
//! Cached code is not saved; loading drops it and the cores rebuild it.

use gk_core::CpuError;
use serde::{Deserialize, Serialize};

use crate::breakpoint::BreakPoints;
use crate::machine::Machine;
use crate::processor_interface::ProcessorInterface;
use crate::state::PowerPcState;
use crate::timing::TimingSnapshot;

/// "GKST"
pub const STATE_MAGIC: u32 = 0x474B_5354;
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StateHeader {
    magic: u32,
    version: u32,
}

/// Everything needed to resume a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    header: StateHeader,
    pub ppc: PowerPcState,
    pub timing: TimingSnapshot,
    pub pi: ProcessorInterface,
    pub breakpoints: BreakPoints,
    pub memory: Vec<u8>,
}

impl Machine {
    pub fn capture_state(&self) -> MachineState {
        MachineState {
            header: StateHeader {
                magic: STATE_MAGIC,
                version: STATE_VERSION,
            },
            ppc: self.state.clone(),
            timing: self.timing.snapshot(),
            pi: self.pi,
            breakpoints: self.breakpoints.clone(),
            memory: self.memory.snapshot(),
        }
    }

    /// Restore a captured state. Memory is restored first so a size
    /// mismatch leaves the machine untouched.
    pub fn restore_state(&mut self, saved: &MachineState) -> Result<(), CpuError> {
        self.memory
            .restore(&saved.memory)
            .map_err(|e| CpuError::LoadState(e.to_string()))?;

        self.state = saved.ppc.clone();
        self.timing.restore(&saved.timing);
        self.pi = saved.pi;
        self.breakpoints = saved.breakpoints.clone();
        if let Some(tiered) = self.tiered_mut() {
            tiered.clear();
        }
        tracing::info!("Restored machine state at pc 0x{:08x}", self.state.pc);
        Ok(())
    }

    pub fn save_state(&self) -> Result<Vec<u8>, CpuError> {
        let data = bincode::serialize(&self.capture_state()).map_err(|e| CpuError::SaveState(e.to_string()))?;
        tracing::info!("Saved machine state ({} bytes)", data.len());
        Ok(data)
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), CpuError> {
        // The header decodes on its own, so incompatible states are
        // reported before the body is parsed
        let header: StateHeader = bincode::deserialize(data).map_err(|e| CpuError::LoadState(e.to_string()))?;
        if header.magic != STATE_MAGIC {
            return Err(CpuError::LoadState(format!("bad magic 0x{:08x}", header.magic)));
        }
        if header.version != STATE_VERSION {
            return Err(CpuError::IncompatibleState {
                expected: STATE_VERSION,
                found: header.version,
            });
        }

        let saved: MachineState = bincode::deserialize(data).map_err(|e| CpuError::LoadState(e.to_string()))?;
        self.restore_state(&saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::config::{CpuConfig, CpuCore};
    use gk_memory::GuestMemory;
    use std::sync::Arc;

    fn machine() -> Machine {
        let config = CpuConfig {
            core: CpuCore::Interpreter,
            baseline: false,
            ..CpuConfig::default()
        };
        Machine::new(&config, Arc::new(GuestMemory::new())).unwrap()
    }

    #[test]
    fn test_rejects_other_versions() {
        let m = machine();
        let mut saved = m.capture_state();
        saved.header.version = STATE_VERSION + 1;
        let data = bincode::serialize(&saved).unwrap();

        let mut m = machine();
        assert!(matches!(
            m.load_state(&data),
            Err(CpuError::IncompatibleState { expected: STATE_VERSION, .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut m = machine();
        assert!(matches!(m.load_state(b"not a state"), Err(CpuError::LoadState(_))));
        assert!(matches!(m.load_state(&[]), Err(CpuError::LoadState(_))));
    }

    #[test]
    fn test_round_trip_restores_registers() {
        let mut m = machine();
        m.state.gpr[7] = 0xDEAD_BEEF;
        m.state.pc = 0x8000_1234;
        m.memory().write_be32(0x8000_0040, 0x1234_5678).unwrap();
        let data = m.save_state().unwrap();

        m.state.gpr[7] = 0;
        m.memory().write_be32(0x8000_0040, 0).unwrap();
        m.load_state(&data).unwrap();
        assert_eq!(m.state.gpr[7], 0xDEAD_BEEF);
        assert_eq!(m.state.pc, 0x8000_1234);
        assert_eq!(m.memory().read_be32(0x8000_0040).unwrap(), 0x1234_5678);
    }
}
