//! Processor interface interrupt aggregation
//!
//! Devices raise individual cause bits. The CPU sees a single external
//! interrupt line, asserted while any unmasked cause is pending.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::exceptions::Exceptions;
use crate::state::PowerPcState;

bitflags! {
    /// Interrupt cause register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InterruptCause: u32 {
        /// GP runtime error
        const PI        = 0x0000_0001;
        /// Reset switch
        const RSW       = 0x0000_0002;
        /// Disc interface
        const DI        = 0x0000_0004;
        /// Serial interface
        const SI        = 0x0000_0008;
        /// External interface
        const EXI       = 0x0000_0010;
        /// Audio streaming
        const AI        = 0x0000_0020;
        const DSP       = 0x0000_0040;
        /// Memory interface
        const MEM       = 0x0000_0080;
        /// Video interface
        const VI        = 0x0000_0100;
        const PE_TOKEN  = 0x0000_0200;
        const PE_FINISH = 0x0000_0400;
        /// Command processor FIFO
        const CP        = 0x0000_0800;
        const DEBUG     = 0x0000_1000;
        /// High-speed port
        const HSP       = 0x0000_2000;
        /// Starlet IPC
        const IPC       = 0x0000_4000;
    }
}

/// Interrupt cause and mask registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorInterface {
    cause: InterruptCause,
    mask: InterruptCause,
}

impl ProcessorInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cause = InterruptCause::empty();
        self.mask = InterruptCause::empty();
    }

    #[inline]
    pub fn cause(&self) -> InterruptCause {
        self.cause
    }

    #[inline]
    pub fn mask(&self) -> InterruptCause {
        self.mask
    }

    /// Raise or lower `cause` and update the external interrupt line
    pub fn set_interrupt(&mut self, state: &mut PowerPcState, cause: InterruptCause, set: bool) {
        if set && !self.cause.contains(cause) {
            tracing::trace!(target: "ppc", "Interrupt {:?} raised", cause);
        }
        self.cause.set(cause, set);
        self.update_line(state);
    }

    /// Replace the mask register and update the external interrupt line
    pub fn set_mask(&mut self, state: &mut PowerPcState, mask: InterruptCause) {
        self.mask = mask;
        self.update_line(state);
    }

    /// True while any unmasked cause is pending
    #[inline]
    pub fn line_asserted(&self) -> bool {
        self.cause.intersects(self.mask)
    }

    fn update_line(&self, state: &mut PowerPcState) {
        state
            .exceptions
            .set(Exceptions::EXTERNAL_INT, self.line_asserted());
    }
}
