//! Architectural register state

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::exceptions::Exceptions;

/// Number of addressable special-purpose registers
pub const SPR_COUNT: usize = 1024;

/// Processor version reported by Gekko
pub const GEKKO_PVR: u32 = 0x0008_3214;

/// Special Purpose Register numbers
pub mod spr {
    pub const XER: usize = 1;
    pub const LR: usize = 8;
    pub const CTR: usize = 9;
    pub const DSISR: usize = 18;
    pub const DAR: usize = 19;
    pub const DEC: usize = 22;
    pub const SDR1: usize = 25;
    pub const SRR0: usize = 26;
    pub const SRR1: usize = 27;
    pub const TBL_READ: usize = 268;
    pub const TBU_READ: usize = 269;
    pub const SPRG0: usize = 272;
    pub const SPRG1: usize = 273;
    pub const SPRG2: usize = 274;
    pub const SPRG3: usize = 275;
    pub const EAR: usize = 282;
    pub const TBL_WRITE: usize = 284;
    pub const TBU_WRITE: usize = 285;
    pub const PVR: usize = 287;
    pub const GQR0: usize = 912;
    pub const HID2: usize = 920;
    pub const WPAR: usize = 921;
    pub const MMCR0: usize = 952;
    pub const PMC1: usize = 953;
    pub const HID0: usize = 1008;
    pub const HID1: usize = 1009;
    pub const L2CR: usize = 1017;
}

bitflags! {
    /// Machine State Register bits (32-bit implementation)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Msr: u32 {
        /// Little-endian mode
        const LE  = 0x0000_0001;
        /// Recoverable interrupt
        const RI  = 0x0000_0002;
        /// Performance monitor mark
        const PM  = 0x0000_0004;
        /// Data address translation
        const DR  = 0x0000_0010;
        /// Instruction address translation
        const IR  = 0x0000_0020;
        /// Exception prefix (vectors at 0xFFF0_0000)
        const IP  = 0x0000_0040;
        const FE1 = 0x0000_0100;
        /// Branch trace
        const BE  = 0x0000_0200;
        /// Single-step trace
        const SE  = 0x0000_0400;
        const FE0 = 0x0000_0800;
        /// Machine check enable
        const ME  = 0x0000_1000;
        /// Floating point available
        const FP  = 0x0000_2000;
        /// Problem (user) state
        const PR  = 0x0000_4000;
        /// External interrupt enable
        const EE  = 0x0000_8000;
        /// Exception little-endian mode
        const ILE = 0x0001_0000;
        /// Power management enable
        const POW = 0x0004_0000;
    }
}

/// One floating-point register, holding both paired-single slots as f64 bit patterns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedSingle {
    pub ps0: u64,
    pub ps1: u64,
}

impl PairedSingle {
    #[inline]
    pub fn ps0(&self) -> f64 {
        f64::from_bits(self.ps0)
    }

    #[inline]
    pub fn ps1(&self) -> f64 {
        f64::from_bits(self.ps1)
    }

    #[inline]
    pub fn set_ps0(&mut self, value: f64) {
        self.ps0 = value.to_bits();
    }

    #[inline]
    pub fn set_ps1(&mut self, value: f64) {
        self.ps1 = value.to_bits();
    }

    #[inline]
    pub fn set_both(&mut self, value: f64) {
        self.ps0 = value.to_bits();
        self.ps1 = self.ps0;
    }
}

/// Anchors for the bus-clocked time base and decrementer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Time base value at `tb_ticks`
    pub tb_value: u64,
    /// Core cycle count at which `tb_value` was latched
    pub tb_ticks: u64,
    /// Decrementer value at `dec_ticks`
    pub dec_value: u32,
    /// Core cycle count at which `dec_value` was written
    pub dec_ticks: u64,
}

/// Complete architectural state of one Gekko core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerPcState {
    /// General Purpose Registers
    pub gpr: [u32; 32],
    /// Floating point / paired-single registers
    pub ps: [PairedSingle; 32],
    /// Address of the instruction being executed
    pub pc: u32,
    /// Address of the next instruction
    pub npc: u32,
    /// Condition Register
    pub cr: u32,
    /// Fixed-Point Exception Register
    pub xer: u32,
    /// Machine State Register
    pub msr: u32,
    /// FP Status and Control Register
    pub fpscr: u32,
    /// Segment registers
    pub sr: [u32; 16],
    /// Special Purpose Registers, indexed by SPR number
    #[serde(with = "spr_file")]
    pub spr: Box<[u32; SPR_COUNT]>,
    /// Pending exceptions
    pub exceptions: Exceptions,
    /// Address reserved by lwarx
    pub reserve: Option<u32>,
    pub timer: TimerState,
}

pub const XER_SO: u32 = 0x8000_0000;
pub const XER_OV: u32 = 0x4000_0000;
pub const XER_CA: u32 = 0x2000_0000;

impl PowerPcState {
    pub fn new() -> Self {
        let mut state = Self {
            gpr: [0; 32],
            ps: [PairedSingle::default(); 32],
            pc: 0,
            npc: 0,
            cr: 0,
            xer: 0,
            msr: 0,
            fpscr: 0,
            sr: [0; 16],
            spr: Box::new([0; SPR_COUNT]),
            exceptions: Exceptions::empty(),
            reserve: None,
            timer: TimerState::default(),
        };
        state.reset_registers();
        state
    }

    /// Return every register to its power-on value
    pub fn reset_registers(&mut self) {
        self.gpr = [0; 32];
        self.ps = [PairedSingle::default(); 32];
        self.pc = 0;
        self.npc = 0;
        self.cr = 0;
        self.xer = 0;
        self.msr = 0;
        self.fpscr = 0;
        self.sr = [0; 16];
        self.spr.fill(0);
        self.spr[spr::PVR] = GEKKO_PVR;
        self.spr[spr::DEC] = 0xFFFF_FFFF;
        self.exceptions = Exceptions::empty();
        self.reserve = None;
        self.timer = TimerState {
            dec_value: 0xFFFF_FFFF,
            ..TimerState::default()
        };
    }

    #[inline]
    pub fn msr_flags(&self) -> Msr {
        Msr::from_bits_retain(self.msr)
    }

    #[inline]
    pub fn msr_has(&self, bits: Msr) -> bool {
        self.msr & bits.bits() == bits.bits()
    }

    #[inline]
    pub fn lr(&self) -> u32 {
        self.spr[spr::LR]
    }

    #[inline]
    pub fn set_lr(&mut self, value: u32) {
        self.spr[spr::LR] = value;
    }

    #[inline]
    pub fn ctr(&self) -> u32 {
        self.spr[spr::CTR]
    }

    #[inline]
    pub fn set_ctr(&mut self, value: u32) {
        self.spr[spr::CTR] = value;
    }

    /// Get CR field value (0-7)
    #[inline]
    pub fn cr_field(&self, field: usize) -> u32 {
        (self.cr >> (28 - field * 4)) & 0xF
    }

    /// Set CR field value (0-7)
    #[inline]
    pub fn set_cr_field(&mut self, field: usize, value: u32) {
        let shift = 28 - field * 4;
        self.cr = (self.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// Get one CR bit (0 is the MSB)
    #[inline]
    pub fn cr_bit(&self, bit: u32) -> bool {
        (self.cr >> (31 - bit)) & 1 != 0
    }

    #[inline]
    pub fn set_cr_bit(&mut self, bit: u32, value: bool) {
        let mask = 1 << (31 - bit);
        if value {
            self.cr |= mask;
        } else {
            self.cr &= !mask;
        }
    }

    /// Set CR0 from a signed comparison of `value` against zero
    #[inline]
    pub fn update_cr0(&mut self, value: u32) {
        let value = value as i32;
        let c = if value < 0 {
            0b1000
        } else if value > 0 {
            0b0100
        } else {
            0b0010
        };
        self.set_cr_field(0, c | self.xer_so() as u32);
    }

    #[inline]
    pub fn xer_ca(&self) -> bool {
        self.xer & XER_CA != 0
    }

    #[inline]
    pub fn set_xer_ca(&mut self, value: bool) {
        if value {
            self.xer |= XER_CA;
        } else {
            self.xer &= !XER_CA;
        }
    }

    #[inline]
    pub fn xer_so(&self) -> bool {
        self.xer & XER_SO != 0
    }

    /// Set OV, and SO when overflowing
    #[inline]
    pub fn set_xer_ov(&mut self, value: bool) {
        if value {
            self.xer |= XER_OV | XER_SO;
        } else {
            self.xer &= !XER_OV;
        }
    }
}

impl Default for PowerPcState {
    fn default() -> Self {
        Self::new()
    }
}

/// The SPR file exceeds serde's fixed array support, so it goes through a sequence
mod spr_file {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SPR_COUNT;

    #[allow(clippy::borrowed_box)]
    pub fn serialize<S: Serializer>(spr: &Box<[u32; SPR_COUNT]>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(spr.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Box<[u32; SPR_COUNT]>, D::Error> {
        let values = Vec::<u32>::deserialize(d)?;
        let len = values.len();
        values
            .into_boxed_slice()
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"1024 special-purpose registers"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let mut state = PowerPcState::new();
        state.gpr[3] = 5;
        state.msr = Msr::EE.bits();
        state.exceptions = Exceptions::PROGRAM;
        state.reset_registers();

        assert_eq!(state.gpr[3], 0);
        assert_eq!(state.msr, 0);
        assert!(state.exceptions.is_empty());
        assert_eq!(state.spr[spr::PVR], GEKKO_PVR);
        assert_eq!(state.spr[spr::DEC], 0xFFFF_FFFF);
    }

    #[test]
    fn test_cr_fields_and_bits() {
        let mut state = PowerPcState::new();
        state.set_cr_field(0, 0b1000);
        state.set_cr_field(7, 0b0011);
        assert_eq!(state.cr, 0x8000_0003);
        assert!(state.cr_bit(0));
        assert!(state.cr_bit(31));

        state.set_cr_bit(0, false);
        state.set_cr_bit(2, true);
        assert_eq!(state.cr_field(0), 0b0010);
    }

    #[test]
    fn test_cr0_update_carries_so() {
        let mut state = PowerPcState::new();
        state.update_cr0(0xFFFF_FFFF);
        assert_eq!(state.cr_field(0), 0b1000);

        state.set_xer_ov(true);
        state.update_cr0(0);
        assert_eq!(state.cr_field(0), 0b0011);

        state.set_xer_ov(false);
        assert!(state.xer_so(), "SO is sticky");
    }

    #[test]
    fn test_paired_single_slots() {
        let mut reg = PairedSingle::default();
        reg.set_ps0(1.5);
        reg.set_ps1(-2.0);
        assert_eq!(reg.ps0(), 1.5);
        assert_eq!(reg.ps1(), -2.0);
        reg.set_both(3.0);
        assert_eq!(reg.ps1(), 3.0);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = PowerPcState::new();
        state.gpr[31] = 0xDEAD_BEEF;
        state.spr[spr::SRR0] = 0x8000_0100;
        state.ps[1].set_ps1(0.25);

        let bytes = bincode::serialize(&state).unwrap();
        let back: PowerPcState = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, state);
    }
}
