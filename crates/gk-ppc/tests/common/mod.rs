//! Shared helpers for gk-ppc integration tests

#![allow(dead_code)]

use std::sync::Arc;

use gk_core::config::{CpuConfig, CpuCore};
use gk_memory::GuestMemory;
use gk_ppc::Machine;

/// Instruction encoders for the handful of opcodes the tests use
pub mod asm {
    fn d_form(opcd: u32, rt: u32, ra: u32, imm: i16) -> u32 {
        (opcd << 26) | (rt << 21) | (ra << 16) | (imm as u16 as u32)
    }

    fn x_form(rt: u32, ra: u32, rb: u32, xo: u32) -> u32 {
        (31 << 26) | (rt << 21) | (ra << 16) | (rb << 11) | (xo << 1)
    }

    pub fn addi(rd: u32, ra: u32, imm: i16) -> u32 {
        d_form(14, rd, ra, imm)
    }

    pub fn li(rd: u32, imm: i16) -> u32 {
        addi(rd, 0, imm)
    }

    pub fn addis(rd: u32, ra: u32, imm: u16) -> u32 {
        d_form(15, rd, ra, imm as i16)
    }

    pub fn ori(ra: u32, rs: u32, imm: u16) -> u32 {
        d_form(24, rs, ra, imm as i16)
    }

    pub fn nop() -> u32 {
        ori(0, 0, 0)
    }

    pub fn add(rd: u32, ra: u32, rb: u32) -> u32 {
        x_form(rd, ra, rb, 266)
    }

    pub fn lwz(rd: u32, ra: u32, disp: i16) -> u32 {
        d_form(32, rd, ra, disp)
    }

    pub fn stw(rs: u32, ra: u32, disp: i16) -> u32 {
        d_form(36, rs, ra, disp)
    }

    pub fn lfd(frd: u32, ra: u32, disp: i16) -> u32 {
        d_form(50, frd, ra, disp)
    }

    pub fn fadd(frd: u32, fra: u32, frb: u32) -> u32 {
        (63 << 26) | (frd << 21) | (fra << 16) | (frb << 11) | (21 << 1)
    }

    /// Relative branch; `offset` is in bytes
    pub fn b(offset: i32) -> u32 {
        (18 << 26) | (offset as u32 & 0x03FF_FFFC)
    }

    pub fn bl(offset: i32) -> u32 {
        b(offset) | 1
    }

    pub fn blr() -> u32 {
        0x4E80_0020
    }

    /// Decrement CTR, branch while nonzero
    pub fn bdnz(offset: i32) -> u32 {
        (16 << 26) | (16 << 21) | (offset as u32 & 0xFFFC)
    }

    pub fn mtspr(spr: u32, rs: u32) -> u32 {
        let field = ((spr & 0x1F) << 5) | ((spr >> 5) & 0x1F);
        (31 << 26) | (rs << 21) | (field << 11) | (467 << 1)
    }

    pub fn mfspr(rd: u32, spr: u32) -> u32 {
        let field = ((spr & 0x1F) << 5) | ((spr >> 5) & 0x1F);
        (31 << 26) | (rd << 21) | (field << 11) | (339 << 1)
    }

    pub fn mtctr(rs: u32) -> u32 {
        mtspr(9, rs)
    }

    pub fn mtdec(rs: u32) -> u32 {
        mtspr(22, rs)
    }

    pub fn icbi(ra: u32, rb: u32) -> u32 {
        x_form(0, ra, rb, 982)
    }

    pub fn sc() -> u32 {
        0x4400_0002
    }

    pub fn rfi() -> u32 {
        0x4C00_0064
    }
}

pub const CODE: u32 = 0x8000_1000;

pub fn config(core: CpuCore, baseline: bool) -> CpuConfig {
    CpuConfig {
        core,
        baseline,
        ..CpuConfig::default()
    }
}

pub fn machine_with(config: &CpuConfig) -> Machine {
    Machine::new(config, Arc::new(GuestMemory::new())).expect("machine")
}

pub fn machine(core: CpuCore) -> Machine {
    machine_with(&config(core, false))
}

pub fn load(machine: &Machine, address: u32, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        machine
            .memory()
            .write_be32(address + i as u32 * 4, *word)
            .expect("program fits in RAM");
    }
}

/// Run passes until PC reaches `until` or `max_passes` is exhausted
pub fn run_until(machine: &mut Machine, until: u32, max_passes: usize) -> bool {
    for _ in 0..max_passes {
        if machine.state.pc == until {
            return true;
        }
        if machine.timing().downcount() <= 0 {
            machine.advance_timing();
        }
        machine.dispatch(true);
    }
    machine.state.pc == until
}

pub const CORES: [CpuCore; 2] = [CpuCore::Interpreter, CpuCore::Tiered];
