//! System, SPR, cache-control and trap instructions

use super::load_store::ea_x;
use super::ExecContext;
use crate::decoder::Instruction;
use crate::exceptions::{Exceptions, ProgramCause};
use crate::state::{spr, Msr, PowerPcState};
use crate::tables::Op;
use crate::timing::TIMER_RATIO;

/// MSR bits restored from SRR1 by rfi
const RFI_MSR_MASK: u32 = 0x87C0_FFFF;
/// rfi always clears MSR[13]
const RFI_CLEAR: u32 = 0xFFFB_FFFF;

/// HID0 instruction cache flash invalidate
const HID0_ICFI: u32 = 0x0000_0800;

const CACHE_LINE: u32 = 32;

/// Current time base value
pub fn read_time_base(state: &PowerPcState, ticks: u64) -> u64 {
    let elapsed = ticks.saturating_sub(state.timer.tb_ticks) / TIMER_RATIO;
    state.timer.tb_value.wrapping_add(elapsed)
}

fn write_time_base(state: &mut PowerPcState, ticks: u64, value: u64) {
    state.timer.tb_value = value;
    state.timer.tb_ticks = ticks;
}

/// Current decrementer value
pub fn read_decrementer(state: &PowerPcState, ticks: u64) -> u32 {
    let elapsed = ticks.saturating_sub(state.timer.dec_ticks) / TIMER_RATIO;
    state.timer.dec_value.wrapping_sub(elapsed as u32)
}

/// Reload the decrementer and reschedule its underflow
fn write_decrementer(ctx: &mut ExecContext, value: u32) {
    let ticks = ctx.timing.ticks();
    let old = read_decrementer(ctx.state, ticks);
    ctx.state.timer.dec_value = value;
    ctx.state.timer.dec_ticks = ticks;
    ctx.state.spr[spr::DEC] = value;

    ctx.timing.remove_event(ctx.decrementer);
    if value & 0x8000_0000 != 0 {
        // Writing a negative value over a positive one fires immediately
        if old & 0x8000_0000 == 0 {
            ctx.state.exceptions |= Exceptions::DECREMENTER;
        }
    } else {
        let delay = (value as u64 + 1) * TIMER_RATIO;
        ctx.timing.schedule_event(delay, ctx.decrementer, 0);
    }
}

/// TO field: lt, gt, eq, ltu, gtu
fn trap_condition(to: u32, a: u32, b: u32) -> bool {
    let (sa, sb) = (a as i32, b as i32);
    (to & 0x10 != 0 && sa < sb)
        || (to & 0x08 != 0 && sa > sb)
        || (to & 0x04 != 0 && a == b)
        || (to & 0x02 != 0 && a < b)
        || (to & 0x01 != 0 && a > b)
}

/// SPRs with bit 4 of their number set are supervisor-only
#[inline]
fn spr_is_privileged(s: &PowerPcState, n: usize) -> bool {
    n & 0x10 != 0 && s.msr_has(Msr::PR)
}

fn move_from_spr(ctx: &mut ExecContext, n: usize) -> u32 {
    let ticks = ctx.timing.ticks();
    let s = &*ctx.state;
    match n {
        spr::XER => s.xer,
        spr::DEC => read_decrementer(s, ticks),
        spr::TBL_READ => read_time_base(s, ticks) as u32,
        spr::TBU_READ => (read_time_base(s, ticks) >> 32) as u32,
        _ => s.spr[n],
    }
}

fn move_to_spr(ctx: &mut ExecContext, n: usize, value: u32) {
    let ticks = ctx.timing.ticks();
    match n {
        spr::XER => ctx.state.xer = value,
        spr::DEC => write_decrementer(ctx, value),
        spr::TBL_WRITE => {
            let tb = read_time_base(ctx.state, ticks);
            write_time_base(ctx.state, ticks, (tb & !0xFFFF_FFFF) | value as u64);
        }
        spr::TBU_WRITE => {
            let tb = read_time_base(ctx.state, ticks);
            write_time_base(ctx.state, ticks, (tb & 0xFFFF_FFFF) | ((value as u64) << 32));
        }
        // Read-only
        spr::PVR | spr::TBL_READ | spr::TBU_READ => {}
        spr::HID0 => {
            if value & HID0_ICFI != 0 {
                gk_core::ppc_debug!("HID0 flash invalidate of the instruction cache");
                ctx.invalidate_code(0, u32::MAX, true);
            }
            ctx.state.spr[n] = value & !HID0_ICFI;
        }
        _ => ctx.state.spr[n] = value,
    }
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    match op {
        // sc - System Call
        Op::Sc => ctx.state.exceptions |= Exceptions::SYSCALL,
        // rfi - Return From Interrupt
        Op::Rfi => {
            let s = &mut *ctx.state;
            s.msr = (s.msr & !RFI_MSR_MASK) | (s.spr[spr::SRR1] & RFI_MSR_MASK);
            s.msr &= RFI_CLEAR;
            s.npc = s.spr[spr::SRR0] & !3;
        }
        Op::Twi | Op::Tw => {
            let s = &mut *ctx.state;
            let b = if op == Op::Twi {
                inst.simm() as u32
            } else {
                s.gpr[inst.rb()]
            };
            if trap_condition(inst.to(), s.gpr[inst.ra()], b) {
                s.generate_program_exception(ProgramCause::Trap);
            }
        }

        Op::Mfmsr => ctx.state.gpr[inst.rd()] = ctx.state.msr,
        Op::Mtmsr => ctx.state.msr = ctx.state.gpr[inst.rs()],
        Op::Mfspr | Op::Mftb => {
            let n = inst.spr();
            if op == Op::Mfspr && spr_is_privileged(ctx.state, n) {
                ctx.state.generate_program_exception(ProgramCause::Privileged);
                return;
            }
            let value = move_from_spr(ctx, n);
            ctx.state.gpr[inst.rd()] = value;
        }
        Op::Mtspr => {
            let n = inst.spr();
            if spr_is_privileged(ctx.state, n) {
                ctx.state.generate_program_exception(ProgramCause::Privileged);
                return;
            }
            let value = ctx.state.gpr[inst.rs()];
            move_to_spr(ctx, n, value);
        }
        Op::Mfcr => ctx.state.gpr[inst.rd()] = ctx.state.cr,
        // mtcrf - Move To CR Fields
        Op::Mtcrf => {
            let s = &mut *ctx.state;
            let crm = inst.crm();
            let mask = (0..8)
                .filter(|i| crm & (1 << i) != 0)
                .fold(0u32, |m, i| m | (0xF << (i * 4)));
            s.cr = (s.cr & !mask) | (s.gpr[inst.rs()] & mask);
        }
        // mcrxr - Move to CR from XER, clearing SO/OV/CA
        Op::Mcrxr => {
            let s = &mut *ctx.state;
            s.set_cr_field(inst.crfd(), s.xer >> 28);
            s.xer &= 0x0FFF_FFFF;
        }
        Op::Mfsr => ctx.state.gpr[inst.rd()] = ctx.state.sr[inst.sr()],
        Op::Mtsr => ctx.state.sr[inst.sr()] = ctx.state.gpr[inst.rs()],
        Op::Mfsrin => {
            let s = &mut *ctx.state;
            s.gpr[inst.rd()] = s.sr[(s.gpr[inst.rb()] >> 28) as usize];
        }
        Op::Mtsrin => {
            let s = &mut *ctx.state;
            s.sr[(s.gpr[inst.rb()] >> 28) as usize] = s.gpr[inst.rs()];
        }

        // No translation or memory ordering to model
        Op::Sync | Op::Isync | Op::Eieio | Op::Tlbie | Op::Tlbsync | Op::Dcbt | Op::Dcbtst => {}

        // icbi - Instruction Cache Block Invalidate
        Op::Icbi => {
            let ea = ea_x(ctx.state, inst);
            ctx.invalidate_code(ea & !(CACHE_LINE - 1), CACHE_LINE, false);
        }
        // Flushing a data line can publish new code
        Op::Dcbst | Op::Dcbf | Op::Dcbi => {
            let ea = ea_x(ctx.state, inst);
            ctx.invalidate_code(ea & !(CACHE_LINE - 1), CACHE_LINE, false);
        }
        // dcbz - Data Cache Block set to Zero
        Op::Dcbz => {
            let ea = ea_x(ctx.state, inst) & !(CACHE_LINE - 1);
            ctx.write_bytes(ea, &[0u8; CACHE_LINE as usize]);
        }

        other => debug_assert!(false, "{} routed to the system unit", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_conditions() {
        // tw 31 traps unconditionally
        assert!(trap_condition(31, 1, 2));
        // twlt
        assert!(trap_condition(0x10, (-1i32) as u32, 0));
        assert!(!trap_condition(0x10, 0, (-1i32) as u32));
        // twllt
        assert!(trap_condition(0x02, 0, (-1i32) as u32));
        // tweq
        assert!(trap_condition(0x04, 7, 7));
        assert!(!trap_condition(0, 7, 7));
    }

    #[test]
    fn test_time_base_counts_bus_ticks() {
        let mut state = PowerPcState::new();
        write_time_base(&mut state, 120, 0x1_0000_0000);
        assert_eq!(read_time_base(&state, 120), 0x1_0000_0000);
        assert_eq!(read_time_base(&state, 120 + 12 * 5 + 11), 0x1_0000_0005);
    }

    #[test]
    fn test_decrementer_counts_down() {
        let mut state = PowerPcState::new();
        state.timer.dec_value = 10;
        state.timer.dec_ticks = 0;
        assert_eq!(read_decrementer(&state, 12 * 4), 6);
        assert_eq!(read_decrementer(&state, 12 * 11), u32::MAX);
    }

    #[test]
    fn test_privileged_spr_numbers() {
        let mut state = PowerPcState::new();
        state.msr = Msr::PR.bits();
        assert!(spr_is_privileged(&state, spr::SRR0));
        assert!(spr_is_privileged(&state, spr::SPRG0));
        assert!(!spr_is_privileged(&state, spr::LR));
        assert!(!spr_is_privileged(&state, spr::CTR));
        state.msr = 0;
        assert!(!spr_is_privileged(&state, spr::SRR0));
    }
}
