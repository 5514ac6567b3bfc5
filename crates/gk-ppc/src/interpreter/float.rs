//! Floating-point loads, stores and arithmetic
//!
//! FPSCR is tracked only as far as the compare code (FPCC) and the
//! result class (FPRF). Enabled FP exceptions are never raised.

use super::load_store::{ea_d, ea_du, ea_x, ea_xu};
use super::ExecContext;
use crate::decoder::Instruction;
use crate::state::PowerPcState;
use crate::tables::Op;

/// FPSCR FPRF field (class and FPCC)
const FPSCR_FPRF_SHIFT: u32 = 12;
const FPSCR_FPRF_MASK: u32 = 0x1F << FPSCR_FPRF_SHIFT;
const FPSCR_FPCC_MASK: u32 = 0xF << FPSCR_FPRF_SHIFT;
/// FPSCR rounding control
const FPSCR_RN_MASK: u32 = 0x3;

/// Upper word of an integer result stored into an FPR
const FPR_INTEGER_TAG: u64 = 0xFFF8_0000_0000_0000;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Round to single precision
#[inline]
pub(crate) fn round_single(value: f64) -> f64 {
    value as f32 as f64
}

/// FPRF encoding of a result
pub(crate) fn classify(value: f64) -> u32 {
    use std::num::FpCategory;
    let negative = value.is_sign_negative();
    match value.classify() {
        FpCategory::Nan => 0x11,
        FpCategory::Infinite => {
            if negative {
                0x09
            } else {
                0x05
            }
        }
        FpCategory::Zero => {
            if negative {
                0x12
            } else {
                0x02
            }
        }
        FpCategory::Subnormal => {
            if negative {
                0x18
            } else {
                0x14
            }
        }
        FpCategory::Normal => {
            if negative {
                0x08
            } else {
                0x04
            }
        }
    }
}

#[inline]
pub(crate) fn set_fprf(s: &mut PowerPcState, value: f64) {
    s.fpscr = (s.fpscr & !FPSCR_FPRF_MASK) | (classify(value) << FPSCR_FPRF_SHIFT);
}

/// Compare two doubles into CR field `crf` and FPCC
pub(crate) fn compare(s: &mut PowerPcState, crf: usize, a: f64, b: f64) {
    let c = if a.is_nan() || b.is_nan() {
        0b0001
    } else if a < b {
        0b1000
    } else if a > b {
        0b0100
    } else {
        0b0010
    };
    s.fpscr = (s.fpscr & !FPSCR_FPCC_MASK) | (c << FPSCR_FPRF_SHIFT);
    s.set_cr_field(crf, c);
}

/// CR1 mirrors FPSCR[FX, FEX, VX, OX] on record forms
#[inline]
pub(crate) fn update_cr1(s: &mut PowerPcState, inst: Instruction) {
    if inst.rc_bit() {
        let bits = s.fpscr >> 28;
        s.set_cr_field(1, bits);
    }
}

/// fctiw/fctiwz conversion with saturation
fn convert_to_int(value: f64, rounding: u32) -> u32 {
    if value.is_nan() {
        return 0x8000_0000;
    }
    let rounded = match rounding {
        0 => value.round_ties_even(),
        1 => value.trunc(),
        2 => value.ceil(),
        _ => value.floor(),
    };
    if rounded >= 2_147_483_648.0 {
        0x7FFF_FFFF
    } else if rounded < -2_147_483_648.0 {
        0x8000_0000
    } else {
        rounded as i32 as u32
    }
}

fn load_single(ctx: &mut ExecContext, inst: Instruction, ea: u32, update: bool) {
    if let Some(bits) = ctx.read_u32(ea) {
        ctx.state.ps[inst.rd()].set_both(f32::from_bits(bits) as f64);
        if update {
            ctx.state.gpr[inst.ra()] = ea;
        }
    }
}

fn load_double(ctx: &mut ExecContext, inst: Instruction, ea: u32, update: bool) {
    if let Some(bits) = ctx.read_u64(ea) {
        ctx.state.ps[inst.rd()].ps0 = bits;
        if update {
            ctx.state.gpr[inst.ra()] = ea;
        }
    }
}

fn store_single(ctx: &mut ExecContext, inst: Instruction, ea: u32, update: bool) {
    let bits = (ctx.state.ps[inst.rs()].ps0() as f32).to_bits();
    if ctx.write_u32(ea, bits) && update {
        ctx.state.gpr[inst.ra()] = ea;
    }
}

fn store_double(ctx: &mut ExecContext, inst: Instruction, ea: u32, update: bool) {
    let bits = ctx.state.ps[inst.rs()].ps0;
    if ctx.write_u64(ea, bits) && update {
        ctx.state.gpr[inst.ra()] = ea;
    }
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    let s = &*ctx.state;
    let (d, du, x, xu) = (ea_d(s, inst), ea_du(s, inst), ea_x(s, inst), ea_xu(s, inst));

    match op {
        Op::Lfs => load_single(ctx, inst, d, false),
        Op::Lfsu => load_single(ctx, inst, du, true),
        Op::Lfsx => load_single(ctx, inst, x, false),
        Op::Lfsux => load_single(ctx, inst, xu, true),
        Op::Lfd => load_double(ctx, inst, d, false),
        Op::Lfdu => load_double(ctx, inst, du, true),
        Op::Lfdx => load_double(ctx, inst, x, false),
        Op::Lfdux => load_double(ctx, inst, xu, true),
        Op::Stfs => store_single(ctx, inst, d, false),
        Op::Stfsu => store_single(ctx, inst, du, true),
        Op::Stfsx => store_single(ctx, inst, x, false),
        Op::Stfsux => store_single(ctx, inst, xu, true),
        Op::Stfd => store_double(ctx, inst, d, false),
        Op::Stfdu => store_double(ctx, inst, du, true),
        Op::Stfdx => store_double(ctx, inst, x, false),
        Op::Stfdux => store_double(ctx, inst, xu, true),
        // stfiwx - Store FP as Integer Word Indexed
        Op::Stfiwx => {
            let bits = ctx.state.ps[inst.rs()].ps0 as u32;
            ctx.write_u32(x, bits);
        }
        _ => arithmetic(ctx.state, op, inst),
    }
}

fn arithmetic(s: &mut PowerPcState, op: Op, inst: Instruction) {
    let a = s.ps[inst.ra()].ps0();
    let b = s.ps[inst.rb()].ps0();
    let c = s.ps[inst.rc()].ps0();
    let fd = inst.rd();

    match op {
        // Single precision: round, then fill both slots
        Op::Fadds | Op::Fsubs | Op::Fmuls | Op::Fdivs | Op::Fres | Op::Fmadds | Op::Fmsubs
        | Op::Fnmadds | Op::Fnmsubs => {
            let result = round_single(match op {
                Op::Fadds => a + b,
                Op::Fsubs => a - b,
                Op::Fmuls => a * c,
                Op::Fdivs => a / b,
                Op::Fres => 1.0 / b,
                Op::Fmadds => a.mul_add(c, b),
                Op::Fmsubs => a.mul_add(c, -b),
                Op::Fnmadds => -a.mul_add(c, b),
                _ => -a.mul_add(c, -b),
            });
            s.ps[fd].set_both(result);
            set_fprf(s, result);
            update_cr1(s, inst);
        }

        Op::Fadd | Op::Fsub | Op::Fmul | Op::Fdiv | Op::Fmadd | Op::Fmsub | Op::Fnmadd
        | Op::Fnmsub | Op::Frsqrte => {
            let result = match op {
                Op::Fadd => a + b,
                Op::Fsub => a - b,
                Op::Fmul => a * c,
                Op::Fdiv => a / b,
                Op::Fmadd => a.mul_add(c, b),
                Op::Fmsub => a.mul_add(c, -b),
                Op::Fnmadd => -a.mul_add(c, b),
                Op::Fnmsub => -a.mul_add(c, -b),
                _ => 1.0 / b.sqrt(),
            };
            s.ps[fd].set_ps0(result);
            set_fprf(s, result);
            update_cr1(s, inst);
        }
        // fsel - NaN selects frB
        Op::Fsel => {
            s.ps[fd].set_ps0(if a >= 0.0 { c } else { b });
            update_cr1(s, inst);
        }
        // frsp - Round to Single
        Op::Frsp => {
            let result = round_single(b);
            s.ps[fd].set_both(result);
            set_fprf(s, result);
            update_cr1(s, inst);
        }
        Op::Fctiw | Op::Fctiwz => {
            let rounding = if op == Op::Fctiwz {
                1
            } else {
                s.fpscr & FPSCR_RN_MASK
            };
            s.ps[fd].ps0 = FPR_INTEGER_TAG | convert_to_int(b, rounding) as u64;
            update_cr1(s, inst);
        }

        // Sign manipulation works on raw bits and leaves ps1 alone
        Op::Fmr => {
            s.ps[fd].ps0 = s.ps[inst.rb()].ps0;
            update_cr1(s, inst);
        }
        Op::Fneg => {
            s.ps[fd].ps0 = s.ps[inst.rb()].ps0 ^ SIGN_BIT;
            update_cr1(s, inst);
        }
        Op::Fabs => {
            s.ps[fd].ps0 = s.ps[inst.rb()].ps0 & !SIGN_BIT;
            update_cr1(s, inst);
        }
        Op::Fnabs => {
            s.ps[fd].ps0 = s.ps[inst.rb()].ps0 | SIGN_BIT;
            update_cr1(s, inst);
        }

        Op::Fcmpu | Op::Fcmpo => compare(s, inst.crfd(), a, b),

        // mffs - Move From FPSCR
        Op::Mffs => {
            s.ps[fd].ps0 = FPR_INTEGER_TAG | s.fpscr as u64;
            update_cr1(s, inst);
        }
        // mtfsf - Move To FPSCR Fields
        Op::Mtfsf => {
            let fm = inst.fm();
            let mask = (0..8)
                .filter(|i| fm & (1 << i) != 0)
                .fold(0u32, |m, i| m | (0xF << (i * 4)));
            s.fpscr = (s.fpscr & !mask) | (s.ps[inst.rb()].ps0 as u32 & mask);
            update_cr1(s, inst);
        }
        Op::Mtfsb0 => {
            s.fpscr &= !(0x8000_0000 >> inst.crbd());
            update_cr1(s, inst);
        }
        Op::Mtfsb1 => {
            s.fpscr |= 0x8000_0000 >> inst.crbd();
            update_cr1(s, inst);
        }
        // mcrfs - Move to CR from FPSCR, clearing the copied exception bits
        Op::Mcrfs => {
            let shift = 28 - inst.crfs() as u32 * 4;
            let field = (s.fpscr >> shift) & 0xF;
            s.set_cr_field(inst.crfd(), field);
            s.fpscr &= !((0xF << shift) & 0x9FF8_0700);
        }

        other => debug_assert!(false, "{} routed to the floating-point unit", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(1.0), 0x04);
        assert_eq!(classify(-1.0), 0x08);
        assert_eq!(classify(0.0), 0x02);
        assert_eq!(classify(-0.0), 0x12);
        assert_eq!(classify(f64::INFINITY), 0x05);
        assert_eq!(classify(f64::NAN), 0x11);
    }

    #[test]
    fn test_convert_to_int_rounding() {
        assert_eq!(convert_to_int(2.5, 0), 2);
        assert_eq!(convert_to_int(3.5, 0), 4);
        assert_eq!(convert_to_int(-2.5, 0), (-2i32) as u32);
        assert_eq!(convert_to_int(2.7, 1), 2);
        assert_eq!(convert_to_int(2.1, 2), 3);
        assert_eq!(convert_to_int(-2.1, 3), (-3i32) as u32);
        assert_eq!(convert_to_int(1e20, 1), 0x7FFF_FFFF);
        assert_eq!(convert_to_int(-1e20, 1), 0x8000_0000);
        assert_eq!(convert_to_int(f64::NAN, 0), 0x8000_0000);
    }

    #[test]
    fn test_compare_unordered() {
        let mut s = PowerPcState::new();
        compare(&mut s, 0, f64::NAN, 1.0);
        assert_eq!(s.cr_field(0), 0b0001);
        compare(&mut s, 1, 1.0, 2.0);
        assert_eq!(s.cr_field(1), 0b1000);
        assert_eq!((s.fpscr >> FPSCR_FPRF_SHIFT) & 0xF, 0b1000);
    }

    #[test]
    fn test_single_ops_fill_both_slots() {
        let mut s = PowerPcState::new();
        s.ps[2].set_ps0(1.5);
        s.ps[3].set_ps0(0.25);
        // fadds f1, f2, f3
        let inst = Instruction((59 << 26) | (1 << 21) | (2 << 16) | (3 << 11) | (21 << 1));
        arithmetic(&mut s, Op::Fadds, inst);
        assert_eq!(s.ps[1].ps0(), 1.75);
        assert_eq!(s.ps[1].ps1(), 1.75);
    }

    #[test]
    fn test_double_ops_keep_ps1() {
        let mut s = PowerPcState::new();
        s.ps[1].set_ps1(9.0);
        s.ps[2].set_ps0(3.0);
        s.ps[4].set_ps0(2.0);
        // fmul f1, f2, f4 (frC)
        let inst = Instruction((63 << 26) | (1 << 21) | (2 << 16) | (4 << 6) | (25 << 1));
        arithmetic(&mut s, Op::Fmul, inst);
        assert_eq!(s.ps[1].ps0(), 6.0);
        assert_eq!(s.ps[1].ps1(), 9.0);
    }
}
