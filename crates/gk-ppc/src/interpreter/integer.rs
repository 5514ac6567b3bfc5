//! Integer arithmetic, logical, rotate and compare instructions

use super::{ra_or_zero, ExecContext};
use crate::decoder::Instruction;
use crate::state::PowerPcState;
use crate::tables::Op;

/// Mask with bits `mb` through `me` set (IBM numbering, wrapping)
#[inline]
pub(crate) fn rotate_mask(mb: u32, me: u32) -> u32 {
    let begin = u32::MAX >> mb;
    let end = if me < 31 { u32::MAX >> (me + 1) } else { 0 };
    let mask = begin ^ end;
    if me < mb {
        !mask
    } else {
        mask
    }
}

/// a + b + carry_in, returning (result, carry out, signed overflow)
#[inline]
fn add_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let sum = a as u64 + b as u64 + carry_in as u64;
    let result = sum as u32;
    let overflow = ((a ^ result) & (b ^ result)) >> 31 != 0;
    (result, sum >> 32 != 0, overflow)
}

/// Retire an XO-form result: OE updates XER[OV], Rc updates CR0
#[inline]
fn finish_xo(s: &mut PowerPcState, inst: Instruction, result: u32, overflow: bool) {
    s.gpr[inst.rd()] = result;
    if inst.oe() {
        s.set_xer_ov(overflow);
    }
    if inst.rc_bit() {
        s.update_cr0(result);
    }
}

/// Retire a logical X-form result into rA
#[inline]
fn finish_logical(s: &mut PowerPcState, inst: Instruction, result: u32) {
    s.gpr[inst.ra()] = result;
    if inst.rc_bit() {
        s.update_cr0(result);
    }
}

#[inline]
fn compare(s: &mut PowerPcState, crf: usize, lt: bool, gt: bool) {
    let c = if lt {
        0b1000
    } else if gt {
        0b0100
    } else {
        0b0010
    };
    s.set_cr_field(crf, c | s.xer_so() as u32);
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    let s = &mut *ctx.state;
    let rd = inst.rd();
    let ra = inst.ra();
    let rb = inst.rb();

    match op {
        // addi - Add Immediate
        Op::Addi => s.gpr[rd] = ra_or_zero(s, inst).wrapping_add(inst.simm() as u32),
        // addis - Add Immediate Shifted
        Op::Addis => s.gpr[rd] = ra_or_zero(s, inst).wrapping_add((inst.simm() as u32) << 16),
        // addic / addic. - Add Immediate Carrying
        Op::Addic | Op::AddicRc => {
            let (result, carry, _) = add_with_carry(s.gpr[ra], inst.simm() as u32, false);
            s.gpr[rd] = result;
            s.set_xer_ca(carry);
            if op == Op::AddicRc {
                s.update_cr0(result);
            }
        }
        // subfic - Subtract From Immediate Carrying
        Op::Subfic => {
            let (result, carry, _) = add_with_carry(!s.gpr[ra], inst.simm() as u32, true);
            s.gpr[rd] = result;
            s.set_xer_ca(carry);
        }
        // mulli - Multiply Low Immediate
        Op::Mulli => s.gpr[rd] = (s.gpr[ra] as i32).wrapping_mul(inst.simm()) as u32,

        Op::Cmpi => {
            let a = s.gpr[ra] as i32;
            let b = inst.simm();
            compare(s, inst.crfd(), a < b, a > b);
        }
        Op::Cmpli => {
            let a = s.gpr[ra];
            let b = inst.uimm();
            compare(s, inst.crfd(), a < b, a > b);
        }
        Op::Cmp => {
            let a = s.gpr[ra] as i32;
            let b = s.gpr[rb] as i32;
            compare(s, inst.crfd(), a < b, a > b);
        }
        Op::Cmpl => {
            let a = s.gpr[ra];
            let b = s.gpr[rb];
            compare(s, inst.crfd(), a < b, a > b);
        }

        // Logical immediates write rA from rS
        Op::Ori => s.gpr[ra] = s.gpr[rd] | inst.uimm(),
        Op::Oris => s.gpr[ra] = s.gpr[rd] | (inst.uimm() << 16),
        Op::Xori => s.gpr[ra] = s.gpr[rd] ^ inst.uimm(),
        Op::Xoris => s.gpr[ra] = s.gpr[rd] ^ (inst.uimm() << 16),
        Op::AndiRc => {
            let result = s.gpr[rd] & inst.uimm();
            s.gpr[ra] = result;
            s.update_cr0(result);
        }
        Op::AndisRc => {
            let result = s.gpr[rd] & (inst.uimm() << 16);
            s.gpr[ra] = result;
            s.update_cr0(result);
        }

        // rlwimi - Rotate Left Word Immediate then Mask Insert
        Op::Rlwimi => {
            let mask = rotate_mask(inst.mb(), inst.me());
            let rotated = s.gpr[rd].rotate_left(inst.sh());
            let result = (rotated & mask) | (s.gpr[ra] & !mask);
            finish_logical(s, inst, result);
        }
        // rlwinm - Rotate Left Word Immediate then AND with Mask
        Op::Rlwinm => {
            let mask = rotate_mask(inst.mb(), inst.me());
            let result = s.gpr[rd].rotate_left(inst.sh()) & mask;
            finish_logical(s, inst, result);
        }
        // rlwnm - Rotate Left Word then AND with Mask
        Op::Rlwnm => {
            let mask = rotate_mask(inst.mb(), inst.me());
            let result = s.gpr[rd].rotate_left(s.gpr[rb] & 0x1F) & mask;
            finish_logical(s, inst, result);
        }

        Op::And => finish_logical(s, inst, s.gpr[rd] & s.gpr[rb]),
        Op::Andc => finish_logical(s, inst, s.gpr[rd] & !s.gpr[rb]),
        Op::Or => finish_logical(s, inst, s.gpr[rd] | s.gpr[rb]),
        Op::Orc => finish_logical(s, inst, s.gpr[rd] | !s.gpr[rb]),
        Op::Nor => finish_logical(s, inst, !(s.gpr[rd] | s.gpr[rb])),
        Op::Nand => finish_logical(s, inst, !(s.gpr[rd] & s.gpr[rb])),
        Op::Xor => finish_logical(s, inst, s.gpr[rd] ^ s.gpr[rb]),
        Op::Eqv => finish_logical(s, inst, !(s.gpr[rd] ^ s.gpr[rb])),
        Op::Extsb => finish_logical(s, inst, s.gpr[rd] as u8 as i8 as i32 as u32),
        Op::Extsh => finish_logical(s, inst, s.gpr[rd] as u16 as i16 as i32 as u32),
        Op::Cntlzw => finish_logical(s, inst, s.gpr[rd].leading_zeros()),

        // slw / srw - shift amounts of 32-63 clear the result
        Op::Slw => {
            let n = s.gpr[rb] & 0x3F;
            let result = if n & 0x20 != 0 { 0 } else { s.gpr[rd] << n };
            finish_logical(s, inst, result);
        }
        Op::Srw => {
            let n = s.gpr[rb] & 0x3F;
            let result = if n & 0x20 != 0 { 0 } else { s.gpr[rd] >> n };
            finish_logical(s, inst, result);
        }
        // sraw / srawi - CA is set when a negative value loses one bits
        Op::Sraw | Op::Srawi => {
            let n = if op == Op::Srawi {
                inst.sh()
            } else {
                s.gpr[rb] & 0x3F
            };
            let value = s.gpr[rd] as i32;
            let (result, carry) = if n & 0x20 != 0 {
                ((value >> 31) as u32, value < 0)
            } else {
                let lost = (value as u32) & ((1u32 << n) - 1);
                ((value >> n) as u32, value < 0 && lost != 0)
            };
            s.set_xer_ca(carry);
            finish_logical(s, inst, result);
        }

        // XO form: rD from rA and rB
        Op::Add => {
            let (result, _, overflow) = add_with_carry(s.gpr[ra], s.gpr[rb], false);
            finish_xo(s, inst, result, overflow);
        }
        Op::Addc => {
            let (result, carry, overflow) = add_with_carry(s.gpr[ra], s.gpr[rb], false);
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Adde => {
            let (result, carry, overflow) = add_with_carry(s.gpr[ra], s.gpr[rb], s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Addme => {
            let (result, carry, overflow) = add_with_carry(s.gpr[ra], u32::MAX, s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Addze => {
            let (result, carry, overflow) = add_with_carry(s.gpr[ra], 0, s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Subf => {
            let (result, _, overflow) = add_with_carry(!s.gpr[ra], s.gpr[rb], true);
            finish_xo(s, inst, result, overflow);
        }
        Op::Subfc => {
            let (result, carry, overflow) = add_with_carry(!s.gpr[ra], s.gpr[rb], true);
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Subfe => {
            let (result, carry, overflow) = add_with_carry(!s.gpr[ra], s.gpr[rb], s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Subfme => {
            let (result, carry, overflow) = add_with_carry(!s.gpr[ra], u32::MAX, s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Subfze => {
            let (result, carry, overflow) = add_with_carry(!s.gpr[ra], 0, s.xer_ca());
            s.set_xer_ca(carry);
            finish_xo(s, inst, result, overflow);
        }
        Op::Neg => {
            let (result, _, overflow) = add_with_carry(!s.gpr[ra], 0, true);
            finish_xo(s, inst, result, overflow);
        }
        Op::Mullw => {
            let product = s.gpr[ra] as i32 as i64 * s.gpr[rb] as i32 as i64;
            let overflow = product < i32::MIN as i64 || product > i32::MAX as i64;
            finish_xo(s, inst, product as u32, overflow);
        }
        // mulhw / mulhwu have no OE form
        Op::Mulhw => {
            let product = s.gpr[ra] as i32 as i64 * s.gpr[rb] as i32 as i64;
            finish_xo(s, inst, (product >> 32) as u32, false);
        }
        Op::Mulhwu => {
            let product = s.gpr[ra] as u64 * s.gpr[rb] as u64;
            finish_xo(s, inst, (product >> 32) as u32, false);
        }
        // divw - undefined quotients follow hardware: all ones for a negative dividend
        Op::Divw => {
            let a = s.gpr[ra] as i32;
            let b = s.gpr[rb] as i32;
            if b == 0 || (a == i32::MIN && b == -1) {
                let result = if a < 0 { u32::MAX } else { 0 };
                finish_xo(s, inst, result, true);
            } else {
                finish_xo(s, inst, (a / b) as u32, false);
            }
        }
        Op::Divwu => {
            let a = s.gpr[ra];
            let b = s.gpr[rb];
            match a.checked_div(b) {
                Some(q) => finish_xo(s, inst, q, false),
                None => finish_xo(s, inst, 0, true),
            }
        }

        other => debug_assert!(false, "{} routed to the integer unit", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_mask() {
        assert_eq!(rotate_mask(0, 31), 0xFFFF_FFFF);
        assert_eq!(rotate_mask(5, 5), 0x0400_0000);
        assert_eq!(rotate_mask(16, 31), 0x0000_FFFF);
        // Wrapping mask
        assert_eq!(rotate_mask(31, 0), 0x8000_0001);
    }

    #[test]
    fn test_add_with_carry_flags() {
        assert_eq!(add_with_carry(u32::MAX, 1, false), (0, true, false));
        assert_eq!(add_with_carry(0x7FFF_FFFF, 1, false), (0x8000_0000, false, true));
        // neg of the most negative value overflows
        assert_eq!(add_with_carry(!0x8000_0000, 0, true), (0x8000_0000, false, true));
    }
}
