//! Integer load and store instructions
//!
//! A load that faults leaves rD and rA untouched; a store that faults
//! leaves memory and rA untouched.

use super::{ra_or_zero, ExecContext};
use crate::decoder::Instruction;
use crate::state::PowerPcState;
use crate::tables::Op;

/// EA = (rA|0) + d
#[inline]
pub(crate) fn ea_d(s: &PowerPcState, inst: Instruction) -> u32 {
    ra_or_zero(s, inst).wrapping_add(inst.simm() as u32)
}

/// EA = rA + d, for update forms
#[inline]
pub(crate) fn ea_du(s: &PowerPcState, inst: Instruction) -> u32 {
    s.gpr[inst.ra()].wrapping_add(inst.simm() as u32)
}

/// EA = (rA|0) + rB
#[inline]
pub(crate) fn ea_x(s: &PowerPcState, inst: Instruction) -> u32 {
    ra_or_zero(s, inst).wrapping_add(s.gpr[inst.rb()])
}

/// EA = rA + rB, for update forms
#[inline]
pub(crate) fn ea_xu(s: &PowerPcState, inst: Instruction) -> u32 {
    s.gpr[inst.ra()].wrapping_add(s.gpr[inst.rb()])
}

fn load(
    ctx: &mut ExecContext,
    inst: Instruction,
    ea: u32,
    update: bool,
    read: impl FnOnce(&mut ExecContext, u32) -> Option<u32>,
) {
    if let Some(value) = read(ctx, ea) {
        ctx.state.gpr[inst.rd()] = value;
        if update {
            ctx.state.gpr[inst.ra()] = ea;
        }
    }
}

fn store(
    ctx: &mut ExecContext,
    inst: Instruction,
    ea: u32,
    update: bool,
    write: impl FnOnce(&mut ExecContext, u32, u32) -> bool,
) {
    let value = ctx.state.gpr[inst.rs()];
    if write(ctx, ea, value) && update {
        ctx.state.gpr[inst.ra()] = ea;
    }
}

fn byte(ctx: &mut ExecContext, ea: u32) -> Option<u32> {
    ctx.read_u8(ea).map(u32::from)
}

fn half(ctx: &mut ExecContext, ea: u32) -> Option<u32> {
    ctx.read_u16(ea).map(u32::from)
}

fn half_algebraic(ctx: &mut ExecContext, ea: u32) -> Option<u32> {
    ctx.read_u16(ea).map(|v| v as i16 as i32 as u32)
}

fn word(ctx: &mut ExecContext, ea: u32) -> Option<u32> {
    ctx.read_u32(ea)
}

fn put_byte(ctx: &mut ExecContext, ea: u32, value: u32) -> bool {
    ctx.write_u8(ea, value as u8)
}

fn put_half(ctx: &mut ExecContext, ea: u32, value: u32) -> bool {
    ctx.write_u16(ea, value as u16)
}

fn put_word(ctx: &mut ExecContext, ea: u32, value: u32) -> bool {
    ctx.write_u32(ea, value)
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    let s = &*ctx.state;
    // Resolve every addressing mode before borrowing ctx mutably
    let (d, du, x, xu) = (ea_d(s, inst), ea_du(s, inst), ea_x(s, inst), ea_xu(s, inst));

    match op {
        Op::Lwz => load(ctx, inst, d, false, word),
        Op::Lwzu => load(ctx, inst, du, true, word),
        Op::Lwzx => load(ctx, inst, x, false, word),
        Op::Lwzux => load(ctx, inst, xu, true, word),
        Op::Lhz => load(ctx, inst, d, false, half),
        Op::Lhzu => load(ctx, inst, du, true, half),
        Op::Lhzx => load(ctx, inst, x, false, half),
        Op::Lhzux => load(ctx, inst, xu, true, half),
        Op::Lha => load(ctx, inst, d, false, half_algebraic),
        Op::Lhau => load(ctx, inst, du, true, half_algebraic),
        Op::Lhax => load(ctx, inst, x, false, half_algebraic),
        Op::Lhaux => load(ctx, inst, xu, true, half_algebraic),
        Op::Lbz => load(ctx, inst, d, false, byte),
        Op::Lbzu => load(ctx, inst, du, true, byte),
        Op::Lbzx => load(ctx, inst, x, false, byte),
        Op::Lbzux => load(ctx, inst, xu, true, byte),
        // Byte-reversed loads
        Op::Lwbrx => load(ctx, inst, x, false, |c, ea| {
            c.read_u32(ea).map(u32::swap_bytes)
        }),
        Op::Lhbrx => load(ctx, inst, x, false, |c, ea| {
            c.read_u16(ea).map(|v| v.swap_bytes() as u32)
        }),

        Op::Stw => store(ctx, inst, d, false, put_word),
        Op::Stwu => store(ctx, inst, du, true, put_word),
        Op::Stwx => store(ctx, inst, x, false, put_word),
        Op::Stwux => store(ctx, inst, xu, true, put_word),
        Op::Sth => store(ctx, inst, d, false, put_half),
        Op::Sthu => store(ctx, inst, du, true, put_half),
        Op::Sthx => store(ctx, inst, x, false, put_half),
        Op::Sthux => store(ctx, inst, xu, true, put_half),
        Op::Stb => store(ctx, inst, d, false, put_byte),
        Op::Stbu => store(ctx, inst, du, true, put_byte),
        Op::Stbx => store(ctx, inst, x, false, put_byte),
        Op::Stbux => store(ctx, inst, xu, true, put_byte),
        Op::Stwbrx => store(ctx, inst, x, false, |c, ea, v| {
            c.write_u32(ea, v.swap_bytes())
        }),
        Op::Sthbrx => store(ctx, inst, x, false, |c, ea, v| {
            c.write_u16(ea, (v as u16).swap_bytes())
        }),

        // lmw - Load Multiple Word
        Op::Lmw => {
            let ea = d;
            if ea & 3 != 0 {
                ctx.state.generate_alignment(ea);
                return;
            }
            let first = inst.rd();
            let mut values = [0u32; 32];
            for (i, slot) in values[first..].iter_mut().enumerate() {
                match ctx.read_u32(ea.wrapping_add(i as u32 * 4)) {
                    Some(value) => *slot = value,
                    None => return,
                }
            }
            ctx.state.gpr[first..].copy_from_slice(&values[first..]);
        }
        // stmw - Store Multiple Word
        Op::Stmw => {
            let ea = d;
            if ea & 3 != 0 {
                ctx.state.generate_alignment(ea);
                return;
            }
            let first = inst.rs();
            if !ctx.probe_words(ea, (32 - first) as u32) {
                return;
            }
            for reg in first..32 {
                let value = ctx.state.gpr[reg];
                if !ctx.write_u32(ea.wrapping_add((reg - first) as u32 * 4), value) {
                    return;
                }
            }
        }

        // lwarx - Load Word and Reserve Indexed
        Op::Lwarx => {
            let ea = x;
            if ea & 3 != 0 {
                ctx.state.generate_alignment(ea);
                return;
            }
            if let Some(value) = ctx.read_u32(ea) {
                ctx.state.gpr[inst.rd()] = value;
                ctx.state.reserve = Some(ea);
            }
        }
        // stwcx. - Store Word Conditional Indexed
        Op::StwcxRc => {
            let ea = x;
            if ea & 3 != 0 {
                ctx.state.generate_alignment(ea);
                return;
            }
            let so = ctx.state.xer_so() as u32;
            if ctx.state.reserve == Some(ea) {
                let value = ctx.state.gpr[inst.rs()];
                if ctx.write_u32(ea, value) {
                    ctx.state.reserve = None;
                    ctx.state.set_cr_field(0, 0b0010 | so);
                }
            } else {
                ctx.state.set_cr_field(0, so);
            }
        }

        other => debug_assert!(false, "{} routed to the load/store unit", other.name()),
    }
}
