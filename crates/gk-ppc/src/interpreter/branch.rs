//! Branch and condition register instructions

use super::ExecContext;
use crate::decoder::Instruction;
use crate::state::PowerPcState;
use crate::tables::Op;

/// Evaluate BO/BI, decrementing CTR when BO asks for it
fn branch_condition(s: &mut PowerPcState, inst: Instruction, use_ctr: bool) -> bool {
    let bo = inst.bo();
    let ctr_ok = if use_ctr && bo & 0x04 == 0 {
        let ctr = s.ctr().wrapping_sub(1);
        s.set_ctr(ctr);
        (ctr != 0) ^ (bo & 0x02 != 0)
    } else {
        true
    };
    let cond_ok = bo & 0x10 != 0 || s.cr_bit(inst.bi()) == (bo & 0x08 != 0);
    ctr_ok && cond_ok
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    let s = &mut *ctx.state;
    let pc = s.pc;

    match op {
        // b - Branch
        Op::B => {
            let offset = inst.li() as u32;
            s.npc = if inst.aa() { offset } else { pc.wrapping_add(offset) };
            if inst.lk() {
                s.set_lr(pc.wrapping_add(4));
            }
        }
        // bc - Branch Conditional
        Op::Bc => {
            if branch_condition(s, inst, true) {
                let offset = inst.bd() as u32;
                s.npc = if inst.aa() { offset } else { pc.wrapping_add(offset) };
            }
            if inst.lk() {
                s.set_lr(pc.wrapping_add(4));
            }
        }
        // bclr - Branch Conditional to Link Register
        Op::Bclr => {
            // Read LR before LK overwrites it
            let target = s.lr() & !3;
            if branch_condition(s, inst, true) {
                s.npc = target;
            }
            if inst.lk() {
                s.set_lr(pc.wrapping_add(4));
            }
        }
        // bcctr - Branch Conditional to Count Register
        Op::Bcctr => {
            let target = s.ctr() & !3;
            if branch_condition(s, inst, false) {
                s.npc = target;
            }
            if inst.lk() {
                s.set_lr(pc.wrapping_add(4));
            }
        }

        Op::Mcrf => {
            let field = s.cr_field(inst.crfs());
            s.set_cr_field(inst.crfd(), field);
        }
        Op::Crand | Op::Crandc | Op::Creqv | Op::Crnand | Op::Crnor | Op::Cror | Op::Crorc | Op::Crxor => {
            let a = s.cr_bit(inst.crba());
            let b = s.cr_bit(inst.crbb());
            let result = match op {
                Op::Crand => a && b,
                Op::Crandc => a && !b,
                Op::Creqv => a == b,
                Op::Crnand => !(a && b),
                Op::Crnor => !(a || b),
                Op::Cror => a || b,
                Op::Crorc => a || !b,
                _ => a != b,
            };
            s.set_cr_bit(inst.crbd(), result);
        }

        other => debug_assert!(false, "{} routed to the branch unit", other.name()),
    }
}
