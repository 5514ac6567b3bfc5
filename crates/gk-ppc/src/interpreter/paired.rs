//! Paired-single instructions and quantized loads/stores

use super::float::{compare, round_single, set_fprf, update_cr1};
use super::{ra_or_zero, ExecContext};
use crate::decoder::Instruction;
use crate::state::{spr, PowerPcState};
use crate::tables::Op;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Quantized element type from a GQR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuantType {
    Float,
    U8,
    U16,
    S8,
    S16,
}

impl QuantType {
    /// Types 1-3 are reserved and behave as float
    fn from_bits(bits: u32) -> Self {
        match bits & 7 {
            4 => QuantType::U8,
            5 => QuantType::U16,
            6 => QuantType::S8,
            7 => QuantType::S16,
            _ => QuantType::Float,
        }
    }

    fn size(self) -> u32 {
        match self {
            QuantType::Float => 4,
            QuantType::U16 | QuantType::S16 => 2,
            QuantType::U8 | QuantType::S8 => 1,
        }
    }
}

/// Decoded GQR half: element type and signed 6-bit scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quantization {
    pub kind: QuantType,
    pub scale: i32,
}

impl Quantization {
    fn signed_scale(bits: u32) -> i32 {
        (((bits & 0x3F) << 26) as i32) >> 26
    }

    /// Load half of a GQR (LD_TYPE bits 16-18, LD_SCALE bits 24-29)
    pub fn load(gqr: u32) -> Self {
        Self {
            kind: QuantType::from_bits(gqr >> 16),
            scale: Self::signed_scale(gqr >> 24),
        }
    }

    /// Store half of a GQR (ST_TYPE bits 0-2, ST_SCALE bits 8-13)
    pub fn store(gqr: u32) -> Self {
        Self {
            kind: QuantType::from_bits(gqr),
            scale: Self::signed_scale(gqr >> 8),
        }
    }

    /// Raw element bits to a value, dividing by 2^scale
    pub fn dequantize(self, raw: u32) -> f64 {
        let value = match self.kind {
            QuantType::Float => return f32::from_bits(raw) as f64,
            QuantType::U8 => raw as u8 as f64,
            QuantType::U16 => raw as u16 as f64,
            QuantType::S8 => raw as u8 as i8 as f64,
            QuantType::S16 => raw as u16 as i16 as f64,
        };
        value * 2f64.powi(-self.scale)
    }

    /// A value to raw element bits, multiplying by 2^scale and saturating
    pub fn quantize(self, value: f64) -> u32 {
        let (min, max) = match self.kind {
            QuantType::Float => return (value as f32).to_bits(),
            QuantType::U8 => (u8::MIN as f64, u8::MAX as f64),
            QuantType::U16 => (u16::MIN as f64, u16::MAX as f64),
            QuantType::S8 => (i8::MIN as f64, i8::MAX as f64),
            QuantType::S16 => (i16::MIN as f64, i16::MAX as f64),
        };
        let scaled = (value * 2f64.powi(self.scale)).clamp(min, max);
        // NaN clamps to NaN and casts to zero
        scaled as i32 as u32
    }
}

fn read_element(ctx: &mut ExecContext, ea: u32, kind: QuantType) -> Option<u32> {
    match kind.size() {
        4 => ctx.read_u32(ea),
        2 => ctx.read_u16(ea).map(u32::from),
        _ => ctx.read_u8(ea).map(u32::from),
    }
}

fn write_element(ctx: &mut ExecContext, ea: u32, kind: QuantType, raw: u32) -> bool {
    match kind.size() {
        4 => ctx.write_u32(ea, raw),
        2 => ctx.write_u16(ea, raw as u16),
        _ => ctx.write_u8(ea, raw as u8),
    }
}

/// psq_l family. `w` loads a single element and sets ps1 to 1.0.
fn quantized_load(ctx: &mut ExecContext, inst: Instruction, ea: u32, w: bool, gqr: usize, update: bool) {
    let q = Quantization::load(ctx.state.spr[spr::GQR0 + gqr]);
    let Some(first) = read_element(ctx, ea, q.kind) else {
        return;
    };
    let second = if w {
        None
    } else {
        match read_element(ctx, ea.wrapping_add(q.kind.size()), q.kind) {
            Some(raw) => Some(raw),
            None => return,
        }
    };

    let reg = &mut ctx.state.ps[inst.rd()];
    reg.set_ps0(q.dequantize(first));
    reg.set_ps1(second.map_or(1.0, |raw| q.dequantize(raw)));
    if update {
        ctx.state.gpr[inst.ra()] = ea;
    }
}

/// psq_st family. `w` stores ps0 only.
fn quantized_store(ctx: &mut ExecContext, inst: Instruction, ea: u32, w: bool, gqr: usize, update: bool) {
    let q = Quantization::store(ctx.state.spr[spr::GQR0 + gqr]);
    let reg = ctx.state.ps[inst.rs()];
    let first = q.quantize(reg.ps0());
    let second = q.quantize(reg.ps1());

    // Write both elements or neither
    if w {
        if !write_element(ctx, ea, q.kind, first) {
            return;
        }
    } else {
        let size = q.kind.size() as usize;
        let mut bytes = [0u8; 8];
        for (i, raw) in [first, second].into_iter().enumerate() {
            let be = raw.to_be_bytes();
            bytes[i * size..(i + 1) * size].copy_from_slice(&be[4 - size..]);
        }
        if !ctx.write_bytes(ea, &bytes[..size * 2]) {
            return;
        }
    }
    if update {
        ctx.state.gpr[inst.ra()] = ea;
    }
}

pub(super) fn execute(ctx: &mut ExecContext, op: Op, inst: Instruction) {
    let s = &*ctx.state;
    let d = ra_or_zero(s, inst).wrapping_add(inst.ps_d() as u32);
    let du = s.gpr[inst.ra()].wrapping_add(inst.ps_d() as u32);
    let x = ra_or_zero(s, inst).wrapping_add(s.gpr[inst.rb()]);
    let xu = s.gpr[inst.ra()].wrapping_add(s.gpr[inst.rb()]);

    match op {
        Op::PsqL => quantized_load(ctx, inst, d, inst.ps_w(), inst.ps_i(), false),
        Op::PsqLu => quantized_load(ctx, inst, du, inst.ps_w(), inst.ps_i(), true),
        Op::PsqLx => quantized_load(ctx, inst, x, inst.ps_wx(), inst.ps_ix(), false),
        Op::PsqLux => quantized_load(ctx, inst, xu, inst.ps_wx(), inst.ps_ix(), true),
        Op::PsqSt => quantized_store(ctx, inst, d, inst.ps_w(), inst.ps_i(), false),
        Op::PsqStu => quantized_store(ctx, inst, du, inst.ps_w(), inst.ps_i(), true),
        Op::PsqStx => quantized_store(ctx, inst, x, inst.ps_wx(), inst.ps_ix(), false),
        Op::PsqStux => quantized_store(ctx, inst, xu, inst.ps_wx(), inst.ps_ix(), true),
        _ => arithmetic(ctx.state, op, inst),
    }
}

fn arithmetic(s: &mut PowerPcState, op: Op, inst: Instruction) {
    let a = s.ps[inst.ra()];
    let b = s.ps[inst.rb()];
    let c = s.ps[inst.rc()];
    let fd = inst.rd();

    // Arithmetic results are rounded to single below
    let (ps0, ps1) = match op {
        Op::PsAdd => (a.ps0() + b.ps0(), a.ps1() + b.ps1()),
        Op::PsSub => (a.ps0() - b.ps0(), a.ps1() - b.ps1()),
        Op::PsMul => (a.ps0() * c.ps0(), a.ps1() * c.ps1()),
        Op::PsDiv => (a.ps0() / b.ps0(), a.ps1() / b.ps1()),
        Op::PsMadd => (a.ps0().mul_add(c.ps0(), b.ps0()), a.ps1().mul_add(c.ps1(), b.ps1())),
        Op::PsMsub => (a.ps0().mul_add(c.ps0(), -b.ps0()), a.ps1().mul_add(c.ps1(), -b.ps1())),
        Op::PsNmadd => (-a.ps0().mul_add(c.ps0(), b.ps0()), -a.ps1().mul_add(c.ps1(), b.ps1())),
        Op::PsNmsub => (-a.ps0().mul_add(c.ps0(), -b.ps0()), -a.ps1().mul_add(c.ps1(), -b.ps1())),
        Op::PsMuls0 => (a.ps0() * c.ps0(), a.ps1() * c.ps0()),
        Op::PsMuls1 => (a.ps0() * c.ps1(), a.ps1() * c.ps1()),
        Op::PsMadds0 => (a.ps0().mul_add(c.ps0(), b.ps0()), a.ps1().mul_add(c.ps0(), b.ps1())),
        Op::PsMadds1 => (a.ps0().mul_add(c.ps1(), b.ps0()), a.ps1().mul_add(c.ps1(), b.ps1())),
        Op::PsSum0 => (a.ps0() + b.ps1(), c.ps1()),
        Op::PsSum1 => (c.ps0(), a.ps0() + b.ps1()),
        Op::PsRes => (1.0 / b.ps0(), 1.0 / b.ps1()),
        Op::PsRsqrte => (1.0 / b.ps0().sqrt(), 1.0 / b.ps1().sqrt()),
        Op::PsSel => {
            let pick = |sel: f64, hi: f64, lo: f64| if sel >= 0.0 { hi } else { lo };
            s.ps[fd].set_ps0(pick(a.ps0(), c.ps0(), b.ps0()));
            s.ps[fd].set_ps1(pick(a.ps1(), c.ps1(), b.ps1()));
            update_cr1(s, inst);
            return;
        }

        // Moves and merges copy raw bits
        Op::PsMr | Op::PsNeg | Op::PsAbs | Op::PsNabs => {
            let (p0, p1) = match op {
                Op::PsMr => (b.ps0, b.ps1),
                Op::PsNeg => (b.ps0 ^ SIGN_BIT, b.ps1 ^ SIGN_BIT),
                Op::PsAbs => (b.ps0 & !SIGN_BIT, b.ps1 & !SIGN_BIT),
                _ => (b.ps0 | SIGN_BIT, b.ps1 | SIGN_BIT),
            };
            s.ps[fd].ps0 = p0;
            s.ps[fd].ps1 = p1;
            update_cr1(s, inst);
            return;
        }
        Op::PsMerge00 | Op::PsMerge01 | Op::PsMerge10 | Op::PsMerge11 => {
            let p0 = if matches!(op, Op::PsMerge00 | Op::PsMerge01) { a.ps0 } else { a.ps1 };
            let p1 = if matches!(op, Op::PsMerge00 | Op::PsMerge10) { b.ps0 } else { b.ps1 };
            s.ps[fd].ps0 = p0;
            s.ps[fd].ps1 = p1;
            update_cr1(s, inst);
            return;
        }

        Op::PsCmpu0 | Op::PsCmpo0 => {
            compare(s, inst.crfd(), a.ps0(), b.ps0());
            return;
        }
        Op::PsCmpu1 | Op::PsCmpo1 => {
            compare(s, inst.crfd(), a.ps1(), b.ps1());
            return;
        }

        other => {
            debug_assert!(false, "{} routed to the paired-single unit", other.name());
            return;
        }
    };

    let ps0 = round_single(ps0);
    s.ps[fd].set_ps0(ps0);
    s.ps[fd].set_ps1(round_single(ps1));
    set_fprf(s, ps0);
    update_cr1(s, inst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gqr_fields() {
        // Load u8 with scale 8, store s16 with scale -2
        let gqr = (8 << 24) | (4 << 16) | ((0x3E) << 8) | 7;
        let ld = Quantization::load(gqr);
        assert_eq!(ld.kind, QuantType::U8);
        assert_eq!(ld.scale, 8);
        let st = Quantization::store(gqr);
        assert_eq!(st.kind, QuantType::S16);
        assert_eq!(st.scale, -2);
    }

    #[test]
    fn test_dequantize_scaled() {
        let q = Quantization {
            kind: QuantType::U8,
            scale: 8,
        };
        assert_eq!(q.dequantize(0x80), 0.5);
        let q = Quantization {
            kind: QuantType::S16,
            scale: 0,
        };
        assert_eq!(q.dequantize(0xFFFF), -1.0);
    }

    #[test]
    fn test_quantize_saturates() {
        let q = Quantization {
            kind: QuantType::S8,
            scale: 0,
        };
        assert_eq!(q.quantize(1000.0) as u8, 0x7F);
        assert_eq!(q.quantize(-1000.0) as u8, 0x80);
        let q = Quantization {
            kind: QuantType::U16,
            scale: 4,
        };
        assert_eq!(q.quantize(2.5), 40);
        assert_eq!(q.quantize(-3.0), 0);
    }

    #[test]
    fn test_float_passthrough() {
        let q = Quantization::load(0);
        assert_eq!(q.kind, QuantType::Float);
        assert_eq!(q.dequantize(1.5f32.to_bits()), 1.5);
        assert_eq!(Quantization::store(0).quantize(-2.0), (-2.0f32).to_bits());
    }

    #[test]
    fn test_ps_merge_and_sum() {
        let mut s = PowerPcState::new();
        s.ps[1].set_ps0(1.0);
        s.ps[1].set_ps1(2.0);
        s.ps[2].set_ps0(3.0);
        s.ps[2].set_ps1(4.0);
        s.ps[3].set_ps0(5.0);
        s.ps[3].set_ps1(6.0);
        let form = |d: u32, a: u32, b: u32, c: u32| {
            Instruction((4 << 26) | (d << 21) | (a << 16) | (b << 11) | (c << 6))
        };

        arithmetic(&mut s, Op::PsMerge10, form(4, 1, 2, 0));
        assert_eq!((s.ps[4].ps0(), s.ps[4].ps1()), (2.0, 3.0));

        arithmetic(&mut s, Op::PsSum0, form(5, 1, 2, 3));
        assert_eq!((s.ps[5].ps0(), s.ps[5].ps1()), (5.0, 6.0));

        arithmetic(&mut s, Op::PsMuls1, form(6, 1, 0, 2));
        assert_eq!((s.ps[6].ps0(), s.ps[6].ps1()), (4.0, 8.0));
    }
}
