//! Opcode decode tables
//!
//! Every implemented instruction is one [`Op`] variant with a static
//! [`OpInfo`] descriptor. Decoding is a single lookup in a flat table
//! keyed by `(primary << 10) | extended`, where the extended field is
//! taken from wherever the primary opcode's group keeps it.

use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Static properties of an opcode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u32 {
        /// Control may leave the sequential path
        const END_BLOCK  = 0b0000_0001;
        /// Changes state that cached blocks depend on (MSR, SPRs, icache)
        const REDISPATCH = 0b0000_0010;
        /// Requires MSR.FP
        const USE_FPU    = 0b0000_0100;
        /// Accesses guest memory
        const LOADSTORE  = 0b0000_1000;
        /// Supervisor only
        const PRIVILEGED = 0b0001_0000;
    }
}

/// Broad instruction class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Integer,
    Compare,
    Branch,
    ConditionRegister,
    System,
    Spr,
    Load,
    Store,
    LoadFp,
    StoreFp,
    SingleFp,
    DoubleFp,
    PairedSingle,
    LoadPs,
    StorePs,
    DataCache,
    InstructionCache,
    Unknown,
}

/// Where an opcode lives in the decode space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    None,
    Primary(u32),
    /// Primary 4, 10-bit extended
    Ext4(u32),
    /// Primary 4, 5-bit extended (A form, replicated across FRC)
    Ext4x5(u32),
    /// Primary 4, 6-bit extended (indexed paired-single load/store)
    Ext4x6(u32),
    Ext19(u32),
    Ext31(u32),
    /// Primary 31, XO form: also decoded with OE set
    Ext31Oe(u32),
    Ext59(u32),
    /// Primary 63, 10-bit extended
    Ext63(u32),
    /// Primary 63, 5-bit extended (A form, replicated across FRC)
    Ext63x5(u32),
}

/// Static descriptor of an opcode
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub slot: Slot,
    pub kind: OpType,
    /// Fixed cycle cost charged against the timing budget
    pub cycles: u32,
    pub flags: OpFlags,
}

impl OpInfo {
    #[inline]
    pub fn ends_block(&self) -> bool {
        self.flags.intersects(OpFlags::END_BLOCK | OpFlags::REDISPATCH)
    }
}

const NONE: OpFlags = OpFlags::empty();
const END: OpFlags = OpFlags::END_BLOCK;
const REDISPATCH: OpFlags = OpFlags::END_BLOCK.union(OpFlags::REDISPATCH);
const PRIV: OpFlags = OpFlags::PRIVILEGED;
const PRIV_REDISPATCH: OpFlags = REDISPATCH.union(OpFlags::PRIVILEGED);
const LS: OpFlags = OpFlags::LOADSTORE;
const FPU: OpFlags = OpFlags::USE_FPU;
const FPU_LS: OpFlags = OpFlags::USE_FPU.union(OpFlags::LOADSTORE);

macro_rules! op_table {
    ($( $variant:ident: $name:literal, $slot:expr, $kind:ident, $cycles:expr, $flags:expr; )*) => {
        /// Decoded opcode
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u16)]
        pub enum Op {
            Unknown,
            $( $variant, )*
        }

        static OP_INFO: &[OpInfo] = &[
            OpInfo { name: "unknown", slot: Slot::None, kind: OpType::Unknown, cycles: 1, flags: END },
            $( OpInfo { name: $name, slot: $slot, kind: OpType::$kind, cycles: $cycles, flags: $flags }, )*
        ];

        /// Every opcode, in discriminant order
        pub const ALL_OPS: &[Op] = &[Op::Unknown, $( Op::$variant, )*];
    };
}

use Slot::*;

op_table! {
    // Integer immediate
    Twi: "twi", Primary(3), System, 1, END;
    Mulli: "mulli", Primary(7), Integer, 3, NONE;
    Subfic: "subfic", Primary(8), Integer, 1, NONE;
    Cmpli: "cmpli", Primary(10), Compare, 1, NONE;
    Cmpi: "cmpi", Primary(11), Compare, 1, NONE;
    Addic: "addic", Primary(12), Integer, 1, NONE;
    AddicRc: "addic.", Primary(13), Integer, 1, NONE;
    Addi: "addi", Primary(14), Integer, 1, NONE;
    Addis: "addis", Primary(15), Integer, 1, NONE;
    Bc: "bc", Primary(16), Branch, 1, END;
    Sc: "sc", Primary(17), System, 2, REDISPATCH;
    B: "b", Primary(18), Branch, 1, END;
    Rlwimi: "rlwimi", Primary(20), Integer, 1, NONE;
    Rlwinm: "rlwinm", Primary(21), Integer, 1, NONE;
    Rlwnm: "rlwnm", Primary(23), Integer, 1, NONE;
    Ori: "ori", Primary(24), Integer, 1, NONE;
    Oris: "oris", Primary(25), Integer, 1, NONE;
    Xori: "xori", Primary(26), Integer, 1, NONE;
    Xoris: "xoris", Primary(27), Integer, 1, NONE;
    AndiRc: "andi.", Primary(28), Integer, 1, NONE;
    AndisRc: "andis.", Primary(29), Integer, 1, NONE;

    // Load/store with displacement
    Lwz: "lwz", Primary(32), Load, 1, LS;
    Lwzu: "lwzu", Primary(33), Load, 1, LS;
    Lbz: "lbz", Primary(34), Load, 1, LS;
    Lbzu: "lbzu", Primary(35), Load, 1, LS;
    Stw: "stw", Primary(36), Store, 1, LS;
    Stwu: "stwu", Primary(37), Store, 1, LS;
    Stb: "stb", Primary(38), Store, 1, LS;
    Stbu: "stbu", Primary(39), Store, 1, LS;
    Lhz: "lhz", Primary(40), Load, 1, LS;
    Lhzu: "lhzu", Primary(41), Load, 1, LS;
    Lha: "lha", Primary(42), Load, 1, LS;
    Lhau: "lhau", Primary(43), Load, 1, LS;
    Sth: "sth", Primary(44), Store, 1, LS;
    Sthu: "sthu", Primary(45), Store, 1, LS;
    Lmw: "lmw", Primary(46), Load, 11, LS;
    Stmw: "stmw", Primary(47), Store, 11, LS;
    Lfs: "lfs", Primary(48), LoadFp, 1, FPU_LS;
    Lfsu: "lfsu", Primary(49), LoadFp, 1, FPU_LS;
    Lfd: "lfd", Primary(50), LoadFp, 1, FPU_LS;
    Lfdu: "lfdu", Primary(51), LoadFp, 1, FPU_LS;
    Stfs: "stfs", Primary(52), StoreFp, 1, FPU_LS;
    Stfsu: "stfsu", Primary(53), StoreFp, 1, FPU_LS;
    Stfd: "stfd", Primary(54), StoreFp, 1, FPU_LS;
    Stfdu: "stfdu", Primary(55), StoreFp, 1, FPU_LS;
    PsqL: "psq_l", Primary(56), LoadPs, 1, FPU_LS;
    PsqLu: "psq_lu", Primary(57), LoadPs, 1, FPU_LS;
    PsqSt: "psq_st", Primary(60), StorePs, 1, FPU_LS;
    PsqStu: "psq_stu", Primary(61), StorePs, 1, FPU_LS;

    // Paired single (primary 4)
    PsCmpu0: "ps_cmpu0", Ext4(0), PairedSingle, 1, FPU;
    PsCmpo0: "ps_cmpo0", Ext4(32), PairedSingle, 1, FPU;
    PsNeg: "ps_neg", Ext4(40), PairedSingle, 1, FPU;
    PsCmpu1: "ps_cmpu1", Ext4(64), PairedSingle, 1, FPU;
    PsMr: "ps_mr", Ext4(72), PairedSingle, 1, FPU;
    PsCmpo1: "ps_cmpo1", Ext4(96), PairedSingle, 1, FPU;
    PsNabs: "ps_nabs", Ext4(136), PairedSingle, 1, FPU;
    PsAbs: "ps_abs", Ext4(264), PairedSingle, 1, FPU;
    PsMerge00: "ps_merge00", Ext4(528), PairedSingle, 1, FPU;
    PsMerge01: "ps_merge01", Ext4(560), PairedSingle, 1, FPU;
    PsMerge10: "ps_merge10", Ext4(592), PairedSingle, 1, FPU;
    PsMerge11: "ps_merge11", Ext4(624), PairedSingle, 1, FPU;
    PsSum0: "ps_sum0", Ext4x5(10), PairedSingle, 1, FPU;
    PsSum1: "ps_sum1", Ext4x5(11), PairedSingle, 1, FPU;
    PsMuls0: "ps_muls0", Ext4x5(12), PairedSingle, 1, FPU;
    PsMuls1: "ps_muls1", Ext4x5(13), PairedSingle, 1, FPU;
    PsMadds0: "ps_madds0", Ext4x5(14), PairedSingle, 1, FPU;
    PsMadds1: "ps_madds1", Ext4x5(15), PairedSingle, 1, FPU;
    PsDiv: "ps_div", Ext4x5(18), PairedSingle, 17, FPU;
    PsSub: "ps_sub", Ext4x5(20), PairedSingle, 1, FPU;
    PsAdd: "ps_add", Ext4x5(21), PairedSingle, 1, FPU;
    PsSel: "ps_sel", Ext4x5(23), PairedSingle, 1, FPU;
    PsMul: "ps_mul", Ext4x5(25), PairedSingle, 1, FPU;
    PsRes: "ps_res", Ext4x5(24), PairedSingle, 1, FPU;
    PsRsqrte: "ps_rsqrte", Ext4x5(26), PairedSingle, 1, FPU;
    PsMsub: "ps_msub", Ext4x5(28), PairedSingle, 1, FPU;
    PsMadd: "ps_madd", Ext4x5(29), PairedSingle, 1, FPU;
    PsNmsub: "ps_nmsub", Ext4x5(30), PairedSingle, 1, FPU;
    PsNmadd: "ps_nmadd", Ext4x5(31), PairedSingle, 1, FPU;
    PsqLx: "psq_lx", Ext4x6(6), LoadPs, 1, FPU_LS;
    PsqStx: "psq_stx", Ext4x6(7), StorePs, 1, FPU_LS;
    PsqLux: "psq_lux", Ext4x6(38), LoadPs, 1, FPU_LS;
    PsqStux: "psq_stux", Ext4x6(39), StorePs, 1, FPU_LS;

    // Branch and condition register (primary 19)
    Mcrf: "mcrf", Ext19(0), ConditionRegister, 1, NONE;
    Bclr: "bclr", Ext19(16), Branch, 1, END;
    Crnor: "crnor", Ext19(33), ConditionRegister, 1, NONE;
    Rfi: "rfi", Ext19(50), System, 2, PRIV_REDISPATCH;
    Crandc: "crandc", Ext19(129), ConditionRegister, 1, NONE;
    Isync: "isync", Ext19(150), InstructionCache, 1, REDISPATCH;
    Crxor: "crxor", Ext19(193), ConditionRegister, 1, NONE;
    Crnand: "crnand", Ext19(225), ConditionRegister, 1, NONE;
    Crand: "crand", Ext19(257), ConditionRegister, 1, NONE;
    Creqv: "creqv", Ext19(289), ConditionRegister, 1, NONE;
    Crorc: "crorc", Ext19(417), ConditionRegister, 1, NONE;
    Cror: "cror", Ext19(449), ConditionRegister, 1, NONE;
    Bcctr: "bcctr", Ext19(528), Branch, 1, END;

    // Primary 31
    Cmp: "cmp", Ext31(0), Compare, 1, NONE;
    Tw: "tw", Ext31(4), System, 2, END;
    Subfc: "subfc", Ext31Oe(8), Integer, 1, NONE;
    Addc: "addc", Ext31Oe(10), Integer, 1, NONE;
    Mulhwu: "mulhwu", Ext31(11), Integer, 5, NONE;
    Mfcr: "mfcr", Ext31(19), System, 1, NONE;
    Lwarx: "lwarx", Ext31(20), Load, 1, LS;
    Lwzx: "lwzx", Ext31(23), Load, 1, LS;
    Slw: "slw", Ext31(24), Integer, 1, NONE;
    Cntlzw: "cntlzw", Ext31(26), Integer, 1, NONE;
    And: "and", Ext31(28), Integer, 1, NONE;
    Cmpl: "cmpl", Ext31(32), Compare, 1, NONE;
    Subf: "subf", Ext31Oe(40), Integer, 1, NONE;
    Dcbst: "dcbst", Ext31(54), DataCache, 5, NONE;
    Lwzux: "lwzux", Ext31(55), Load, 1, LS;
    Andc: "andc", Ext31(60), Integer, 1, NONE;
    Mulhw: "mulhw", Ext31(75), Integer, 5, NONE;
    Mfmsr: "mfmsr", Ext31(83), System, 1, PRIV;
    Dcbf: "dcbf", Ext31(86), DataCache, 5, NONE;
    Lbzx: "lbzx", Ext31(87), Load, 1, LS;
    Neg: "neg", Ext31Oe(104), Integer, 1, NONE;
    Lbzux: "lbzux", Ext31(119), Load, 1, LS;
    Nor: "nor", Ext31(124), Integer, 1, NONE;
    Subfe: "subfe", Ext31Oe(136), Integer, 1, NONE;
    Adde: "adde", Ext31Oe(138), Integer, 1, NONE;
    Mtcrf: "mtcrf", Ext31(144), System, 1, NONE;
    Mtmsr: "mtmsr", Ext31(146), System, 1, PRIV_REDISPATCH;
    StwcxRc: "stwcx.", Ext31(150), Store, 1, LS;
    Stwx: "stwx", Ext31(151), Store, 1, LS;
    Stwux: "stwux", Ext31(183), Store, 1, LS;
    Subfze: "subfze", Ext31Oe(200), Integer, 1, NONE;
    Addze: "addze", Ext31Oe(202), Integer, 1, NONE;
    Mtsr: "mtsr", Ext31(210), System, 1, PRIV;
    Stbx: "stbx", Ext31(215), Store, 1, LS;
    Subfme: "subfme", Ext31Oe(232), Integer, 1, NONE;
    Addme: "addme", Ext31Oe(234), Integer, 1, NONE;
    Mullw: "mullw", Ext31Oe(235), Integer, 5, NONE;
    Mtsrin: "mtsrin", Ext31(242), System, 1, PRIV;
    Dcbtst: "dcbtst", Ext31(246), DataCache, 5, NONE;
    Stbux: "stbux", Ext31(247), Store, 1, LS;
    Add: "add", Ext31Oe(266), Integer, 1, NONE;
    Dcbt: "dcbt", Ext31(278), DataCache, 5, NONE;
    Lhzx: "lhzx", Ext31(279), Load, 1, LS;
    Eqv: "eqv", Ext31(284), Integer, 1, NONE;
    Tlbie: "tlbie", Ext31(306), System, 1, PRIV;
    Lhzux: "lhzux", Ext31(311), Load, 1, LS;
    Xor: "xor", Ext31(316), Integer, 1, NONE;
    Mfspr: "mfspr", Ext31(339), Spr, 1, NONE;
    Lhax: "lhax", Ext31(343), Load, 1, LS;
    Mftb: "mftb", Ext31(371), Spr, 1, NONE;
    Lhaux: "lhaux", Ext31(375), Load, 1, LS;
    Sthx: "sthx", Ext31(407), Store, 1, LS;
    Orc: "orc", Ext31(412), Integer, 1, NONE;
    Sthux: "sthux", Ext31(439), Store, 1, LS;
    Or: "or", Ext31(444), Integer, 1, NONE;
    Divwu: "divwu", Ext31Oe(459), Integer, 40, NONE;
    Mtspr: "mtspr", Ext31(467), Spr, 2, REDISPATCH;
    Dcbi: "dcbi", Ext31(470), DataCache, 5, PRIV;
    Nand: "nand", Ext31(476), Integer, 1, NONE;
    Divw: "divw", Ext31Oe(491), Integer, 40, NONE;
    Mcrxr: "mcrxr", Ext31(512), System, 1, NONE;
    Lwbrx: "lwbrx", Ext31(534), Load, 1, LS;
    Lfsx: "lfsx", Ext31(535), LoadFp, 1, FPU_LS;
    Srw: "srw", Ext31(536), Integer, 1, NONE;
    Tlbsync: "tlbsync", Ext31(566), System, 1, PRIV;
    Lfsux: "lfsux", Ext31(567), LoadFp, 1, FPU_LS;
    Mfsr: "mfsr", Ext31(595), System, 3, PRIV;
    Sync: "sync", Ext31(598), System, 3, NONE;
    Lfdx: "lfdx", Ext31(599), LoadFp, 1, FPU_LS;
    Lfdux: "lfdux", Ext31(631), LoadFp, 1, FPU_LS;
    Mfsrin: "mfsrin", Ext31(659), System, 3, PRIV;
    Stwbrx: "stwbrx", Ext31(662), Store, 1, LS;
    Stfsx: "stfsx", Ext31(663), StoreFp, 1, FPU_LS;
    Stfsux: "stfsux", Ext31(695), StoreFp, 1, FPU_LS;
    Stfdx: "stfdx", Ext31(727), StoreFp, 1, FPU_LS;
    Stfdux: "stfdux", Ext31(759), StoreFp, 1, FPU_LS;
    Lhbrx: "lhbrx", Ext31(790), Load, 1, LS;
    Sraw: "sraw", Ext31(792), Integer, 1, NONE;
    Srawi: "srawi", Ext31(824), Integer, 1, NONE;
    Eieio: "eieio", Ext31(854), System, 1, NONE;
    Sthbrx: "sthbrx", Ext31(918), Store, 1, LS;
    Extsh: "extsh", Ext31(922), Integer, 1, NONE;
    Extsb: "extsb", Ext31(954), Integer, 1, NONE;
    Icbi: "icbi", Ext31(982), InstructionCache, 4, REDISPATCH;
    Stfiwx: "stfiwx", Ext31(983), StoreFp, 1, FPU_LS;
    Dcbz: "dcbz", Ext31(1014), DataCache, 5, LS;

    // Single precision (primary 59)
    Fdivs: "fdivs", Ext59(18), SingleFp, 17, FPU;
    Fsubs: "fsubs", Ext59(20), SingleFp, 1, FPU;
    Fadds: "fadds", Ext59(21), SingleFp, 1, FPU;
    Fres: "fres", Ext59(24), SingleFp, 1, FPU;
    Fmuls: "fmuls", Ext59(25), SingleFp, 1, FPU;
    Fmsubs: "fmsubs", Ext59(28), SingleFp, 1, FPU;
    Fmadds: "fmadds", Ext59(29), SingleFp, 1, FPU;
    Fnmsubs: "fnmsubs", Ext59(30), SingleFp, 1, FPU;
    Fnmadds: "fnmadds", Ext59(31), SingleFp, 1, FPU;

    // Double precision (primary 63)
    Fcmpu: "fcmpu", Ext63(0), DoubleFp, 1, FPU;
    Frsp: "frsp", Ext63(12), DoubleFp, 1, FPU;
    Fctiw: "fctiw", Ext63(14), DoubleFp, 1, FPU;
    Fctiwz: "fctiwz", Ext63(15), DoubleFp, 1, FPU;
    Fcmpo: "fcmpo", Ext63(32), DoubleFp, 1, FPU;
    Mtfsb1: "mtfsb1", Ext63(38), DoubleFp, 3, FPU;
    Fneg: "fneg", Ext63(40), DoubleFp, 1, FPU;
    Mcrfs: "mcrfs", Ext63(64), DoubleFp, 1, FPU;
    Mtfsb0: "mtfsb0", Ext63(70), DoubleFp, 3, FPU;
    Fmr: "fmr", Ext63(72), DoubleFp, 1, FPU;
    Fnabs: "fnabs", Ext63(136), DoubleFp, 1, FPU;
    Fabs: "fabs", Ext63(264), DoubleFp, 1, FPU;
    Mffs: "mffs", Ext63(583), DoubleFp, 1, FPU;
    Mtfsf: "mtfsf", Ext63(711), DoubleFp, 3, FPU;
    Fdiv: "fdiv", Ext63x5(18), DoubleFp, 31, FPU;
    Fsub: "fsub", Ext63x5(20), DoubleFp, 1, FPU;
    Fadd: "fadd", Ext63x5(21), DoubleFp, 1, FPU;
    Fsel: "fsel", Ext63x5(23), DoubleFp, 1, FPU;
    Fmul: "fmul", Ext63x5(25), DoubleFp, 1, FPU;
    Frsqrte: "frsqrte", Ext63x5(26), DoubleFp, 1, FPU;
    Fmsub: "fmsub", Ext63x5(28), DoubleFp, 1, FPU;
    Fmadd: "fmadd", Ext63x5(29), DoubleFp, 1, FPU;
    Fnmsub: "fnmsub", Ext63x5(30), DoubleFp, 1, FPU;
    Fnmadd: "fnmadd", Ext63x5(31), DoubleFp, 1, FPU;
}

impl Op {
    /// Static descriptor of this opcode
    #[inline]
    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }
}

const TABLE_SIZE: usize = 64 << 10;

/// Canonical opcode fingerprint of an instruction word
#[inline]
pub fn fingerprint(inst: u32) -> usize {
    let opcd = inst >> 26;
    let ext = match opcd {
        4 | 19 | 31 | 63 => (inst >> 1) & 0x3FF,
        59 => (inst >> 1) & 0x1F,
        _ => 0,
    };
    ((opcd << 10) | ext) as usize
}

static DECODE_TABLE: Lazy<Box<[Op]>> = Lazy::new(build_decode_table);

fn build_decode_table() -> Box<[Op]> {
    let mut table = vec![Op::Unknown; TABLE_SIZE].into_boxed_slice();

    let mut place = |primary: u32, ext: u32, op: Op| {
        let index = ((primary << 10) | ext) as usize;
        debug_assert_eq!(
            table[index],
            Op::Unknown,
            "decode slot {}/{} claimed by both {} and {}",
            primary,
            ext,
            table[index].name(),
            op.name()
        );
        table[index] = op;
    };

    for (&op, info) in ALL_OPS.iter().zip(OP_INFO.iter()) {
        match info.slot {
            Slot::None => {}
            Primary(p) => place(p, 0, op),
            Ext4(xo) => place(4, xo, op),
            Ext4x5(xo) => {
                for i in 0..32 {
                    place(4, (i << 5) | xo, op);
                }
            }
            Ext4x6(xo) => {
                for i in 0..16 {
                    place(4, (i << 6) | xo, op);
                }
            }
            Ext19(xo) => place(19, xo, op),
            Ext31(xo) => place(31, xo, op),
            Ext31Oe(xo) => {
                place(31, xo, op);
                place(31, xo | 0x200, op);
            }
            Ext59(xo) => place(59, xo, op),
            Ext63(xo) => place(63, xo, op),
            Ext63x5(xo) => {
                for i in 0..32 {
                    place(63, (i << 5) | xo, op);
                }
            }
        }
    }

    table
}

/// Decode an instruction word
#[inline]
pub fn decode(inst: u32) -> Op {
    DECODE_TABLE[fingerprint(inst)]
}

/// Force the decode table to be built
pub fn init() {
    Lazy::force(&DECODE_TABLE);
}
