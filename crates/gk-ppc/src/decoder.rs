//! Instruction word field extraction

/// A raw 32-bit PowerPC instruction word with field accessors.
///
/// Bit numbering in the comments follows IBM convention (bit 0 is the MSB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    /// Primary opcode (bits 0-5)
    #[inline]
    pub fn opcd(self) -> u32 {
        self.0 >> 26
    }

    /// Extended opcode for X/XL/XFX forms (bits 21-30)
    #[inline]
    pub fn subop10(self) -> u32 {
        (self.0 >> 1) & 0x3FF
    }

    /// Extended opcode for A form (bits 26-30)
    #[inline]
    pub fn subop5(self) -> u32 {
        (self.0 >> 1) & 0x1F
    }

    /// Target register (bits 6-10); also RS and FRD/FRS
    #[inline]
    pub fn rd(self) -> usize {
        ((self.0 >> 21) & 0x1F) as usize
    }

    #[inline]
    pub fn rs(self) -> usize {
        self.rd()
    }

    #[inline]
    pub fn ra(self) -> usize {
        ((self.0 >> 16) & 0x1F) as usize
    }

    #[inline]
    pub fn rb(self) -> usize {
        ((self.0 >> 11) & 0x1F) as usize
    }

    /// FRC of A-form floating point (bits 21-25)
    #[inline]
    pub fn rc(self) -> usize {
        ((self.0 >> 6) & 0x1F) as usize
    }

    /// Record bit (bit 31)
    #[inline]
    pub fn rc_bit(self) -> bool {
        self.0 & 1 != 0
    }

    /// Overflow-enable bit of XO form (bit 21)
    #[inline]
    pub fn oe(self) -> bool {
        self.0 & 0x400 != 0
    }

    /// Sign-extended 16-bit immediate
    #[inline]
    pub fn simm(self) -> i32 {
        self.0 as u16 as i16 as i32
    }

    /// Zero-extended 16-bit immediate
    #[inline]
    pub fn uimm(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// I-form branch displacement, sign-extended and shifted
    #[inline]
    pub fn li(self) -> i32 {
        ((self.0 & 0x03FF_FFFC) << 6) as i32 >> 6
    }

    /// B-form branch displacement, sign-extended and shifted
    #[inline]
    pub fn bd(self) -> i32 {
        (self.0 & 0xFFFC) as u16 as i16 as i32
    }

    #[inline]
    pub fn aa(self) -> bool {
        self.0 & 2 != 0
    }

    #[inline]
    pub fn lk(self) -> bool {
        self.0 & 1 != 0
    }

    #[inline]
    pub fn bo(self) -> u32 {
        (self.0 >> 21) & 0x1F
    }

    #[inline]
    pub fn bi(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }

    /// Condition-register bit operands (crbD, crbA, crbB)
    #[inline]
    pub fn crbd(self) -> u32 {
        (self.0 >> 21) & 0x1F
    }

    #[inline]
    pub fn crba(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }

    #[inline]
    pub fn crbb(self) -> u32 {
        (self.0 >> 11) & 0x1F
    }

    /// CR field destination (bits 6-8)
    #[inline]
    pub fn crfd(self) -> usize {
        ((self.0 >> 23) & 7) as usize
    }

    /// CR field source (bits 11-13)
    #[inline]
    pub fn crfs(self) -> usize {
        ((self.0 >> 18) & 7) as usize
    }

    /// Shift amount / rotate count (bits 16-20)
    #[inline]
    pub fn sh(self) -> u32 {
        (self.0 >> 11) & 0x1F
    }

    #[inline]
    pub fn mb(self) -> u32 {
        (self.0 >> 6) & 0x1F
    }

    #[inline]
    pub fn me(self) -> u32 {
        (self.0 >> 1) & 0x1F
    }

    /// Trap condition (bits 6-10)
    #[inline]
    pub fn to(self) -> u32 {
        (self.0 >> 21) & 0x1F
    }

    /// SPR number with its two halves swapped back into order
    #[inline]
    pub fn spr(self) -> usize {
        let raw = (self.0 >> 11) & 0x3FF;
        (((raw & 0x1F) << 5) | (raw >> 5)) as usize
    }

    /// CR field mask of mtcrf (bits 12-19)
    #[inline]
    pub fn crm(self) -> u32 {
        (self.0 >> 12) & 0xFF
    }

    /// FPSCR field mask of mtfsf (bits 7-14)
    #[inline]
    pub fn fm(self) -> u32 {
        (self.0 >> 17) & 0xFF
    }

    /// Segment register number (bits 12-15)
    #[inline]
    pub fn sr(self) -> usize {
        ((self.0 >> 16) & 0xF) as usize
    }

    /// Paired-single displacement, sign-extended 12 bits
    #[inline]
    pub fn ps_d(self) -> i32 {
        ((self.0 & 0xFFF) << 20) as i32 >> 20
    }

    /// Paired-single GQR index (D form)
    #[inline]
    pub fn ps_i(self) -> usize {
        ((self.0 >> 12) & 7) as usize
    }

    /// Paired-single single-value flag (D form)
    #[inline]
    pub fn ps_w(self) -> bool {
        (self.0 >> 15) & 1 != 0
    }

    /// Paired-single GQR index (X form)
    #[inline]
    pub fn ps_ix(self) -> usize {
        ((self.0 >> 7) & 7) as usize
    }

    /// Paired-single single-value flag (X form)
    #[inline]
    pub fn ps_wx(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }
}

impl From<u32> for Instruction {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
