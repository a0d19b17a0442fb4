//! A64 instruction encodings.
//!
//! Decoding covers the PC-relative forms the patching engine must
//! relocate; encoding covers what the call-site assembler emits.

use bitfield_struct::bitfield;

pub const NOP: u32 = 0xD503_201F;
pub const YIELD: u32 = 0xD503_203F;
pub const WFE: u32 = 0xD503_205F;
pub const SEV: u32 = 0xD503_209F;
pub const SEVL: u32 = 0xD503_20BF;
pub const RET: u32 = 0xD65F_03C0;
pub const DMB_ISH: u32 = 0xD503_3BBF;
pub const DMB_ISHLD: u32 = 0xD503_39BF;
pub const DMB_ISHST: u32 = 0xD503_3ABF;
pub const DSB_ISH: u32 = 0xD503_3B9F;
pub const ISB: u32 = 0xD503_3FDF;
/// `ic ialluis`: invalidate all instruction caches in the inner-shareable domain.
pub const IC_IALLUIS: u32 = 0xD508_711F;

/// The zero register in data-processing operands; the stack pointer as a base.
pub const ZR: u8 = 31;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("offset {offset:#x} is not a multiple of four")]
    Misaligned { offset: i64 },
    #[error("offset {offset:#x} does not fit a {bits}-bit immediate")]
    OutOfRange { offset: i64, bits: u8 },
}

/// `B` / `BL`.
#[bitfield(u32)]
pub struct UncondBranch {
    #[bits(26)]
    pub imm26: u32,
    #[bits(5, default = 0b00101)]
    pub opcode: u8,
    pub link: bool,
}

/// `B.cond`.
#[bitfield(u32)]
pub struct CondBranch {
    #[bits(4)]
    pub cond: u8,
    pub o0: bool,
    #[bits(19)]
    pub imm19: u32,
    #[bits(8, default = 0x54)]
    pub opcode: u8,
}

/// `CBZ` / `CBNZ`.
#[bitfield(u32)]
pub struct CompareBranch {
    #[bits(5)]
    pub rt: u8,
    #[bits(19)]
    pub imm19: u32,
    pub nonzero: bool,
    #[bits(6, default = 0b01_1010)]
    pub opcode: u8,
    pub sf: bool,
}

/// `TBZ` / `TBNZ`.
#[bitfield(u32)]
pub struct TestBranch {
    #[bits(5)]
    pub rt: u8,
    #[bits(14)]
    pub imm14: u16,
    #[bits(5)]
    pub b40: u8,
    pub nonzero: bool,
    #[bits(6, default = 0b01_1011)]
    pub opcode: u8,
    pub b5: bool,
}

/// `ADR` / `ADRP`.
#[bitfield(u32)]
pub struct PcRelAddr {
    #[bits(5)]
    pub rd: u8,
    #[bits(19)]
    pub immhi: u32,
    #[bits(5, default = 0b1_0000)]
    pub opcode: u8,
    #[bits(2)]
    pub immlo: u8,
    pub page: bool,
}

/// Load/store exclusive, load-acquire/store-release and `CAS`.
///
/// `o2`/`o1` select the sub-class: `0/0` exclusive, `1/0` ordered,
/// `1/1` compare-and-swap. `o0` is the acquire (loads) or release (stores)
/// flag; for `CAS` `load` is acquire and `o0` is release.
#[bitfield(u32)]
pub struct LoadStoreExclusive {
    #[bits(5)]
    pub rt: u8,
    #[bits(5)]
    pub rn: u8,
    #[bits(5, default = 31)]
    pub rt2: u8,
    pub o0: bool,
    #[bits(5, default = 31)]
    pub rs: u8,
    pub o1: bool,
    pub load: bool,
    pub o2: bool,
    #[bits(6, default = 0b00_1000)]
    pub opcode: u8,
    #[bits(2)]
    pub size: u8,
}

/// LSE atomic memory operations (`LDADD`, `LDCLR`, `LDEOR`, `LDSET`, `SWP`).
#[bitfield(u32)]
pub struct AtomicMemory {
    #[bits(5)]
    pub rt: u8,
    #[bits(5)]
    pub rn: u8,
    #[bits(2, default = 0)]
    _fixed_10_11: u8,
    #[bits(3)]
    pub opc: u8,
    pub o3: bool,
    #[bits(5)]
    pub rs: u8,
    #[bits(1, default = true)]
    _fixed_21: bool,
    pub release: bool,
    pub acquire: bool,
    #[bits(6, default = 0b11_1000)]
    pub opcode: u8,
    #[bits(2)]
    pub size: u8,
}

/// Logical and add/sub (shifted register).
#[bitfield(u32)]
pub struct DataProcReg {
    #[bits(5)]
    pub rd: u8,
    #[bits(5)]
    pub rn: u8,
    #[bits(6)]
    pub imm6: u8,
    #[bits(5)]
    pub rm: u8,
    /// Inverts `rm` for logical ops; zero for add/sub.
    pub n: bool,
    #[bits(2)]
    pub shift: u8,
    /// `0b01010` logical, `0b01011` add/sub.
    #[bits(5)]
    pub opcode: u8,
    /// Logical: `AND`, `ORR`, `EOR`, `ANDS`. Add/sub: bit 1 is `SUB`, bit 0 sets flags.
    #[bits(2)]
    pub opc: u8,
    pub sf: bool,
}

/// Operand size of a memory access or register operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    #[must_use]
    pub const fn size_bits(self) -> u8 {
        match self {
            Self::W8 => 0,
            Self::W16 => 1,
            Self::W32 => 2,
            Self::W64 => 3,
        }
    }

    #[must_use]
    pub const fn from_size_bits(size: u8) -> Self {
        match size & 3 {
            0 => Self::W8,
            1 => Self::W16,
            2 => Self::W32,
            _ => Self::W64,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u64 {
        1 << self.size_bits()
    }

    /// `sf` for data-processing; sub-word widths use 32-bit registers.
    #[must_use]
    pub const fn is_64(self) -> bool {
        matches!(self, Self::W64)
    }
}

/// Data-processing register operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Bic,
    Orr,
    Orn,
    Eor,
}

impl AluOp {
    const fn base(self) -> u32 {
        match self {
            Self::Add => 0x0B00_0000,
            Self::Sub => 0x4B00_0000,
            Self::And => 0x0A00_0000,
            Self::Bic => 0x0A20_0000,
            Self::Orr => 0x2A00_0000,
            Self::Orn => 0x2A20_0000,
            Self::Eor => 0x4A00_0000,
        }
    }
}

/// Operations of the LSE `LD<op>` / `ST<op>` family.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LseOp {
    Add,
    Clr,
    Eor,
    Set,
}

impl LseOp {
    const fn opc(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Clr => 1,
            Self::Eor => 2,
            Self::Set => 3,
        }
    }

    #[must_use]
    pub const fn from_opc(opc: u8) -> Option<Self> {
        match opc {
            0 => Some(Self::Add),
            1 => Some(Self::Clr),
            2 => Some(Self::Eor),
            3 => Some(Self::Set),
            _ => None,
        }
    }
}

/// Classes of PC-relative instructions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PcRel {
    /// `B`, `BL`: ±128 MiB.
    Branch26,
    /// `B.cond`, `CBZ`, `CBNZ`: ±1 MiB.
    Branch19,
    /// `TBZ`, `TBNZ`: ±32 KiB.
    Branch14,
    /// `ADR`: ±1 MiB, byte granular.
    Adr,
    /// `ADRP`: ±4 GiB, page granular.
    Adrp,
    /// `LDR`/`LDRSW`/`PRFM` (literal); not relocatable.
    Literal,
}

impl PcRel {
    #[must_use]
    pub const fn classify(insn: u32) -> Option<Self> {
        if insn & 0x7C00_0000 == 0x1400_0000 {
            Some(Self::Branch26)
        } else if insn & 0xFF00_0010 == 0x5400_0000 || insn & 0x7E00_0000 == 0x3400_0000 {
            Some(Self::Branch19)
        } else if insn & 0x7E00_0000 == 0x3600_0000 {
            Some(Self::Branch14)
        } else if insn & 0x9F00_0000 == 0x1000_0000 {
            Some(Self::Adr)
        } else if insn & 0x9F00_0000 == 0x9000_0000 {
            Some(Self::Adrp)
        } else if insn & 0x3B00_0000 == 0x1800_0000 {
            Some(Self::Literal)
        } else {
            None
        }
    }

    /// Signed offset encoded in `insn`: bytes, or bytes of whole pages for `ADRP`.
    #[must_use]
    pub fn offset(self, insn: u32) -> Option<i64> {
        match self {
            Self::Branch26 => Some(sign_extend(UncondBranch::from_bits(insn).imm26(), 26) << 2),
            Self::Branch19 => Some(sign_extend((insn >> 5) & 0x7_FFFF, 19) << 2),
            Self::Branch14 => {
                let imm14 = TestBranch::from_bits(insn).imm14();
                Some(sign_extend(u32::from(imm14), 14) << 2)
            }
            Self::Adr => Some(adr_imm(insn)),
            Self::Adrp => Some(adr_imm(insn) << 12),
            Self::Literal => None,
        }
    }

    /// Re-encodes `insn` with a new offset (same units as [`offset`](Self::offset)).
    ///
    /// # Errors
    /// The offset is misaligned for the form or out of its range.
    pub fn with_offset(self, insn: u32, offset: i64) -> Result<u32, EncodeError> {
        match self {
            Self::Branch26 => {
                let imm = scaled(offset, 26)?;
                Ok(UncondBranch::from_bits(insn).with_imm26(imm).into_bits())
            }
            Self::Branch19 => {
                let imm = scaled(offset, 19)?;
                Ok((insn & !(0x7_FFFF << 5)) | (imm << 5))
            }
            Self::Branch14 => {
                let imm = u16::try_from(scaled(offset, 14)?)
                    .map_err(|_| EncodeError::OutOfRange { offset, bits: 14 })?;
                Ok(TestBranch::from_bits(insn).with_imm14(imm).into_bits())
            }
            Self::Adr => set_adr_imm(insn, offset),
            Self::Adrp => {
                if offset & 0xFFF != 0 {
                    return Err(EncodeError::Misaligned { offset });
                }
                set_adr_imm(insn, offset >> 12)
            }
            Self::Literal => Err(EncodeError::OutOfRange { offset, bits: 0 }),
        }
    }
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    (i64::from(value) << shift) >> shift
}

fn adr_imm(insn: u32) -> i64 {
    let adr = PcRelAddr::from_bits(insn);
    sign_extend((adr.immhi() << 2) | u32::from(adr.immlo()), 21)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn set_adr_imm(insn: u32, imm: i64) -> Result<u32, EncodeError> {
    if !fits(imm, 21) {
        return Err(EncodeError::OutOfRange {
            offset: imm,
            bits: 21,
        });
    }
    let raw = (imm as u32) & 0x1F_FFFF;
    Ok(PcRelAddr::from_bits(insn)
        .with_immlo((raw & 3) as u8)
        .with_immhi(raw >> 2)
        .into_bits())
}

const fn fits(value: i64, bits: u32) -> bool {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    value >= min && value <= max
}

/// Word offset as a `bits`-wide two's-complement field.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(offset: i64, bits: u32) -> Result<u32, EncodeError> {
    if offset & 3 != 0 {
        return Err(EncodeError::Misaligned { offset });
    }
    let words = offset >> 2;
    if !fits(words, bits) {
        return Err(EncodeError::OutOfRange {
            offset,
            bits: bits as u8,
        });
    }
    Ok((words as u32) & ((1 << bits) - 1))
}

#[allow(clippy::cast_possible_wrap)]
fn distance(from: u64, to: u64) -> i64 {
    to.wrapping_sub(from) as i64
}

/// `B` from `from` to `to`.
///
/// # Errors
/// The target is misaligned or beyond ±128 MiB.
pub fn b(from: u64, to: u64) -> Result<u32, EncodeError> {
    PcRel::Branch26.with_offset(UncondBranch::new().into_bits(), distance(from, to))
}

/// `CBZ`/`CBNZ` on a 32-bit or 64-bit register.
///
/// # Errors
/// The target is misaligned or beyond ±1 MiB.
pub fn cbz(nonzero: bool, sf: bool, rt: u8, from: u64, to: u64) -> Result<u32, EncodeError> {
    let insn = CompareBranch::new()
        .with_nonzero(nonzero)
        .with_sf(sf)
        .with_rt(rt)
        .into_bits();
    PcRel::Branch19.with_offset(insn, distance(from, to))
}

/// `B.cond`.
///
/// # Errors
/// The target is misaligned or beyond ±1 MiB.
pub fn b_cond(cond: u8, from: u64, to: u64) -> Result<u32, EncodeError> {
    let insn = CondBranch::new().with_cond(cond).into_bits();
    PcRel::Branch19.with_offset(insn, distance(from, to))
}

/// Shifted-register ALU operation without shift.
#[must_use]
pub fn alu(op: AluOp, sf: bool, rd: u8, rn: u8, rm: u8) -> u32 {
    op.base()
        | (u32::from(sf) << 31)
        | (u32::from(rm & 31) << 16)
        | (u32::from(rn & 31) << 5)
        | u32::from(rd & 31)
}

#[must_use]
pub fn mov(sf: bool, rd: u8, rm: u8) -> u32 {
    alu(AluOp::Orr, sf, rd, ZR, rm)
}

#[must_use]
pub fn neg(sf: bool, rd: u8, rm: u8) -> u32 {
    alu(AluOp::Sub, sf, rd, ZR, rm)
}

#[must_use]
pub fn mvn(sf: bool, rd: u8, rm: u8) -> u32 {
    alu(AluOp::Orn, sf, rd, ZR, rm)
}

/// `LDXR`/`LDAXR`.
#[must_use]
pub fn ldxr(width: Width, acquire: bool, rt: u8, rn: u8) -> u32 {
    LoadStoreExclusive::new()
        .with_size(width.size_bits())
        .with_load(true)
        .with_o0(acquire)
        .with_rn(rn)
        .with_rt(rt)
        .into_bits()
}

/// `STXR`/`STLXR` with status in `rs`.
#[must_use]
pub fn stxr(width: Width, release: bool, rs: u8, rt: u8, rn: u8) -> u32 {
    LoadStoreExclusive::new()
        .with_size(width.size_bits())
        .with_o0(release)
        .with_rs(rs)
        .with_rn(rn)
        .with_rt(rt)
        .into_bits()
}

/// `CAS{A}{L}`: compares `rs` with `[rn]`, stores `rt`, returns the old value in `rs`.
#[must_use]
pub fn cas(width: Width, acquire: bool, release: bool, rs: u8, rt: u8, rn: u8) -> u32 {
    LoadStoreExclusive::new()
        .with_size(width.size_bits())
        .with_o2(true)
        .with_o1(true)
        .with_load(acquire)
        .with_o0(release)
        .with_rs(rs)
        .with_rn(rn)
        .with_rt(rt)
        .into_bits()
}

/// `LD<op>{A}{L}`; with `rt == ZR` this is the `ST<op>{L}` alias.
#[must_use]
pub fn lse(op: LseOp, width: Width, acquire: bool, release: bool, rs: u8, rt: u8, rn: u8) -> u32 {
    AtomicMemory::new()
        .with_size(width.size_bits())
        .with_acquire(acquire)
        .with_release(release)
        .with_opc(op.opc())
        .with_rs(rs)
        .with_rn(rn)
        .with_rt(rt)
        .into_bits()
}

/// `SWP{A}{L}`.
#[must_use]
pub fn swp(width: Width, acquire: bool, release: bool, rs: u8, rt: u8, rn: u8) -> u32 {
    AtomicMemory::new()
        .with_size(width.size_bits())
        .with_acquire(acquire)
        .with_release(release)
        .with_o3(true)
        .with_rs(rs)
        .with_rn(rn)
        .with_rt(rt)
        .into_bits()
}

/// `PRFM PSTL1STRM, [rn]`.
#[must_use]
pub fn prfm_pstl1strm(rn: u8) -> u32 {
    0xF980_0011 | (u32::from(rn & 31) << 5)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exclusive_encodings() {
        assert_eq!(ldxr(Width::W32, false, 0, 0), 0x885F_7C00);
        assert_eq!(ldxr(Width::W32, true, 0, 0), 0x885F_FC00);
        assert_eq!(ldxr(Width::W64, false, 0, 0), 0xC85F_7C00);
        assert_eq!(stxr(Width::W32, false, 0, 0, 0), 0x8800_7C00);
        assert_eq!(stxr(Width::W32, true, 0, 0, 0), 0x8800_FC00);
        // ldxr w16, [x0]; stxr w17, w16, [x0]
        assert_eq!(ldxr(Width::W32, false, 16, 0), 0x885F_7C10);
        assert_eq!(stxr(Width::W32, false, 17, 16, 0), 0x8811_7C10);
    }

    #[test]
    fn lse_encodings() {
        assert_eq!(cas(Width::W32, false, false, 0, 0, 0), 0x88A0_7C00);
        assert_eq!(cas(Width::W32, true, false, 0, 0, 0), 0x88E0_7C00);
        assert_eq!(cas(Width::W32, false, true, 0, 0, 0), 0x88A0_FC00);
        for (op, expected) in [
            (LseOp::Add, 0xB820_0000),
            (LseOp::Clr, 0xB820_1000),
            (LseOp::Eor, 0xB820_2000),
            (LseOp::Set, 0xB820_3000),
        ] {
            assert_eq!(lse(op, Width::W32, false, false, 0, 0, 0), expected, "{op:?}");
        }
        let ldaddal = lse(LseOp::Add, Width::W64, true, true, 0, 0, 0);
        assert_eq!(ldaddal, 0xF8E0_0000);
        assert_eq!(swp(Width::W32, false, false, 0, 0, 0), 0xB820_8000);
        // stadd w1, [x0]
        let stadd = lse(LseOp::Add, Width::W32, false, false, 1, ZR, 0);
        assert_eq!(stadd, 0xB821_001F);
    }

    #[test]
    fn alu_encodings() {
        assert_eq!(alu(AluOp::Add, false, 0, 0, 0), 0x0B00_0000);
        assert_eq!(alu(AluOp::Eor, true, 3, 2, 1), 0xCA01_0043);
        assert_eq!(mov(false, 3, 16), 0x2A10_03E3);
        assert_eq!(neg(true, 1, 1), 0xCB01_03E1);
        assert_eq!(prfm_pstl1strm(0), 0xF980_0011);
    }

    #[test]
    fn branch_round_trip() {
        let insn = b(0x1000, 0x0F00).unwrap();
        assert_eq!(PcRel::classify(insn), Some(PcRel::Branch26));
        assert_eq!(PcRel::Branch26.offset(insn), Some(-0x100));

        let insn = cbz(true, false, 17, 0x2010, 0x2004).unwrap();
        assert_eq!(insn & 0xFF00_001F, 0x3500_0011);
        assert_eq!(PcRel::classify(insn), Some(PcRel::Branch19));
        assert_eq!(PcRel::Branch19.offset(insn), Some(-12));

        let insn = b_cond(0xB, 0x100, 0x140).unwrap();
        assert_eq!(PcRel::Branch19.offset(insn), Some(0x40));
    }

    #[test]
    fn branch_range_and_alignment_are_checked() {
        assert_eq!(b(0, 2), Err(EncodeError::Misaligned { offset: 2 }));
        assert!(matches!(
            b(0, 1 << 28),
            Err(EncodeError::OutOfRange { bits: 26, .. })
        ));
        assert!(cbz(false, true, 0, 0, 1 << 20).is_err());
    }

    #[test]
    fn adr_and_adrp_offsets() {
        // adrp x0, #0x3000 ; immlo = 3, immhi = 0
        let adrp = 0x9000_0000 | (3 << 29);
        assert_eq!(PcRel::classify(adrp), Some(PcRel::Adrp));
        assert_eq!(PcRel::Adrp.offset(adrp), Some(0x3000));
        let moved = PcRel::Adrp.with_offset(adrp, -0x2000).unwrap();
        assert_eq!(PcRel::Adrp.offset(moved), Some(-0x2000));

        let adr = 0x1000_0000 | (1 << 29) | (4 << 5) | 7;
        assert_eq!(PcRel::classify(adr), Some(PcRel::Adr));
        assert_eq!(PcRel::Adr.offset(adr), Some(17));
        let moved = PcRel::Adr.with_offset(adr, -5).unwrap();
        assert_eq!(PcRel::Adr.offset(moved), Some(-5));
        assert_eq!(moved & 31, 7);
    }

    #[test]
    fn literal_loads_are_classified_and_plain_insns_are_not() {
        // ldr x1, <label>
        assert_eq!(PcRel::classify(0x5800_0041), Some(PcRel::Literal));
        for insn in [NOP, RET, DMB_ISH, 0x885F_7C00, 0xB820_0000, 0x0B00_0000] {
            assert_eq!(PcRel::classify(insn), None, "{insn:#x}");
        }
    }
}
