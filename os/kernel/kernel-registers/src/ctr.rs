#[cfg(all(feature = "asm", target_arch = "aarch64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// Cache Type Register (`CTR_EL0`).
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct CtrEl0 {
    /// Bits 0–3: log2 of the smallest instruction cache line, in words.
    #[bits(4)]
    pub imin_line: u8,

    #[bits(10, default = 0)]
    _reserved_4_13: u16,

    /// Bits 14–15: Level 1 instruction cache policy.
    #[bits(2)]
    pub l1_ip: u8,

    /// Bits 16–19: log2 of the smallest data cache line, in words.
    #[bits(4)]
    pub dmin_line: u8,

    /// Bits 20–23: Exclusives reservation granule.
    #[bits(4)]
    pub erg: u8,

    /// Bits 24–27: Cache writeback granule.
    #[bits(4)]
    pub cwg: u8,

    /// Bit 28: Data cache clean to `PoU` is not required for I/D coherence.
    pub idc: bool,

    /// Bit 29: Instruction cache invalidation to `PoU` is not required for I/D coherence.
    pub dic: bool,

    #[bits(1, default = false)]
    _reserved_30: bool,

    #[bits(1, default = true)]
    _reserved_31: bool,

    /// Bits 32–37: Tag minimum line.
    #[bits(6)]
    pub tmin_line: u8,

    #[bits(26, default = 0)]
    _reserved_38_63: u32,
}

impl CtrEl0 {
    /// Smallest data cache line in bytes.
    #[must_use]
    pub const fn dcache_line_size(&self) -> usize {
        4 << self.dmin_line()
    }

    /// Smallest instruction cache line in bytes.
    #[must_use]
    pub const fn icache_line_size(&self) -> usize {
        4 << self.imin_line()
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl LoadRegisterUnsafe for CtrEl0 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::mrs!("ctr_el0"))
    }
}
