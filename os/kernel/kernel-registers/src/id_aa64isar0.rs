#[cfg(all(feature = "asm", target_arch = "aarch64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// Instruction Set Attribute Register 0 (`ID_AA64ISAR0_EL1`).
///
/// Every field is a 4-bit feature level; zero means not implemented.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct IdAa64Isar0El1 {
    #[bits(4, default = 0)]
    _reserved_0_3: u8,
    #[bits(4)]
    pub aes: u8,
    #[bits(4)]
    pub sha1: u8,
    #[bits(4)]
    pub sha2: u8,
    #[bits(4)]
    pub crc32: u8,

    /// Bits 20–23: Large System Extension atomics.
    ///
    /// - `0b0000`: no LSE atomics.
    /// - `0b0010`: `LDADD`, `CAS`, `CASP`, `SWP` and friends (`FEAT_LSE`).
    /// - `0b0011`: adds 128-bit atomics (`FEAT_LSE128`).
    #[bits(4)]
    pub atomic: u8,

    #[bits(4)]
    pub tme: u8,
    #[bits(4)]
    pub rdm: u8,
    #[bits(4)]
    pub sha3: u8,
    #[bits(4)]
    pub sm3: u8,
    #[bits(4)]
    pub sm4: u8,
    #[bits(4)]
    pub dp: u8,
    #[bits(4)]
    pub fhm: u8,
    #[bits(4)]
    pub ts: u8,
    #[bits(4)]
    pub tlb: u8,
    #[bits(4)]
    pub rndr: u8,
}

impl IdAa64Isar0El1 {
    #[must_use]
    pub const fn has_lse_atomics(&self) -> bool {
        self.atomic() >= 2
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl LoadRegisterUnsafe for IdAa64Isar0El1 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::mrs!("id_aa64isar0_el1"))
    }
}
