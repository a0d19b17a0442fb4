#[cfg(all(feature = "asm", target_arch = "aarch64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;

/// Main ID Register (`MIDR_EL1`).
///
/// Identifies the implementer, part and revision of the executing core.
/// Errata are matched on `(implementer, part_num)` plus a
/// `(variant, revision)` range.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct MidrEl1 {
    /// Bits 0–3: Revision, the `p` in `rNpM`.
    #[bits(4)]
    pub revision: u8,

    /// Bits 4–15: Primary part number.
    #[bits(12)]
    pub part_num: u16,

    /// Bits 16–19: Architecture (`0xF` = defined by ID registers).
    #[bits(4)]
    pub architecture: u8,

    /// Bits 20–23: Variant, the `r` in `rNpM`.
    #[bits(4)]
    pub variant: u8,

    /// Bits 24–31: Implementer code (`0x41` Arm, `0x43` Cavium, `0x51` Qualcomm).
    pub implementer: u8,

    /// Bits 32–63: Reserved.
    #[bits(32, default = 0)]
    _reserved_32_63: u32,
}

impl MidrEl1 {
    /// Builds the value reported by a core, leaving the architecture field at `0xF`.
    #[must_use]
    pub const fn for_core(implementer: u8, part_num: u16, variant: u8, revision: u8) -> Self {
        Self::new()
            .with_implementer(implementer)
            .with_part_num(part_num)
            .with_architecture(0xF)
            .with_variant(variant)
            .with_revision(revision)
    }

    /// Variant and revision folded into one comparable value.
    #[must_use]
    pub const fn variant_revision(&self) -> u8 {
        (self.variant() << 4) | self.revision()
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl LoadRegisterUnsafe for MidrEl1 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::mrs!("midr_el1"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_cortex_a57_r1p2() {
        let midr = MidrEl1::from_bits(0x411F_D072);
        assert_eq!(midr.implementer(), 0x41);
        assert_eq!(midr.part_num(), 0xD07);
        assert_eq!(midr.variant(), 1);
        assert_eq!(midr.revision(), 2);
        assert_eq!(midr.architecture(), 0xF);
        assert_eq!(midr.variant_revision(), 0x12);
    }

    #[test]
    fn for_core_matches_raw_encoding() {
        let midr = MidrEl1::for_core(0x41, 0xD07, 1, 2);
        assert_eq!(midr.into_bits(), 0x411F_D072);
    }
}
