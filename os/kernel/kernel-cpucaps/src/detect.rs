use crate::{Cpucap, CpucapSet};
use kernel_registers::{CtrEl0, IdAa64Isar0El1, MidrEl1};
use log::debug;

/// Snapshot of the identification registers that drive detection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuIdRegs {
    pub midr: MidrEl1,
    pub isar0: IdAa64Isar0El1,
    pub ctr: CtrEl0,
}

impl CpuIdRegs {
    /// Reads the registers of the executing core.
    ///
    /// # Safety
    /// Must run at EL1 or higher.
    #[cfg(target_arch = "aarch64")]
    #[must_use]
    pub unsafe fn read_current() -> Self {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe {
            Self {
                midr: MidrEl1::load_unsafe(),
                isar0: IdAa64Isar0El1::load_unsafe(),
                ctr: CtrEl0::load_unsafe(),
            }
        }
    }
}

const ARM: u8 = 0x41;
const CAVIUM: u8 = 0x43;
const QCOM: u8 = 0x51;

/// A model plus an inclusive `rNpM` range.
struct MidrRange {
    implementer: u8,
    part_num: u16,
    min: u8,
    max: u8,
}

impl MidrRange {
    const fn new(implementer: u8, part_num: u16, min: u8, max: u8) -> Self {
        Self {
            implementer,
            part_num,
            min,
            max,
        }
    }

    const fn matches(&self, midr: MidrEl1) -> bool {
        let rev = midr.variant_revision();
        midr.implementer() == self.implementer
            && midr.part_num() == self.part_num
            && rev >= self.min
            && rev <= self.max
    }
}

struct Erratum {
    cap: Cpucap,
    affected: &'static [MidrRange],
}

static ERRATA: &[Erratum] = &[
    // Cortex-A53 826319, 827319, 824069, 819472.
    Erratum {
        cap: Cpucap::WORKAROUND_CLEAN_CACHE,
        affected: &[MidrRange::new(ARM, 0xD03, 0x00, 0x02)],
    },
    // Cortex-A57 832075.
    Erratum {
        cap: Cpucap::WORKAROUND_DEVICE_LOAD_ACQUIRE,
        affected: &[MidrRange::new(ARM, 0xD07, 0x00, 0x12)],
    },
    // ThunderX T88 pass 1.x and T81 pass 1.0.
    Erratum {
        cap: Cpucap::WORKAROUND_CAVIUM_27456,
        affected: &[
            MidrRange::new(CAVIUM, 0x0A1, 0x00, 0x01),
            MidrRange::new(CAVIUM, 0x0A2, 0x00, 0x00),
        ],
    },
    // Falkor v1 1009.
    Erratum {
        cap: Cpucap::WORKAROUND_REPEAT_TLBI,
        affected: &[MidrRange::new(QCOM, 0x800, 0x00, 0x0F)],
    },
];

/// Detects features and errata from `regs` into `caps`.
///
/// Returns the number of capabilities newly set.
pub fn detect_cpucaps(regs: &CpuIdRegs, caps: &CpucapSet) -> usize {
    let mut found = 0;
    let mut mark = |cap: Cpucap| {
        if caps.set(cap) {
            debug!("cpucaps: detected {cap}");
            found += 1;
        }
    };

    for erratum in ERRATA {
        if erratum.affected.iter().any(|r| r.matches(regs.midr)) {
            mark(erratum.cap);
        }
    }

    if regs.isar0.has_lse_atomics() {
        mark(Cpucap::HAS_LSE_ATOMICS);
    }
    if regs.ctr.idc() {
        mark(Cpucap::HAS_CACHE_IDC);
    }
    if regs.ctr.dic() {
        mark(Cpucap::HAS_CACHE_DIC);
    }

    found
}
