//! # CPU Capabilities
//!
//! Feature and erratum identifiers shared by the code-patching engine and the
//! atomic call sites that emit patch records, plus the system-wide bitmap of
//! capabilities detected at boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod detect;

pub use detect::{CpuIdRegs, detect_cpucaps};

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a CPU feature or erratum work-around.
///
/// The numeric value is what patch records carry in their 16-bit
/// capability field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Cpucap(u16);

impl Cpucap {
    pub const WORKAROUND_CLEAN_CACHE: Self = Self(0);
    pub const WORKAROUND_DEVICE_LOAD_ACQUIRE: Self = Self(1);
    pub const WORKAROUND_CAVIUM_27456: Self = Self(2);
    pub const WORKAROUND_REPEAT_TLBI: Self = Self(3);
    pub const HAS_LSE_ATOMICS: Self = Self(4);
    pub const HAS_CACHE_IDC: Self = Self(5);
    pub const HAS_CACHE_DIC: Self = Self(6);

    /// Number of detectable capabilities.
    pub const NCAPS: u16 = 7;

    /// Sentinel carried by callback-style patch records; always enabled.
    pub const CB_PATCH: Self = Self(Self::NCAPS);

    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn index(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_callback(self) -> bool {
        self.0 == Self::NCAPS
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "WORKAROUND_CLEAN_CACHE",
            1 => "WORKAROUND_DEVICE_LOAD_ACQUIRE",
            2 => "WORKAROUND_CAVIUM_27456",
            3 => "WORKAROUND_REPEAT_TLBI",
            4 => "HAS_LSE_ATOMICS",
            5 => "HAS_CACHE_IDC",
            6 => "HAS_CACHE_DIC",
            7 => "CB_PATCH",
            _ => "UNKNOWN",
        }
    }

    const fn bit(self) -> Option<u64> {
        if self.0 < 64 { Some(1 << self.0) } else { None }
    }
}

impl fmt::Display for Cpucap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free bitmap of capabilities, indexed by [`Cpucap`].
///
/// Identifiers beyond the bitmap width read as absent and cannot be set.
#[derive(Debug, Default)]
pub struct CpucapSet {
    bits: AtomicU64,
}

impl CpucapSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the capability was newly set.
    pub fn set(&self, cap: Cpucap) -> bool {
        cap.bit()
            .is_some_and(|bit| self.bits.fetch_or(bit, Ordering::AcqRel) & bit == 0)
    }

    pub fn clear(&self, cap: Cpucap) {
        if let Some(bit) = cap.bit() {
            self.bits.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    #[must_use]
    pub fn has(&self, cap: Cpucap) -> bool {
        cap.bit()
            .is_some_and(|bit| self.bits.load(Ordering::Acquire) & bit != 0)
    }

    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }

    /// Iterates over the capabilities currently set.
    pub fn iter(&self) -> impl Iterator<Item = Cpucap> + use<> {
        let bits = self.bits();
        (0..64u16)
            .filter(move |i| bits & (1 << i) != 0)
            .map(Cpucap)
    }
}

/// Capabilities detected on the boot CPU.
pub static SYSTEM_CPUCAPS: CpucapSet = CpucapSet::new();

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_clear_and_query() {
        let caps = CpucapSet::new();
        assert!(!caps.has(Cpucap::HAS_LSE_ATOMICS));
        assert!(caps.set(Cpucap::HAS_LSE_ATOMICS));
        assert!(!caps.set(Cpucap::HAS_LSE_ATOMICS));
        assert!(caps.has(Cpucap::HAS_LSE_ATOMICS));
        assert!(!caps.has(Cpucap::HAS_CACHE_DIC));
        caps.clear(Cpucap::HAS_LSE_ATOMICS);
        assert_eq!(caps.bits(), 0);
    }

    #[test]
    fn out_of_range_identifiers_are_never_set() {
        let caps = CpucapSet::new();
        assert!(!caps.set(Cpucap::from_raw(200)));
        assert!(!caps.has(Cpucap::from_raw(200)));
    }

    #[test]
    fn iter_lists_set_caps_in_order() {
        let caps = CpucapSet::new();
        caps.set(Cpucap::HAS_CACHE_DIC);
        caps.set(Cpucap::WORKAROUND_CLEAN_CACHE);
        let got: Vec<_> = caps.iter().collect();
        assert_eq!(got, [Cpucap::WORKAROUND_CLEAN_CACHE, Cpucap::HAS_CACHE_DIC]);
    }

    #[test]
    fn callback_sentinel_follows_last_cap() {
        assert!(Cpucap::CB_PATCH.is_callback());
        assert!(!Cpucap::HAS_CACHE_DIC.is_callback());
        assert_eq!(Cpucap::CB_PATCH.to_string(), "CB_PATCH");
    }
}
