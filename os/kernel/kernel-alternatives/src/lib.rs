//! # Kernel Alternatives
//!
//! Boot-time code patching. Every atomic call site is assembled twice: an
//! inline branch into an LL/SC sequence, and an equal-length LSE sequence in
//! a separate section. A table of [`PatchRecord`]s links the two; once CPU
//! capabilities are known, [`Alternatives::apply_boot`] copies each enabled
//! replacement over its original so that later calls run the native form.
//!
//! The engine is generic over [`PatchTarget`], so the same code patches live
//! kernel text and the in-memory images used by the [`sim`] interpreter.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod assemble;
mod engine;
pub mod insn;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod live;
mod record;
pub mod sim;

pub use engine::{AltCallback, IcacheSync, PatchSummary, PatchTarget, apply_alternatives};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use live::{LiveText, apply_system_alternatives};
pub use record::{PatchDescriptor, PatchRecord, PatchTable, RECORD_SIZE, RecordTail};

use kernel_atomic::barrier::isb;
use kernel_atomic::event::send_event_broadcast;
use kernel_atomic::{Atomic32, Full};
use kernel_cpucaps::{Cpucap, CpucapSet};
use log::{debug, info};

/// Longest original sequence a callback may rewrite, in instructions.
pub const MAX_PATCH_INSNS: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("record {record:#x}: original is {orig_len} bytes but replacement is {alt_len}")]
    LengthMismatch {
        record: u64,
        orig_len: u8,
        alt_len: u8,
    },
    #[error("record {record:#x}: length {len} is not a whole number of instructions")]
    UnalignedLength { record: u64, len: usize },
    #[error("record {record:#x}: {len} bytes exceed the callback buffer")]
    TooLong { record: u64, len: usize },
    #[error("patch table of {len} bytes is not a whole number of records")]
    MalformedTable { len: usize },
    #[error("address {addr:#x} is outside the patched image")]
    OutOfBounds { addr: u64 },
    #[error("relocated branch at {addr:#x} is out of range")]
    BranchOutOfRange { addr: u64 },
    #[error("instruction at {addr:#x} branches into another replacement at {target:#x}")]
    BranchIntoReplacement { addr: u64, target: u64 },
    #[error("literal load at {addr:#x} cannot be relocated")]
    LiteralLoad { addr: u64 },
    #[error("records {first:#x} and {second:#x} patch overlapping ranges")]
    Overlap { first: u64, second: u64 },
    #[error("no callback registered at {addr:#x}")]
    UnknownCallback { addr: u64 },
}

/// Patching state of one kernel image.
///
/// The boot core applies the table once; secondary cores wait for the
/// published flag and resynchronize their instruction stream.
#[derive(Debug, Default)]
pub struct Alternatives {
    applied: CpucapSet,
    boot_done: Atomic32,
}

impl Alternatives {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            applied: CpucapSet::new(),
            boot_done: Atomic32::new(0),
        }
    }

    /// Applies the boot table and releases waiting secondary cores.
    ///
    /// Must run while no other core executes patched code.
    ///
    /// # Errors
    /// See [`apply_alternatives`]. Secondary cores stay parked on failure.
    pub fn apply_boot<T: PatchTarget + ?Sized>(
        &self,
        target: &mut T,
        table: &PatchTable<'_>,
        caps: &CpucapSet,
    ) -> Result<PatchSummary, PatchError> {
        if cfg!(debug_assertions) {
            table.check_overlap()?;
        }

        let summary = apply_alternatives(target, table, caps, &self.applied)?;

        if self.boot_done.xchg::<Full>(1) == 0 {
            info!(
                "alternatives: applied {} of {} patch sites",
                summary.applied,
                summary.applied + summary.skipped
            );
        }
        send_event_broadcast();
        Ok(summary)
    }

    /// Applies a loadable module's table against the boot capabilities.
    ///
    /// # Errors
    /// See [`apply_alternatives`].
    pub fn apply_module<T: PatchTarget + ?Sized>(
        &self,
        target: &mut T,
        table: &PatchTable<'_>,
        caps: &CpucapSet,
    ) -> Result<PatchSummary, PatchError> {
        table.check_overlap()?;
        apply_alternatives(target, table, caps, &self.applied)
    }

    /// Parks a secondary core until boot patching completed.
    pub fn wait_for_boot_patching(&self) {
        self.boot_done.cond_read_acquire(|done| done != 0);
        isb();
        debug!("alternatives: secondary core synchronized");
    }

    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.boot_done.read_acquire() != 0
    }

    /// Whether at least one record for `cap` was applied.
    #[must_use]
    pub fn is_applied(&self, cap: Cpucap) -> bool {
        self.applied.has(cap)
    }

    #[must_use]
    pub const fn applied(&self) -> &CpucapSet {
        &self.applied
    }
}

/// Patching state of the running kernel.
pub static SYSTEM_ALTERNATIVES: Alternatives = Alternatives::new();
