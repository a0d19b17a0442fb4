use crate::insn::{self, EncodeError, PcRel};
use crate::record::{PatchDescriptor, PatchRecord, PatchTable};
use crate::{MAX_PATCH_INSNS, PatchError};
use arrayvec::ArrayVec;
use core::ops::{Range, RangeInclusive};
use kernel_cpucaps::{Cpucap, CpucapSet};
use log::trace;

/// Rewrites the original sequence of a callback record.
///
/// Receives the record, the current instructions and an output buffer of
/// the same length, pre-filled with the current instructions.
pub type AltCallback = fn(&PatchRecord, &[u32], &mut [u32]);

/// Instruction memory being patched.
///
/// The live implementation writes kernel text; tests patch an in-memory image.
pub trait PatchTarget {
    /// # Errors
    /// `addr` is outside the target.
    fn read_insn(&self, addr: u64) -> Result<u32, PatchError>;

    /// # Errors
    /// `addr` is outside the target.
    fn write_insn(&mut self, addr: u64, insn: u32) -> Result<(), PatchError>;

    /// Cleans the written range to the point of coherency.
    fn clean_dcache_range(&mut self, start: u64, end: u64);

    /// Makes the written text visible to instruction fetch on every core.
    fn sync_icache(&mut self, how: IcacheSync);

    /// Looks up the callback whose entry point is `addr`.
    fn resolve_callback(&self, addr: u64) -> Option<AltCallback>;
}

/// Instruction-cache maintenance after a table has been written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IcacheSync {
    /// Instruction fetch is coherent with data (`CTR_EL0.DIC`); only the
    /// barriers are needed.
    Barrier,
    /// Invalidate the instruction caches of all inner-shareable cores.
    InvalidateInnerShareable,
}

impl IcacheSync {
    #[must_use]
    pub fn for_caps(caps: &CpucapSet) -> Self {
        if caps.has(Cpucap::HAS_CACHE_DIC) {
            Self::Barrier
        } else {
            Self::InvalidateInnerShareable
        }
    }

    /// The instructions that perform this maintenance.
    #[must_use]
    pub const fn sequence(self) -> &'static [u32] {
        match self {
            Self::Barrier => &[insn::DSB_ISH, insn::ISB],
            Self::InvalidateInnerShareable => {
                &[insn::DSB_ISH, insn::IC_IALLUIS, insn::DSB_ISH, insn::ISB]
            }
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Applies every enabled record of `table` to `target`.
///
/// Records whose capability is absent from `caps` are left untouched.
/// Capabilities of applied records are added to `applied`. Reapplying the
/// same table yields the same text.
///
/// # Errors
/// The first malformed or unrelocatable record. Records before it stay applied.
pub fn apply_alternatives<T: PatchTarget + ?Sized>(
    target: &mut T,
    table: &PatchTable<'_>,
    caps: &CpucapSet,
    applied: &CpucapSet,
) -> Result<PatchSummary, PatchError> {
    let mut summary = PatchSummary::default();
    let section = table.replacement_section();

    for (at, record) in table.iter() {
        let desc = record.descriptor(at)?;
        if !desc.is_enabled(caps) {
            trace!("alternatives: skip {at:#x} ({})", record.cpucap);
            summary.skipped += 1;
            continue;
        }

        match desc {
            PatchDescriptor::Inline {
                origin,
                replacement,
                len,
                cap,
            } => {
                let own = replacement..=replacement + len as u64;
                for off in (0..len as u64).step_by(4) {
                    let insn = target.read_insn(replacement + off)?;
                    let from = replacement + off;
                    let insn = relocate(insn, from, origin + off, &own, section.as_ref())?;
                    target.write_insn(origin + off, insn)?;
                }
                applied.set(cap);
            }
            PatchDescriptor::Callback {
                origin,
                len,
                generator,
            } => {
                let callback = target
                    .resolve_callback(generator)
                    .ok_or(PatchError::UnknownCallback { addr: generator })?;
                let mut current = ArrayVec::<u32, MAX_PATCH_INSNS>::new();
                for off in (0..len as u64).step_by(4) {
                    current
                        .try_push(target.read_insn(origin + off)?)
                        .map_err(|_| PatchError::TooLong { record: at, len })?;
                }
                let mut updated = current.clone();
                callback(&record, &current, &mut updated);
                for (addr, insn) in (origin..).step_by(4).zip(updated) {
                    target.write_insn(addr, insn)?;
                }
            }
        }

        let range = desc.range();
        trace!("alternatives: patched {range:x?} ({})", record.cpucap);
        target.clean_dcache_range(range.start, range.end);
        summary.applied += 1;
    }

    target.sync_icache(IcacheSync::for_caps(caps));
    Ok(summary)
}

/// Adjusts a replacement instruction moved from `from` to `to`.
///
/// PC-relative targets inside the replacement itself (its end included)
/// move with it; anything else keeps its absolute target.
fn relocate(
    insn: u32,
    from: u64,
    to: u64,
    own: &RangeInclusive<u64>,
    section: Option<&Range<u64>>,
) -> Result<u32, PatchError> {
    let Some(kind) = PcRel::classify(insn) else {
        return Ok(insn);
    };
    let Some(offset) = kind.offset(insn) else {
        return Err(PatchError::LiteralLoad { addr: from });
    };

    let out_of_range = |_: EncodeError| PatchError::BranchOutOfRange { addr: from };

    if kind == PcRel::Adrp {
        let page = (from & !0xFFF).wrapping_add_signed(offset);
        #[allow(clippy::cast_possible_wrap)]
        let rebased = page.wrapping_sub(to & !0xFFF) as i64;
        return kind.with_offset(insn, rebased).map_err(out_of_range);
    }

    let target = from.wrapping_add_signed(offset);
    if own.contains(&target) {
        return Ok(insn);
    }
    if section.is_some_and(|s| s.contains(&target)) {
        return Err(PatchError::BranchIntoReplacement { addr: from, target });
    }

    #[allow(clippy::cast_possible_wrap)]
    let rebased = target.wrapping_sub(to) as i64;
    kind.with_offset(insn, rebased).map_err(out_of_range)
}
