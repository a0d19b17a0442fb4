//! Machine-code rendition of atomic call sites.
//!
//! [`AtomicSite`] produces the two instruction sequences an atomic operation
//! compiles to, and [`ImageBuilder`] lays them out the way the linker does
//! for inline call sites: the original sequence in hot text branching to an
//! out-of-line LL/SC loop, the LSE form in the replacement section, and a
//! record linking them.
//!
//! Register convention: `x0` address, `x1` operand or new value, `x2`
//! expected value, `x3` result. `x16`/`x17` are clobbered.

use crate::PatchError;
use crate::insn::{self, AluOp, LseOp, Width};
use crate::record::{PatchRecord, PatchTable, RECORD_SIZE};
use crate::sim::SimText;
use arrayvec::ArrayVec;
use core::ops::Range;
use kernel_atomic::OrderKind;
use kernel_cpucaps::Cpucap;

pub const PTR: u8 = 0;
pub const ARG: u8 = 1;
pub const EXPECTED: u8 = 2;
pub const RESULT: u8 = 3;
const TMP: u8 = 16;
const FAIL: u8 = 17;

/// Longest sequence a single site renders to.
pub const MAX_SEQ: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SiteOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    AndNot,
}

impl SiteOp {
    const fn llsc(self) -> AluOp {
        match self {
            Self::Add => AluOp::Add,
            Self::Sub => AluOp::Sub,
            Self::And => AluOp::And,
            Self::Or => AluOp::Orr,
            Self::Xor => AluOp::Eor,
            Self::AndNot => AluOp::Bic,
        }
    }

    /// LSE operation plus the operand rewrite it needs first, if any.
    fn lse(self, sf: bool) -> (LseOp, Option<u32>) {
        match self {
            Self::Add => (LseOp::Add, None),
            Self::Sub => (LseOp::Add, Some(insn::neg(sf, ARG, ARG))),
            Self::And => (LseOp::Clr, Some(insn::mvn(sf, ARG, ARG))),
            Self::Or => (LseOp::Set, None),
            Self::Xor => (LseOp::Eor, None),
            Self::AndNot => (LseOp::Clr, None),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SiteKind {
    /// Relaxed, no result.
    Op(SiteOp),
    /// Old value in `x3`.
    Fetch(SiteOp),
    /// New value in `x3`.
    AddReturn,
    SubReturn,
    /// Old value in `x3`.
    Xchg,
    /// Old value in `x3`; stored iff it equals `x2`.
    Cmpxchg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AtomicSite {
    pub kind: SiteKind,
    pub order: OrderKind,
    pub width: Width,
}

type Seq = ArrayVec<u32, MAX_SEQ>;

impl AtomicSite {
    #[must_use]
    pub const fn new(kind: SiteKind, order: OrderKind, width: Width) -> Self {
        Self { kind, order, width }
    }

    /// `(acquire, release, trailing dmb)` for the exclusive pair.
    const fn llsc_order(self) -> (bool, bool, bool) {
        match self.kind {
            SiteKind::Op(_) => (false, false, false),
            _ => match self.order {
                OrderKind::Relaxed => (false, false, false),
                OrderKind::Acquire => (true, false, false),
                OrderKind::Release => (false, true, false),
                OrderKind::Full => (false, true, true),
            },
        }
    }

    /// `(A, L)` bits of the LSE instruction.
    const fn lse_order(self) -> (bool, bool) {
        match self.kind {
            SiteKind::Op(_) => (false, false),
            _ => match self.order {
                OrderKind::Relaxed => (false, false),
                OrderKind::Acquire => (true, false),
                OrderKind::Release => (false, true),
                OrderKind::Full => (true, true),
            },
        }
    }

    /// The out-of-line exclusive loop, without its branch back.
    ///
    /// # Errors
    /// Only for sequences that cannot encode their internal branches.
    pub fn llsc(&self) -> Result<Seq, PatchError> {
        let w = self.width;
        let sf = w.is_64();
        let (acq, rel, mb) = self.llsc_order();
        let branch = |from: usize, to: usize| {
            insn::cbz(true, false, FAIL, (from * 4) as u64, (to * 4) as u64)
                .map_err(|_| PatchError::BranchOutOfRange {
                    addr: (from * 4) as u64,
                })
        };

        let mut seq = Seq::new();
        seq.push(insn::prfm_pstl1strm(PTR));
        match self.kind {
            SiteKind::Op(op) => {
                seq.push(insn::ldxr(w, false, TMP, PTR));
                seq.push(insn::alu(op.llsc(), sf, TMP, TMP, ARG));
                seq.push(insn::stxr(w, false, FAIL, TMP, PTR));
                seq.push(branch(4, 1)?);
            }
            SiteKind::Fetch(op) => {
                seq.push(insn::ldxr(w, acq, RESULT, PTR));
                seq.push(insn::alu(op.llsc(), sf, TMP, RESULT, ARG));
                seq.push(insn::stxr(w, rel, FAIL, TMP, PTR));
                seq.push(branch(4, 1)?);
            }
            SiteKind::AddReturn | SiteKind::SubReturn => {
                let op = if self.kind == SiteKind::AddReturn {
                    AluOp::Add
                } else {
                    AluOp::Sub
                };
                seq.push(insn::ldxr(w, acq, RESULT, PTR));
                seq.push(insn::alu(op, sf, RESULT, RESULT, ARG));
                seq.push(insn::stxr(w, rel, FAIL, RESULT, PTR));
                seq.push(branch(4, 1)?);
            }
            SiteKind::Xchg => {
                seq.push(insn::ldxr(w, acq, RESULT, PTR));
                seq.push(insn::stxr(w, rel, FAIL, ARG, PTR));
                seq.push(branch(3, 1)?);
            }
            SiteKind::Cmpxchg => {
                let end: u64 = if mb { 7 } else { 6 };
                seq.push(insn::ldxr(w, acq, RESULT, PTR));
                seq.push(insn::alu(AluOp::Eor, sf, TMP, RESULT, EXPECTED));
                seq.push(
                    insn::cbz(true, sf, TMP, 12, end * 4)
                        .map_err(|_| PatchError::BranchOutOfRange { addr: 12 })?,
                );
                seq.push(insn::stxr(w, rel, FAIL, ARG, PTR));
                seq.push(branch(5, 1)?);
            }
        }
        if mb {
            seq.push(insn::DMB_ISH);
        }
        Ok(seq)
    }

    /// The LSE replacement.
    #[must_use]
    pub fn lse(&self) -> Seq {
        let w = self.width;
        let sf = w.is_64();
        let (acq, rel) = self.lse_order();

        let mut seq = Seq::new();
        match self.kind {
            SiteKind::Op(op) => {
                let (lse_op, pre) = op.lse(sf);
                seq.extend(pre);
                seq.push(insn::lse(lse_op, w, false, false, ARG, insn::ZR, PTR));
            }
            SiteKind::Fetch(op) => {
                let (lse_op, pre) = op.lse(sf);
                seq.extend(pre);
                seq.push(insn::lse(lse_op, w, acq, rel, ARG, RESULT, PTR));
            }
            SiteKind::AddReturn | SiteKind::SubReturn => {
                if self.kind == SiteKind::SubReturn {
                    seq.push(insn::neg(sf, ARG, ARG));
                }
                seq.push(insn::lse(LseOp::Add, w, acq, rel, ARG, RESULT, PTR));
                seq.push(insn::alu(AluOp::Add, sf, RESULT, RESULT, ARG));
            }
            SiteKind::Xchg => {
                seq.push(insn::swp(w, acq, rel, ARG, RESULT, PTR));
            }
            SiteKind::Cmpxchg => {
                seq.push(insn::mov(sf, TMP, EXPECTED));
                seq.push(insn::cas(w, acq, rel, TMP, ARG, PTR));
                seq.push(insn::mov(sf, RESULT, TMP));
            }
        }
        seq
    }
}

/// Size of each text region.
pub const REGION_BYTES: u64 = 0x400;
#[allow(clippy::cast_possible_truncation)]
const REGION_WORDS: usize = REGION_BYTES as usize / 4;
pub const MAX_RECORDS: usize = 32;
const TABLE_BYTES: usize = MAX_RECORDS * RECORD_SIZE;

/// Addresses of an image: hot text, out-of-line text, replacements, records.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub base: u64,
}

impl ImageLayout {
    #[must_use]
    pub const fn hot(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub const fn cold(&self) -> u64 {
        self.base + REGION_BYTES
    }

    #[must_use]
    pub const fn replacements(&self) -> Range<u64> {
        self.base + 2 * REGION_BYTES..self.base + 3 * REGION_BYTES
    }

    #[must_use]
    pub const fn table(&self) -> u64 {
        self.base + 4 * REGION_BYTES
    }
}

/// Addresses assigned to one patch site.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SiteAddrs {
    pub entry: u64,
    pub replacement: u64,
}

struct Region {
    base: u64,
    words: ArrayVec<u32, REGION_WORDS>,
}

impl Region {
    const fn new(base: u64) -> Self {
        Self {
            base,
            words: ArrayVec::new_const(),
        }
    }

    fn next(&self) -> u64 {
        self.base + 4 * self.words.len() as u64
    }

    fn push(&mut self, insn: u32) -> Result<u64, PatchError> {
        let addr = self.next();
        self.words
            .try_push(insn)
            .map_err(|_| PatchError::OutOfBounds { addr })?;
        Ok(addr)
    }
}

pub struct ImageBuilder {
    layout: ImageLayout,
    hot: Region,
    cold: Region,
    replacements: Region,
    table: ArrayVec<u8, TABLE_BYTES>,
}

fn byte_len(words: usize, record: u64) -> Result<u8, PatchError> {
    u8::try_from(words * 4).map_err(|_| PatchError::TooLong {
        record,
        len: words * 4,
    })
}

impl ImageBuilder {
    #[must_use]
    pub const fn new(base: u64) -> Self {
        let layout = ImageLayout { base };
        Self {
            layout,
            hot: Region::new(layout.hot()),
            cold: Region::new(layout.cold()),
            replacements: Region::new(layout.replacements().start),
            table: ArrayVec::new_const(),
        }
    }

    fn next_record(&self) -> u64 {
        self.layout.table() + self.table.len() as u64
    }

    fn push_record(&mut self, record: &PatchRecord) -> Result<(), PatchError> {
        let addr = self.next_record();
        self.table
            .try_extend_from_slice(&record.encode())
            .map_err(|_| PatchError::OutOfBounds { addr })
    }

    /// Emits `original; ret` in hot text, `replacement` in the replacement
    /// section, and a record for `cap`. Lengths are recorded as given.
    ///
    /// # Errors
    /// A region or the table is full.
    pub fn add_alternative(
        &mut self,
        original: &[u32],
        replacement: &[u32],
        cap: Cpucap,
    ) -> Result<SiteAddrs, PatchError> {
        let entry = self.hot.next();
        for insn in original {
            self.hot.push(*insn)?;
        }
        self.hot.push(insn::RET)?;

        let repl = self.replacements.next();
        for insn in replacement {
            self.replacements.push(*insn)?;
        }

        let at = self.next_record();
        let record = PatchRecord::between(
            at,
            entry,
            repl,
            cap,
            byte_len(original.len(), at)?,
            byte_len(replacement.len(), at)?,
        )?;
        self.push_record(&record)?;
        Ok(SiteAddrs {
            entry,
            replacement: repl,
        })
    }

    /// Emits an atomic call site; returns its entry point.
    ///
    /// # Errors
    /// A region or the table is full.
    pub fn add_site(&mut self, site: &AtomicSite) -> Result<u64, PatchError> {
        let lse = site.lse();
        let entry = self.hot.next();
        let back = entry + 4 * lse.len() as u64;
        let out_of_line = self.cold.next();

        for insn in site.llsc()? {
            self.cold.push(insn)?;
        }
        let from = self.cold.next();
        let branch_back = insn::b(from, back)
            .map_err(|_| PatchError::BranchOutOfRange { addr: from })?;
        self.cold.push(branch_back)?;

        let mut original = Seq::new();
        let to_cold = insn::b(entry, out_of_line)
            .map_err(|_| PatchError::BranchOutOfRange { addr: entry })?;
        original.push(to_cold);
        while original.len() < lse.len() {
            original.push(insn::NOP);
        }

        let cap = Cpucap::HAS_LSE_ATOMICS;
        let addrs = self.add_alternative(&original, &lse, cap)?;
        Ok(addrs.entry)
    }

    /// Emits `original; ret` rewritten at patch time by the callback at `generator`.
    ///
    /// # Errors
    /// A region or the table is full.
    pub fn add_callback(&mut self, original: &[u32], generator: u64) -> Result<u64, PatchError> {
        let entry = self.hot.next();
        for insn in original {
            self.hot.push(*insn)?;
        }
        self.hot.push(insn::RET)?;

        let at = self.next_record();
        let len = byte_len(original.len(), at)?;
        let record = PatchRecord::between(at, entry, generator, Cpucap::CB_PATCH, len, 0)?;
        self.push_record(&record)?;
        Ok(entry)
    }

    #[must_use]
    pub fn finish(self) -> Image {
        let mut text = [0; 3 * REGION_WORDS];
        for (region, chunk) in [&self.hot, &self.cold, &self.replacements]
            .into_iter()
            .zip(text.chunks_exact_mut(REGION_WORDS))
        {
            chunk[..region.words.len()].copy_from_slice(&region.words);
        }
        Image {
            layout: self.layout,
            text,
            table: self.table,
        }
    }
}

/// An assembled image: three text regions and a record table.
pub struct Image {
    layout: ImageLayout,
    text: [u32; 3 * REGION_WORDS],
    table: ArrayVec<u8, TABLE_BYTES>,
}

impl Image {
    #[must_use]
    pub const fn layout(&self) -> ImageLayout {
        self.layout
    }

    #[must_use]
    pub const fn text(&self) -> &[u32] {
        &self.text
    }

    #[must_use]
    pub fn insn(&self, addr: u64) -> Option<u32> {
        let off = addr.checked_sub(self.layout.base)?;
        self.text.get(usize::try_from(off / 4).ok()?).copied()
    }

    /// Splits the image into patchable text and its record table.
    ///
    /// # Errors
    /// Never for images produced by [`ImageBuilder`].
    pub fn patch_parts(&mut self) -> Result<(SimText<'_>, PatchTable<'_>), PatchError> {
        let table = PatchTable::new(&self.table, self.layout.table())?
            .with_replacement_section(self.layout.replacements());
        Ok((SimText::new(self.layout.base, &mut self.text), table))
    }
}
