//! Patch record layout and table iteration.
//!
//! A record is 12 bytes, little-endian:
//!
//! | bytes  | field                                                       |
//! |--------|-------------------------------------------------------------|
//! | 0..4   | `i32` offset from the record to the original sequence        |
//! | 4..8   | `i32` offset from this field to the replacement or callback  |
//! | 8..10  | `u16` capability                                            |
//! | 10     | original length in bytes                                    |
//! | 11     | replacement length in bytes                                 |

use crate::PatchError;
use bitfield_struct::bitfield;
use core::ops::Range;
use kernel_cpucaps::{Cpucap, CpucapSet};

pub const RECORD_SIZE: usize = 12;

/// Third word of a record.
#[bitfield(u32)]
pub struct RecordTail {
    pub cpucap: u16,
    pub orig_len: u8,
    pub alt_len: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub orig_offset: i32,
    pub alt_offset: i32,
    pub cpucap: Cpucap,
    pub orig_len: u8,
    pub alt_len: u8,
}

impl PatchRecord {
    #[must_use]
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        let tail = RecordTail::from_bits(u32::from_le_bytes(word(8)));
        Self {
            orig_offset: i32::from_le_bytes(word(0)),
            alt_offset: i32::from_le_bytes(word(4)),
            cpucap: Cpucap::from_raw(tail.cpucap()),
            orig_len: tail.orig_len(),
            alt_len: tail.alt_len(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let tail = RecordTail::new()
            .with_cpucap(self.cpucap.index())
            .with_orig_len(self.orig_len)
            .with_alt_len(self.alt_len);
        let mut out = [0; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.orig_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.alt_offset.to_le_bytes());
        out[8..12].copy_from_slice(&tail.into_bits().to_le_bytes());
        out
    }

    /// Builds a record located at `at` describing the given addresses.
    ///
    /// # Errors
    /// An offset does not fit 32 bits.
    pub fn between(
        at: u64,
        origin: u64,
        replacement: u64,
        cpucap: Cpucap,
        orig_len: u8,
        alt_len: u8,
    ) -> Result<Self, PatchError> {
        let offset = |from: u64, to: u64| {
            #[allow(clippy::cast_possible_wrap)]
            let delta = to.wrapping_sub(from) as i64;
            i32::try_from(delta).map_err(|_| PatchError::OutOfBounds { addr: to })
        };
        Ok(Self {
            orig_offset: offset(at, origin)?,
            alt_offset: offset(at + 4, replacement)?,
            cpucap,
            orig_len,
            alt_len,
        })
    }

    /// Resolves the record located at `at` into absolute addresses.
    ///
    /// # Errors
    /// Lengths that differ (inline records) or are not whole instructions.
    pub fn descriptor(&self, at: u64) -> Result<PatchDescriptor, PatchError> {
        let origin = at.wrapping_add_signed(i64::from(self.orig_offset));
        let replacement = (at + 4).wrapping_add_signed(i64::from(self.alt_offset));
        let len = usize::from(self.orig_len);

        if len % 4 != 0 {
            return Err(PatchError::UnalignedLength { record: at, len });
        }

        if self.cpucap.is_callback() {
            return Ok(PatchDescriptor::Callback {
                origin,
                len,
                generator: replacement,
            });
        }

        if self.orig_len != self.alt_len {
            return Err(PatchError::LengthMismatch {
                record: at,
                orig_len: self.orig_len,
                alt_len: self.alt_len,
            });
        }

        Ok(PatchDescriptor::Inline {
            origin,
            replacement,
            len,
            cap: self.cpucap,
        })
    }
}

/// A record resolved against its own address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PatchDescriptor {
    /// Copy `len` bytes from `replacement` over `origin` when `cap` is present.
    Inline {
        origin: u64,
        replacement: u64,
        len: usize,
        cap: Cpucap,
    },
    /// Let the callback at `generator` rewrite `origin` in place. Always applied.
    Callback {
        origin: u64,
        len: usize,
        generator: u64,
    },
}

impl PatchDescriptor {
    #[must_use]
    pub const fn origin(&self) -> u64 {
        match *self {
            Self::Inline { origin, .. } | Self::Callback { origin, .. } => origin,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        match *self {
            Self::Inline { len, .. } | Self::Callback { len, .. } => len,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn range(&self) -> Range<u64> {
        self.origin()..self.origin() + self.len() as u64
    }

    #[must_use]
    pub fn is_enabled(&self, caps: &CpucapSet) -> bool {
        match self {
            Self::Inline { cap, .. } => caps.has(*cap),
            Self::Callback { .. } => true,
        }
    }
}

/// A contiguous array of records, as found between a table's start and end symbols.
#[derive(Debug, Copy, Clone)]
pub struct PatchTable<'a> {
    bytes: &'a [u8],
    base: u64,
    replacements: Option<(u64, u64)>,
}

impl<'a> PatchTable<'a> {
    /// Wraps the record bytes found at address `base`.
    ///
    /// # Errors
    /// The byte length is not a whole number of records.
    pub const fn new(bytes: &'a [u8], base: u64) -> Result<Self, PatchError> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(PatchError::MalformedTable { len: bytes.len() });
        }
        Ok(Self {
            bytes,
            base,
            replacements: None,
        })
    }

    /// Declares where replacement sequences live, so that branches into
    /// a foreign replacement can be rejected.
    #[must_use]
    pub const fn with_replacement_section(mut self, section: Range<u64>) -> Self {
        self.replacements = Some((section.start, section.end));
        self
    }

    #[must_use]
    pub const fn replacement_section(&self) -> Option<Range<u64>> {
        match self.replacements {
            Some((start, end)) => Some(start..end),
            None => None,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Records with their addresses, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, PatchRecord)> + use<'a> {
        let base = self.base;
        self.bytes
            .chunks_exact(RECORD_SIZE)
            .enumerate()
            .map(move |(i, chunk)| {
                let mut raw = [0; RECORD_SIZE];
                raw.copy_from_slice(chunk);
                (base + (i * RECORD_SIZE) as u64, PatchRecord::decode(&raw))
            })
    }

    /// Rejects tables where two records patch overlapping ranges.
    ///
    /// # Errors
    /// The first overlapping pair, or the first malformed record.
    pub fn check_overlap(&self) -> Result<(), PatchError> {
        for (i, (at, record)) in self.iter().enumerate() {
            let a = record.descriptor(at)?.range();
            for (second_at, other) in self.iter().skip(i + 1) {
                let b = other.descriptor(second_at)?.range();
                if a.start < b.end && b.start < a.end {
                    return Err(PatchError::Overlap {
                        first: at,
                        second: second_at,
                    });
                }
            }
        }
        Ok(())
    }
}
