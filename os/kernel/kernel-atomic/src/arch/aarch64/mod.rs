//! `aarch64` backend: inline assembly with LL/SC and LSE forms per call site.

#[macro_use]
mod alternative;
pub mod barrier;
mod cmpxchg;
mod ops;

pub use cmpxchg::{cmpxchg_double, load_pair};

use kernel_cpucaps::Cpucap;

/// Capability carried by every atomic call site's patch record.
pub const LSE_CAP: u16 = Cpucap::HAS_LSE_ATOMICS.index();
