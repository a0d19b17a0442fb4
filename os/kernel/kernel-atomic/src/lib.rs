//! # Kernel atomics
//!
//! Barriers, ordered single-variable accesses, the event-register wait/wake
//! substrate and read-modify-write operations on 32/64-bit cells.
//!
//! On `aarch64` every RMW call site is assembled twice: an out-of-line
//! load-exclusive/store-exclusive loop and a single-instruction LSE sequence,
//! tied together by a record in `.altinstructions` carrying
//! [`Cpucap::HAS_LSE_ATOMICS`](kernel_cpucaps::Cpucap::HAS_LSE_ATOMICS).
//! Other targets use a portable backend over `core::sync::atomic`.
//!
//! Memory ordering is a type parameter ([`Relaxed`], [`Acquire`],
//! [`Release`], [`Full`]) resolved at monomorphization time.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

mod arch;
mod atomic;
pub mod barrier;
pub mod event;
mod order;
mod pair;

pub use atomic::{Atomic, Atomic32, Atomic64, AtomicInt, Exchange, cmpxchg, xchg};
pub use order::{Acquire, Full, MemoryOrder, OrderKind, Relaxed, Release};
pub use pair::AtomicPair;

mod sealed {
    pub trait Sealed {}
}
