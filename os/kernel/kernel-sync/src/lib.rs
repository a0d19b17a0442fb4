//! # Kernel synchronization primitives
//!
//! The queued spinlock: one 32-bit word per lock, a pending bit for the
//! first waiter and per-CPU MCS nodes for the rest. Each CPU owns one node
//! per [`ContextLevel`], so an interrupt handler may take a different lock
//! while the interrupted code is queued on another.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod context;
mod lock_word;
mod mcs;
mod qspinlock;
mod spin_lock;

pub use context::{
    ContextLevel, ContextSource, ExecContext, current_context, install_context_source,
};
pub use lock_word::LockWord;
pub use qspinlock::{QSpinLock, handoff_count, smp_mb_after_spinlock};
pub use spin_lock::{SpinLock, SpinLockGuard};

/// Number of CPUs with their own set of queue nodes.
pub const NR_CPUS: usize = 256;

/// Extra polls of a lock word caught mid pending-to-locked hand-over before
/// the caller queues instead.
pub const PENDING_LOOPS: u32 = 1;
