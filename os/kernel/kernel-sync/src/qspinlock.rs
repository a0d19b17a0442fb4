//! Queued spinlock.
//!
//! A single 32-bit word holds the owner byte, a pending bit for the first
//! waiter, and the tail of an MCS queue for everyone after it. Uncontended
//! acquisition is one compare-exchange; queued waiters each spin on their
//! own node and are released in arrival order.

use crate::PENDING_LOOPS;
use crate::context::{ExecContext, current_context};
use crate::lock_word::LockWord;
use crate::mcs::{decode_tail, node_for};
use kernel_atomic::barrier::{self, smp_full_fence, smp_store_fence};
use kernel_atomic::{Acquire, Atomic32, Relaxed};

const LOCKED_VAL: i32 = 1;
const LOCKED_MASK: i32 = 0xFF;
const PENDING_VAL: i32 = 1 << 8;
const PENDING_MASK: i32 = 0xFF << 8;
const LOCKED_PENDING_MASK: i32 = LOCKED_MASK | PENDING_MASK;
const TAIL_MASK: i32 = !0xFFFF;

#[derive(Debug, Default)]
pub struct QSpinLock {
    val: Atomic32,
}

#[allow(clippy::cast_possible_wrap)]
const fn tail_code(ctx: ExecContext) -> i32 {
    LockWord::tail_of(ctx.cpu, ctx.level) as i32
}

impl QSpinLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            val: Atomic32::new(0),
        }
    }

    /// Resets the word to unlocked. The lock must not be in use.
    pub fn init(&self) {
        self.val.set(0);
    }

    /// Takes the lock if it is entirely free; never waits.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if self.val.read() != 0 {
            return false;
        }
        self.val.cmpxchg::<Acquire>(0, LOCKED_VAL) == 0
    }

    /// Takes the lock, waiting as long as it takes.
    ///
    /// A busy word is seen with a plain read, so waiters arriving at a held
    /// lock do not pull its line exclusive before joining the slow path.
    #[inline]
    pub fn lock(&self) {
        let mut val = self.val.read();
        if val == 0 && self.val.try_cmpxchg::<Acquire>(&mut val, LOCKED_VAL) {
            return;
        }
        self.lock_slowpath(val);
    }

    /// Clears the owner byte with a byte-wide store-release. Pending and
    /// tail bits are left as they are.
    ///
    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        unsafe { barrier::store_release(self.locked_byte(), 0u8) };
    }

    /// The owner byte inside the lock word.
    fn locked_byte(&self) -> *mut u8 {
        let offset = if cfg!(target_endian = "big") { 3 } else { 0 };
        // SAFETY: the offset stays inside the 32-bit word.
        unsafe { self.val.as_ptr().cast::<u8>().add(offset) }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.val.read() != 0
    }

    /// Whether anyone besides the owner is pending or queued.
    #[must_use]
    pub fn is_contended(&self) -> bool {
        self.val.read() & !LOCKED_MASK != 0
    }

    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn snapshot(&self) -> LockWord {
        LockWord::from_bits(self.val.read() as u32)
    }

    #[cold]
    fn lock_slowpath(&self, mut val: i32) {
        // A pending-to-locked hand-over is in flight; give it a moment.
        if val == PENDING_VAL {
            let mut loops = PENDING_LOOPS;
            val = self.val.cond_read_relaxed(|v| {
                if v != PENDING_VAL || loops == 0 {
                    return true;
                }
                loops -= 1;
                false
            });
        }

        if val & !LOCKED_MASK == 0 {
            val = self.val.fetch_or::<Acquire>(PENDING_VAL);

            if val & !LOCKED_MASK == 0 {
                // Pending is ours: wait for the owner, then take over.
                if val & LOCKED_MASK != 0 {
                    self.val.cond_read_acquire(|v| v & LOCKED_MASK == 0);
                }
                self.val.add(LOCKED_VAL - PENDING_VAL);
                return;
            }

            // Raced with another waiter; undo pending only if we set it.
            if val & PENDING_MASK == 0 {
                self.val.andnot(PENDING_VAL);
            }
        }

        self.queue();
    }

    #[allow(clippy::cast_sign_loss)]
    fn queue(&self) {
        let ctx = current_context();
        let node = node_for(ctx);
        let tail = tail_code(ctx);
        node.claim();

        if self.try_lock() {
            node.release();
            return;
        }

        // The node must be initialized before its tail code is published.
        smp_store_fence();

        let old = self.xchg_tail(tail);
        let mut next = 0;

        if old & TAIL_MASK != 0 {
            let prev = decode_tail(old as u32);
            prev.next.set(tail as u32);
            node.locked.cond_read_acquire(|locked| locked != 0);
            next = node.next.read();
        }

        // Queue head: wait for the owner and the pending waiter to leave.
        let mut val = self.val.cond_read_acquire(|v| v & LOCKED_PENDING_MASK == 0);

        // Last in line: claim the lock and clear the tail in one step.
        if val & TAIL_MASK == tail && self.val.try_cmpxchg::<Relaxed>(&mut val, LOCKED_VAL) {
            node.release();
            return;
        }

        // Someone queued behind us; only we may set locked now.
        self.val.or(LOCKED_VAL);

        if next == 0 {
            next = node.next.cond_read_relaxed(|n| n != 0);
        }
        decode_tail(next).locked.set_release(1);
        node.handoffs.inc();
        node.release();
    }

    /// Publishes `tail`, keeping locked and pending; returns the previous word.
    fn xchg_tail(&self, tail: i32) -> i32 {
        let mut old = self.val.read();
        loop {
            let new = (old & LOCKED_PENDING_MASK) | tail;
            if self.val.try_cmpxchg::<Relaxed>(&mut old, new) {
                return old;
            }
        }
    }
}

/// Completed hand-overs from the node `ctx` queues with.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn handoff_count(ctx: ExecContext) -> u64 {
    node_for(ctx).handoffs.read() as u64
}

/// Upgrades the preceding `lock` to a full barrier.
#[inline]
pub fn smp_mb_after_spinlock() {
    smp_full_fence();
}
