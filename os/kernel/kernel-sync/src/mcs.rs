//! Per-CPU MCS queue nodes.

use crate::NR_CPUS;
use crate::context::{ContextLevel, ExecContext};
use crate::lock_word::LockWord;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_atomic::{Atomic, Atomic64};

/// One waiter's queue entry. Each node sits on its own cache line so that
/// spinning on `locked` touches nothing another waiter writes.
#[repr(align(64))]
pub(crate) struct McsNode {
    /// Tail code of the successor; zero until it links itself in.
    pub(crate) next: Atomic<u32>,
    /// Set to 1 by the predecessor when this node becomes queue head.
    pub(crate) locked: Atomic<u32>,
    /// Completed hand-overs to a successor. Read by [`handoff_count`] for
    /// diagnostics; nothing in the locking path consults it.
    ///
    /// [`handoff_count`]: crate::handoff_count
    pub(crate) handoffs: Atomic64,
    #[cfg(debug_assertions)]
    in_use: AtomicBool,
}

impl McsNode {
    const fn new() -> Self {
        Self {
            next: Atomic::new(0),
            locked: Atomic::new(0),
            handoffs: Atomic64::new(0),
            #[cfg(debug_assertions)]
            in_use: AtomicBool::new(false),
        }
    }

    /// Takes the node for a queueing attempt.
    pub(crate) fn claim(&self) {
        #[cfg(debug_assertions)]
        {
            let reentered = self.in_use.swap(true, Ordering::Relaxed);
            debug_assert!(!reentered, "queued spinlock re-entered from the same context");
        }
        self.locked.set(0);
        self.next.set(0);
    }

    pub(crate) fn release(&self) {
        #[cfg(debug_assertions)]
        self.in_use.store(false, Ordering::Relaxed);
    }
}

static QNODES: [[McsNode; ContextLevel::COUNT]; NR_CPUS] =
    [const { [const { McsNode::new() }; ContextLevel::COUNT] }; NR_CPUS];

pub(crate) fn node_for(ctx: ExecContext) -> &'static McsNode {
    debug_assert!((ctx.cpu as usize) < NR_CPUS, "cpu {} out of range", ctx.cpu);
    &QNODES[ctx.cpu as usize][ctx.level.index()]
}

/// Node named by a non-zero tail code.
pub(crate) fn decode_tail(tail: u32) -> &'static McsNode {
    let word = LockWord::from_bits(tail);
    let cpu = usize::from(word.tail_cpu()) - 1;
    &QNODES[cpu][usize::from(word.tail_idx())]
}
