use crate::context::ContextLevel;
use bitfield_struct::bitfield;

/// Decoded queued-spinlock word.
///
/// The tail identifies the last queued waiter as `cpu + 1` and the index of
/// its per-CPU node; zero means the queue is empty.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LockWord {
    /// Non-zero while an owner holds the lock.
    pub locked: u8,
    /// The single waiter allowed to spin outside the queue.
    pub pending: bool,
    #[bits(7)]
    __: u8,
    #[bits(2)]
    pub tail_idx: u8,
    #[bits(14)]
    pub tail_cpu: u16,
}

impl LockWord {
    /// Tail code of the node used by `cpu` in context `level`.
    #[must_use]
    pub const fn tail_of(cpu: u32, level: ContextLevel) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let cpu = (cpu + 1) as u16;
        Self::new()
            .with_tail_cpu(cpu)
            .with_tail_idx(level as u8)
            .into_bits()
    }

    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.tail_cpu() != 0
    }

    /// CPU and context of the last queued waiter.
    #[must_use]
    pub const fn tail(&self) -> Option<(u32, ContextLevel)> {
        match self.tail_cpu() {
            0 => None,
            cpu => Some((cpu as u32 - 1, ContextLevel::from_index(self.tail_idx()))),
        }
    }
}
