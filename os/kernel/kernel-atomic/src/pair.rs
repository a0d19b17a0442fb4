use crate::arch;
use crate::order::MemoryOrder;
use core::cell::UnsafeCell;

/// Two adjacent 64-bit words updated together by [`cmpxchg_double`](Self::cmpxchg_double).
///
/// Typically a pointer and the generation counter guarding it against ABA.
#[repr(C, align(16))]
pub struct AtomicPair {
    words: UnsafeCell<[u64; 2]>,
}

// Safety: every access goes through the atomic API.
unsafe impl Sync for AtomicPair {}

impl AtomicPair {
    #[must_use]
    pub const fn new(first: u64, second: u64) -> Self {
        Self {
            words: UnsafeCell::new([first, second]),
        }
    }

    /// Reads both words as one single-copy-atomic snapshot.
    #[must_use]
    pub fn load(&self) -> (u64, u64) {
        let [first, second] = unsafe { arch::load_pair(self.words.get()) };
        (first, second)
    }

    /// Replaces both words with `(new1, new2)` if they hold `(old1, old2)`.
    ///
    /// Returns whether the exchange happened.
    #[must_use = "the pair is only updated on success"]
    pub fn cmpxchg_double<O: MemoryOrder>(
        &self,
        old1: u64,
        old2: u64,
        new1: u64,
        new2: u64,
    ) -> bool {
        unsafe { arch::cmpxchg_double::<O>(self.words.get(), [old1, old2], [new1, new2]) }
    }
}
