use crate::barrier::{self, OrderedAccess};
use crate::order::{Full, MemoryOrder, Relaxed};
use crate::sealed::Sealed;
use core::cell::UnsafeCell;
use core::fmt;

/// Exchange and compare-exchange on 8/16/32/64-bit cells.
pub trait Exchange: OrderedAccess {
    /// Writes `new`, returning the previous value.
    ///
    /// # Safety
    /// `ptr` must be valid, naturally aligned and only accessed atomically.
    unsafe fn xchg<O: MemoryOrder>(ptr: *mut Self, new: Self) -> Self;

    /// Writes `new` if `*ptr == old`; returns the value witnessed.
    ///
    /// # Safety
    /// `ptr` must be valid, naturally aligned and only accessed atomically.
    unsafe fn cmpxchg<O: MemoryOrder>(ptr: *mut Self, old: Self, new: Self) -> Self;
}

/// Arithmetic and bitwise read-modify-write on 32/64-bit signed cells.
///
/// The `atomic_*` forms are relaxed and return nothing. All arithmetic
/// wraps in two's complement.
///
/// # Safety
/// Every method requires `ptr` to be valid, naturally aligned and only
/// accessed atomically.
#[allow(clippy::missing_safety_doc)]
pub trait AtomicInt: Exchange + Ord {
    const ZERO: Self;
    const ONE: Self;

    unsafe fn atomic_add(ptr: *mut Self, i: Self);
    unsafe fn atomic_sub(ptr: *mut Self, i: Self);
    unsafe fn atomic_and(ptr: *mut Self, i: Self);
    unsafe fn atomic_or(ptr: *mut Self, i: Self);
    unsafe fn atomic_xor(ptr: *mut Self, i: Self);
    unsafe fn atomic_andnot(ptr: *mut Self, i: Self);

    unsafe fn fetch_add<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn fetch_sub<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn fetch_and<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn fetch_or<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn fetch_xor<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn fetch_andnot<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;

    unsafe fn add_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;
    unsafe fn sub_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self;

    /// Fully ordered; stores only when the result is non-negative.
    unsafe fn dec_if_positive(ptr: *mut Self) -> Self;

    #[must_use]
    fn wrapping_add(self, rhs: Self) -> Self;
}

macro_rules! sealed {
    ($($ty:ty),*) => {$( impl Sealed for $ty {} )*};
}

sealed!(u8, u16, u32, u64, i32, i64, usize);

/// Exchanges `*ptr` with `new`.
///
/// # Safety
/// See [`Exchange::xchg`].
#[inline]
pub unsafe fn xchg<O: MemoryOrder, T: Exchange>(ptr: *mut T, new: T) -> T {
    unsafe { T::xchg::<O>(ptr, new) }
}

/// Compare-exchanges `*ptr`, returning the witnessed value.
///
/// # Safety
/// See [`Exchange::cmpxchg`].
#[inline]
pub unsafe fn cmpxchg<O: MemoryOrder, T: Exchange>(ptr: *mut T, old: T, new: T) -> T {
    unsafe { T::cmpxchg::<O>(ptr, old, new) }
}

/// A naturally aligned integer accessed only through atomic operations.
#[repr(transparent)]
pub struct Atomic<T> {
    value: UnsafeCell<T>,
}

pub type Atomic32 = Atomic<i32>;
pub type Atomic64 = Atomic<i64>;

// Safety: every access goes through the atomic API.
unsafe impl<T: Send> Sync for Atomic<T> {}

impl<T> Atomic<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut T {
        self.value.get()
    }

    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Exchange> Atomic<T> {
    #[inline]
    pub fn read(&self) -> T {
        unsafe { barrier::read_once(self.as_ptr()) }
    }

    #[inline]
    pub fn set(&self, value: T) {
        unsafe { barrier::write_once(self.as_ptr(), value) }
    }

    #[inline]
    pub fn read_acquire(&self) -> T {
        unsafe { barrier::load_acquire(self.as_ptr()) }
    }

    #[inline]
    pub fn set_release(&self, value: T) {
        unsafe { barrier::store_release(self.as_ptr(), value) }
    }

    /// Waits, relaxed, until `cond` accepts the value.
    #[inline]
    pub fn cond_read_relaxed(&self, cond: impl FnMut(T) -> bool) -> T {
        unsafe { barrier::cond_load_relaxed(self.as_ptr(), cond) }
    }

    /// Waits until `cond` accepts the value; the final read is an acquire.
    #[inline]
    pub fn cond_read_acquire(&self, cond: impl FnMut(T) -> bool) -> T {
        unsafe { barrier::cond_load_acquire(self.as_ptr(), cond) }
    }

    #[inline]
    pub fn xchg<O: MemoryOrder>(&self, new: T) -> T {
        unsafe { T::xchg::<O>(self.as_ptr(), new) }
    }

    /// Returns the witnessed value; success iff it equals `old`.
    #[inline]
    pub fn cmpxchg<O: MemoryOrder>(&self, old: T, new: T) -> T {
        unsafe { T::cmpxchg::<O>(self.as_ptr(), old, new) }
    }

    /// Like [`cmpxchg`](Self::cmpxchg), but refreshes `old` on failure.
    #[inline]
    pub fn try_cmpxchg<O: MemoryOrder>(&self, old: &mut T, new: T) -> bool {
        let seen = self.cmpxchg::<O>(*old, new);
        if seen == *old {
            true
        } else {
            *old = seen;
            false
        }
    }
}

macro_rules! void_ops {
    ($($(#[$doc:meta])* $name:ident => $raw:ident;)*) => {$(
        $(#[$doc])*
        #[inline]
        pub fn $name(&self, i: T) {
            unsafe { T::$raw(self.as_ptr(), i) }
        }
    )*};
}

macro_rules! ordered_ops {
    ($($name:ident),*) => {$(
        #[inline]
        pub fn $name<O: MemoryOrder>(&self, i: T) -> T {
            unsafe { T::$name::<O>(self.as_ptr(), i) }
        }
    )*};
}

impl<T: AtomicInt> Atomic<T> {
    void_ops! {
        add => atomic_add;
        sub => atomic_sub;
        and => atomic_and;
        or => atomic_or;
        xor => atomic_xor;
        /// Clears the bits set in `i`.
        andnot => atomic_andnot;
    }

    ordered_ops!(
        fetch_add,
        fetch_sub,
        fetch_and,
        fetch_or,
        fetch_xor,
        fetch_andnot,
        add_return,
        sub_return
    );

    #[inline]
    pub fn inc(&self) {
        self.add(T::ONE);
    }

    #[inline]
    pub fn dec(&self) {
        self.sub(T::ONE);
    }

    /// Decrements unless that would go negative; returns the would-be result.
    ///
    /// A negative return means the cell was left unchanged.
    #[inline]
    pub fn dec_if_positive(&self) -> T {
        unsafe { T::dec_if_positive(self.as_ptr()) }
    }

    /// Adds `a` unless the cell holds `unless`; returns the previous value.
    pub fn fetch_add_unless(&self, a: T, unless: T) -> T {
        let mut old = self.read();
        loop {
            if old == unless {
                return old;
            }
            let new = old.wrapping_add(a);
            if self.try_cmpxchg::<Full>(&mut old, new) {
                return old;
            }
        }
    }

    /// Increments unless the cell is zero.
    pub fn inc_not_zero(&self) -> bool {
        self.fetch_add_unless(T::ONE, T::ZERO) != T::ZERO
    }

    /// Relaxed compare-exchange loop applying `f`, returning the previous value.
    pub fn fetch_update(&self, mut f: impl FnMut(T) -> T) -> T {
        let mut old = self.read();
        loop {
            let new = f(old);
            if self.try_cmpxchg::<Relaxed>(&mut old, new) {
                return old;
            }
        }
    }
}

impl<T: Exchange + Default> Default for Atomic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Exchange + fmt::Debug> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic").field(&self.read()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::order::{Acquire, Release};

    #[test]
    fn add_wraps_in_twos_complement() {
        let c = Atomic32::new(0x7fff_ffff);
        c.add(1);
        assert_eq!(c.read().cast_unsigned(), 0x8000_0000);
        assert_eq!(c.add_return::<Full>(-1), 0x7fff_ffff);
    }

    #[test]
    fn xor_twice_is_a_no_op() {
        let c = Atomic64::new(0x5555);
        c.xor(0x0ff0);
        c.xor(0x0ff0);
        assert_eq!(c.read(), 0x5555);
    }

    #[test]
    fn or_then_andnot_clears_exactly_the_mask() {
        let c = Atomic32::new(0b1000_0001);
        c.or(0b0110);
        assert_eq!(c.read(), 0b1000_0111);
        c.and(!0b0110);
        assert_eq!(c.read(), 0b1000_0001);
        c.or(0b0110);
        c.andnot(0b0110);
        assert_eq!(c.read(), 0b1000_0001);
    }

    #[test]
    fn fetch_ops_return_the_previous_value() {
        let c = Atomic64::new(10);
        assert_eq!(c.fetch_add::<Relaxed>(5), 10);
        assert_eq!(c.fetch_sub::<Acquire>(3), 15);
        assert_eq!(c.fetch_or::<Release>(0x100), 12);
        assert_eq!(c.fetch_and::<Full>(0xff), 0x10c);
        assert_eq!(c.fetch_xor::<Relaxed>(0xc), 12);
        assert_eq!(c.fetch_andnot::<Full>(0), 0);
        assert_eq!(c.sub_return::<Release>(1), -1);
    }

    #[test]
    fn exchange_restores_previous_value() {
        let c = Atomic32::new(7);
        let prev = c.xchg::<Full>(9);
        assert_eq!(prev, 7);
        assert_eq!(c.xchg::<Acquire>(prev), 9);
        assert_eq!(c.cmpxchg::<Relaxed>(7, 7), 7);
    }

    #[test]
    fn cmpxchg_mismatch_returns_witnessed_value() {
        let c = Atomic64::new(3);
        assert_eq!(c.cmpxchg::<Full>(4, 100), 3);
        assert_eq!(c.read(), 3);
        assert_eq!(c.cmpxchg::<Full>(3, 100), 3);
        assert_eq!(c.read(), 100);
    }

    #[test]
    fn try_cmpxchg_refreshes_expected() {
        let c = Atomic32::new(5);
        let mut old = 4;
        assert!(!c.try_cmpxchg::<Acquire>(&mut old, 6));
        assert_eq!(old, 5);
        assert!(c.try_cmpxchg::<Acquire>(&mut old, 6));
        assert_eq!(c.read(), 6);
    }

    #[test]
    fn dec_if_positive_at_zero_leaves_cell_unchanged() {
        let c = Atomic32::new(0);
        assert!(c.dec_if_positive() < 0);
        assert_eq!(c.read(), 0);

        let c = Atomic64::new(2);
        assert_eq!(c.dec_if_positive(), 1);
        assert_eq!(c.dec_if_positive(), 0);
        assert_eq!(c.dec_if_positive(), -1);
        assert_eq!(c.read(), 0);
    }

    #[test]
    fn fetch_add_unless_and_inc_not_zero() {
        let c = Atomic32::new(0);
        assert!(!c.inc_not_zero());
        assert_eq!(c.read(), 0);
        c.set(1);
        assert!(c.inc_not_zero());
        assert_eq!(c.read(), 2);
        assert_eq!(c.fetch_add_unless(5, 2), 2);
        assert_eq!(c.fetch_add_unless(5, 0), 2);
        assert_eq!(c.read(), 7);
    }

    #[test]
    fn sub_word_exchange() {
        let mut b = 0xAAu8;
        let mut h = 0x1234u16;
        unsafe {
            assert_eq!(xchg::<Full, _>(&raw mut b, 0x55), 0xAA);
            assert_eq!(cmpxchg::<Acquire, _>(&raw mut b, 0x55, 0xFF), 0x55);
            assert_eq!(cmpxchg::<Release, _>(&raw mut h, 0x1, 0x2), 0x1234);
            assert_eq!(xchg::<Relaxed, _>(&raw mut h, 0xFFFF), 0x1234);
        }
        assert_eq!(b, 0xFF);
        assert_eq!(h, 0xFFFF);
    }

    #[test]
    fn release_and_acquire_round_trip() {
        let c = Atomic64::new(0);
        c.set_release(-5);
        assert_eq!(c.read_acquire(), -5);
        assert_eq!(c.cond_read_acquire(|v| v < 0), -5);
        assert_eq!(c.cond_read_relaxed(|v| v == -5), -5);
        c.inc();
        c.dec();
        c.dec();
        assert_eq!(c.fetch_update(|v| v * 2), -6);
        assert_eq!(c.into_inner(), -12);
    }
}
