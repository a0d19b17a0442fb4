//! Fences and single-variable ordered accesses.
//!
//! Fences come in two scopes: system (`dsb`, every observer including
//! devices) and inner-shareable (`dmb ish`, coherent cores only). Most
//! ordering needs are better served by [`load_acquire`] and
//! [`store_release`], which map onto `ldar`/`stlr`.

use crate::sealed::Sealed;

pub use crate::arch::barrier::{
    dsb_ish, full_fence, isb, load_fence, smp_full_fence, smp_load_fence, smp_store_fence,
    store_fence,
};

/// Prevents the compiler from moving memory accesses across this point.
#[inline(always)]
#[allow(clippy::inline_always)]
pub fn compiler_barrier() {
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

/// Types with 8/16/32/64-bit ordered load/store and compare-and-wait.
///
/// Implemented for `u8`, `u16`, `u32`, `u64`, `i32`, `i64` and `usize`.
pub trait OrderedAccess: Sealed + Copy + Eq {
    /// # Safety
    /// `ptr` must be valid and naturally aligned.
    unsafe fn load_acquire(ptr: *const Self) -> Self;

    /// # Safety
    /// `ptr` must be valid and naturally aligned.
    unsafe fn store_release(ptr: *mut Self, value: Self);

    /// # Safety
    /// `ptr` must be valid and naturally aligned.
    unsafe fn read_once(ptr: *const Self) -> Self;

    /// # Safety
    /// `ptr` must be valid and naturally aligned.
    unsafe fn write_once(ptr: *mut Self, value: Self);

    /// # Safety
    /// `ptr` must be valid and naturally aligned.
    unsafe fn wait_while_equal(ptr: *const Self, value: Self);
}

/// Reads `*ptr`; accesses after this one cannot be observed before it.
///
/// # Safety
/// `ptr` must be valid for reads, naturally aligned, and only accessed
/// atomically by other threads.
#[inline]
pub unsafe fn load_acquire<T: OrderedAccess>(ptr: *const T) -> T {
    unsafe { T::load_acquire(ptr) }
}

/// Writes `value` to `*ptr`; accesses before this one are visible to any
/// observer that acquires `value`.
///
/// # Safety
/// `ptr` must be valid for writes, naturally aligned, and only accessed
/// atomically by other threads.
#[inline]
pub unsafe fn store_release<T: OrderedAccess>(ptr: *mut T, value: T) {
    unsafe { T::store_release(ptr, value) }
}

/// Single-copy atomic read with no ordering.
///
/// # Safety
/// As for [`load_acquire`].
#[inline]
pub unsafe fn read_once<T: OrderedAccess>(ptr: *const T) -> T {
    unsafe { T::read_once(ptr) }
}

/// Single-copy atomic write with no ordering.
///
/// # Safety
/// As for [`store_release`].
#[inline]
pub unsafe fn write_once<T: OrderedAccess>(ptr: *mut T, value: T) {
    unsafe { T::write_once(ptr, value) }
}

/// Suspends the core while `*ptr` may still hold `value`.
///
/// Returns once the location was observed to differ, or after any event
/// wakes the core. Wake-ups are advisory: callers re-check their predicate.
///
/// # Safety
/// As for [`load_acquire`].
#[inline]
pub unsafe fn wait_while_equal<T: OrderedAccess>(ptr: *const T, value: T) {
    unsafe { T::wait_while_equal(ptr, value) }
}

/// Spins on relaxed reads of `*ptr` until `cond` accepts the value.
///
/// # Safety
/// As for [`load_acquire`].
#[inline]
pub unsafe fn cond_load_relaxed<T, F>(ptr: *const T, mut cond: F) -> T
where
    T: OrderedAccess,
    F: FnMut(T) -> bool,
{
    loop {
        let value = unsafe { T::read_once(ptr) };
        if cond(value) {
            return value;
        }
        unsafe { T::wait_while_equal(ptr, value) };
    }
}

/// Spins on acquire reads of `*ptr` until `cond` accepts the value.
///
/// # Safety
/// As for [`load_acquire`].
#[inline]
pub unsafe fn cond_load_acquire<T, F>(ptr: *const T, mut cond: F) -> T
where
    T: OrderedAccess,
    F: FnMut(T) -> bool,
{
    loop {
        let value = unsafe { T::load_acquire(ptr) };
        if cond(value) {
            return value;
        }
        unsafe { T::wait_while_equal(ptr, value) };
    }
}
