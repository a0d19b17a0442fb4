//! Host backend over `core::sync::atomic`.
//!
//! `Full` maps to `SeqCst`; failed compare-exchanges use the weakest
//! failure ordering the success ordering allows.

use crate::atomic::{AtomicInt, Exchange};
use crate::barrier::OrderedAccess;
use crate::event::cpu_relax;
use crate::order::{MemoryOrder, OrderKind};
use core::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize,
    Ordering,
};

pub mod barrier {
    use core::sync::atomic::{Ordering, compiler_fence, fence};

    #[inline]
    pub fn full_fence() {
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn load_fence() {
        fence(Ordering::Acquire);
    }

    #[inline]
    pub fn store_fence() {
        fence(Ordering::Release);
    }

    #[inline]
    pub fn smp_full_fence() {
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn smp_load_fence() {
        fence(Ordering::Acquire);
    }

    #[inline]
    pub fn smp_store_fence() {
        fence(Ordering::Release);
    }

    #[inline]
    pub fn dsb_ish() {
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn isb() {
        compiler_fence(Ordering::SeqCst);
    }
}

const fn rmw<O: MemoryOrder>() -> Ordering {
    match O::KIND {
        OrderKind::Relaxed => Ordering::Relaxed,
        OrderKind::Acquire => Ordering::Acquire,
        OrderKind::Release => Ordering::Release,
        OrderKind::Full => Ordering::SeqCst,
    }
}

const fn failure<O: MemoryOrder>() -> Ordering {
    match O::KIND {
        OrderKind::Relaxed | OrderKind::Release => Ordering::Relaxed,
        OrderKind::Acquire => Ordering::Acquire,
        OrderKind::Full => Ordering::SeqCst,
    }
}

macro_rules! ordered_access {
    ($($ty:ty => $atomic:ident),* $(,)?) => {$(
        impl OrderedAccess for $ty {
            #[inline]
            unsafe fn load_acquire(ptr: *const Self) -> Self {
                unsafe { $atomic::from_ptr(ptr.cast_mut()) }.load(Ordering::Acquire)
            }

            #[inline]
            unsafe fn store_release(ptr: *mut Self, value: Self) {
                unsafe { $atomic::from_ptr(ptr) }.store(value, Ordering::Release);
            }

            #[inline]
            unsafe fn read_once(ptr: *const Self) -> Self {
                unsafe { $atomic::from_ptr(ptr.cast_mut()) }.load(Ordering::Relaxed)
            }

            #[inline]
            unsafe fn write_once(ptr: *mut Self, value: Self) {
                unsafe { $atomic::from_ptr(ptr) }.store(value, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn wait_while_equal(ptr: *const Self, value: Self) {
                if unsafe { Self::read_once(ptr) } == value {
                    cpu_relax();
                }
            }
        }
    )*};
}

ordered_access! {
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    i32 => AtomicI32,
    i64 => AtomicI64,
    usize => AtomicUsize,
}

macro_rules! exchange {
    ($($ty:ty => $atomic:ident),* $(,)?) => {$(
        impl Exchange for $ty {
            #[inline]
            unsafe fn xchg<O: MemoryOrder>(ptr: *mut Self, new: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.swap(new, rmw::<O>())
            }

            #[inline]
            unsafe fn cmpxchg<O: MemoryOrder>(ptr: *mut Self, old: Self, new: Self) -> Self {
                match unsafe { $atomic::from_ptr(ptr) }.compare_exchange(
                    old,
                    new,
                    rmw::<O>(),
                    failure::<O>(),
                ) {
                    Ok(v) | Err(v) => v,
                }
            }
        }
    )*};
}

exchange! {
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    i32 => AtomicI32,
    i64 => AtomicI64,
}

macro_rules! atomic_int {
    ($($ty:ty => $atomic:ident),* $(,)?) => {$(
        impl AtomicInt for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline]
            unsafe fn atomic_add(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_add(i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn atomic_sub(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_sub(i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn atomic_and(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_and(i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn atomic_or(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_or(i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn atomic_xor(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_xor(i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn atomic_andnot(ptr: *mut Self, i: Self) {
                unsafe { $atomic::from_ptr(ptr) }.fetch_and(!i, Ordering::Relaxed);
            }

            #[inline]
            unsafe fn fetch_add<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_add(i, rmw::<O>())
            }

            #[inline]
            unsafe fn fetch_sub<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_sub(i, rmw::<O>())
            }

            #[inline]
            unsafe fn fetch_and<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_and(i, rmw::<O>())
            }

            #[inline]
            unsafe fn fetch_or<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_or(i, rmw::<O>())
            }

            #[inline]
            unsafe fn fetch_xor<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_xor(i, rmw::<O>())
            }

            #[inline]
            unsafe fn fetch_andnot<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { $atomic::from_ptr(ptr) }.fetch_and(!i, rmw::<O>())
            }

            #[inline]
            unsafe fn add_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { Self::fetch_add::<O>(ptr, i) }.wrapping_add(i)
            }

            #[inline]
            unsafe fn sub_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { Self::fetch_sub::<O>(ptr, i) }.wrapping_sub(i)
            }

            #[inline]
            unsafe fn dec_if_positive(ptr: *mut Self) -> Self {
                let cell = unsafe { $atomic::from_ptr(ptr) };
                let mut cur = cell.load(Ordering::Relaxed);
                loop {
                    let dec = cur.wrapping_sub(1);
                    if cur <= 0 {
                        return dec;
                    }
                    let exchanged =
                        cell.compare_exchange_weak(cur, dec, Ordering::SeqCst, Ordering::Relaxed);
                    match exchanged {
                        Ok(_) => return dec,
                        Err(seen) => cur = seen,
                    }
                }
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$ty>::wrapping_add(self, rhs)
            }
        }
    )*};
}

atomic_int! {
    i32 => AtomicI32,
    i64 => AtomicI64,
}

static PAIR_LOCK: AtomicBool = AtomicBool::new(false);

fn with_pair_lock<R>(f: impl FnOnce() -> R) -> R {
    while PAIR_LOCK
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        while PAIR_LOCK.load(Ordering::Relaxed) {
            cpu_relax();
        }
    }
    let result = f();
    PAIR_LOCK.store(false, Ordering::Release);
    result
}

/// The pair lock orders pair accesses among themselves; `Full` also fences
/// the surrounding accesses on both sides.
///
/// # Safety
/// `ptr` must be valid and 16-byte aligned.
pub unsafe fn cmpxchg_double<O: MemoryOrder>(
    ptr: *mut [u64; 2],
    old: [u64; 2],
    new: [u64; 2],
) -> bool {
    let full = O::KIND == OrderKind::Full;
    if full {
        barrier::full_fence();
    }
    let swapped = with_pair_lock(|| {
        let cells = unsafe { AtomicU64::from_ptr(ptr.cast::<u64>()) };
        let hi = unsafe { AtomicU64::from_ptr(ptr.cast::<u64>().add(1)) };
        if cells.load(Ordering::Relaxed) == old[0] && hi.load(Ordering::Relaxed) == old[1] {
            cells.store(new[0], Ordering::Relaxed);
            hi.store(new[1], Ordering::Relaxed);
            true
        } else {
            false
        }
    });
    if full {
        barrier::full_fence();
    }
    swapped
}

/// # Safety
/// `ptr` must be valid and 16-byte aligned.
pub unsafe fn load_pair(ptr: *const [u64; 2]) -> [u64; 2] {
    with_pair_lock(|| {
        let lo = unsafe { AtomicU64::from_ptr(ptr.cast::<u64>().cast_mut()) };
        let hi = unsafe { AtomicU64::from_ptr(ptr.cast::<u64>().cast_mut().add(1)) };
        [lo.load(Ordering::Relaxed), hi.load(Ordering::Relaxed)]
    })
}
