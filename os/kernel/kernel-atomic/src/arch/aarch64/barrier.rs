#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

use crate::barrier::OrderedAccess;
use core::arch::asm;
use core::sync::atomic::{
    AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

macro_rules! fence {
    ($($(#[$doc:meta])* $name:ident => $insn:literal;)*) => {$(
        $(#[$doc])*
        #[inline(always)]
        #[allow(clippy::inline_always)]
        pub fn $name() {
            unsafe { asm!($insn, options(nostack, preserves_flags)) }
        }
    )*};
}

fence! {
    /// `dsb sy`: every access before completes before any after, system-wide.
    full_fence => "dsb sy";
    load_fence => "dsb ld";
    store_fence => "dsb st";
    /// `dmb ish`: orders accesses as seen by coherent cores.
    smp_full_fence => "dmb ish";
    smp_load_fence => "dmb ishld";
    smp_store_fence => "dmb ishst";
    dsb_ish => "dsb ish";
    isb => "isb";
}

macro_rules! ordered_access {
    ($($ty:ty => $atomic:ident, $sz:literal, $w:literal, $wide:ty;)*) => {$(
        impl OrderedAccess for $ty {
            #[inline]
            unsafe fn load_acquire(ptr: *const Self) -> Self {
                let value: Self;
                unsafe {
                    asm!(
                        concat!("ldar", $sz, " {v:", $w, "}, [{p}]"),
                        p = in(reg) ptr,
                        v = out(reg) value,
                        options(nostack, preserves_flags),
                    );
                }
                value
            }

            #[inline]
            unsafe fn store_release(ptr: *mut Self, value: Self) {
                unsafe {
                    asm!(
                        concat!("stlr", $sz, " {v:", $w, "}, [{p}]"),
                        p = in(reg) ptr,
                        v = in(reg) value,
                        options(nostack, preserves_flags),
                    );
                }
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
                unsafe {
                    asm!(
                        "sevl",
                        "wfe",
                        concat!("ldxr", $sz, " {tmp:", $w, "}, [{p}]"),
                        concat!("eor {tmp:", $w, "}, {tmp:", $w, "}, {val:", $w, "}"),
                        concat!("cbnz {tmp:", $w, "}, 1f"),
                        "wfe",
                        "1:",
                        p = in(reg) ptr,
                        val = in(reg) value as $wide,
                        tmp = out(reg) _,
                        options(nostack, preserves_flags),
                    );
                }
            }
        }
    )*};
}

ordered_access! {
    u8 => AtomicU8, "b", "w", u32;
    u16 => AtomicU16, "h", "w", u32;
    u32 => AtomicU32, "", "w", u32;
    i32 => AtomicI32, "", "w", u32;
    u64 => AtomicU64, "", "x", u64;
    i64 => AtomicI64, "", "x", u64;
    usize => AtomicUsize, "", "x", u64;
}
