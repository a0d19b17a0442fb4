//! Exchange, compare-exchange and the paired `casp` form.

#![allow(
    clippy::inline_always,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

use crate::atomic::Exchange;
use crate::order::{MemoryOrder, OrderKind};

/// `$wide` is the register-sized carrier; sub-word operands are
/// zero-extended into it so the `eor` comparison sees clean upper bits.
macro_rules! exchange_ops {
    (
        $ty:ident, $wide:ty, $sz:literal, $w:literal,
        $ord:ident, $a:literal, $l:literal, $mb:literal, $sfx:literal
    ) => {
        paste::paste! {
            #[inline(always)]
            unsafe fn [<xchg_ $ty _ $ord>](ptr: *mut $ty, new: $ty) -> $ty {
                let old: $wide;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ld", $a, "xr", $sz, " {old:", $w, "}, [{p}]"),
                            concat!("st", $l, "xr", $sz, " {fail:w}, {new:", $w, "}, [{p}]"),
                            "cbnz {fail:w}, 1b",
                            $mb,
                        ],
                        lse(1): [
                            concat!("swp", $sfx, $sz, " {new:", $w, "}, {old:", $w, "}, [{p}]"),
                        ],
                        p = in(reg) ptr,
                        new = in(reg) new as $wide,
                        old = out(reg) old,
                        fail = out(reg) _,
                    );
                }
                old as $ty
            }

            #[inline(always)]
            unsafe fn [<cmpxchg_ $ty _ $ord>](ptr: *mut $ty, exp: $ty, new: $ty) -> $ty {
                let old: $wide;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ld", $a, "xr", $sz, " {old:", $w, "}, [{p}]"),
                            concat!("eor {tmp:", $w, "}, {old:", $w, "}, {exp:", $w, "}"),
                            concat!("cbnz {tmp:", $w, "}, 2f"),
                            concat!("st", $l, "xr", $sz, " {tmp:w}, {new:", $w, "}, [{p}]"),
                            "cbnz {tmp:w}, 1b",
                            $mb,
                            "2:",
                        ],
                        lse(3): [
                            concat!("mov {tmp:", $w, "}, {exp:", $w, "}"),
                            concat!("cas", $sfx, $sz, " {tmp:", $w, "}, {new:", $w, "}, [{p}]"),
                            concat!("mov {old:", $w, "}, {tmp:", $w, "}"),
                        ],
                        p = in(reg) ptr,
                        exp = in(reg) exp as $wide,
                        new = in(reg) new as $wide,
                        old = out(reg) old,
                        tmp = out(reg) _,
                    );
                }
                old as $ty
            }
        }
    };
}

macro_rules! exchange {
    ($($ty:ident => $wide:ty, $sz:literal, $w:literal;)*) => {$(
        each_order!(exchange_ops!($ty, $wide, $sz, $w));

        impl Exchange for $ty {
            #[inline]
            unsafe fn xchg<O: MemoryOrder>(ptr: *mut Self, new: Self) -> Self {
                paste::paste! {
                    unsafe {
                        match O::KIND {
                            OrderKind::Relaxed => [<xchg_ $ty _relaxed>](ptr, new),
                            OrderKind::Acquire => [<xchg_ $ty _acquire>](ptr, new),
                            OrderKind::Release => [<xchg_ $ty _release>](ptr, new),
                            OrderKind::Full => [<xchg_ $ty _full>](ptr, new),
                        }
                    }
                }
            }

            #[inline]
            unsafe fn cmpxchg<O: MemoryOrder>(ptr: *mut Self, old: Self, new: Self) -> Self {
                paste::paste! {
                    unsafe {
                        match O::KIND {
                            OrderKind::Relaxed => [<cmpxchg_ $ty _relaxed>](ptr, old, new),
                            OrderKind::Acquire => [<cmpxchg_ $ty _acquire>](ptr, old, new),
                            OrderKind::Release => [<cmpxchg_ $ty _release>](ptr, old, new),
                            OrderKind::Full => [<cmpxchg_ $ty _full>](ptr, old, new),
                        }
                    }
                }
            }
        }
    )*};
}

exchange! {
    u8 => u32, "b", "w";
    u16 => u32, "h", "w";
    u32 => u32, "", "w";
    i32 => u32, "", "w";
    u64 => u64, "", "x";
    i64 => u64, "", "x";
}

/// Compares `(x0, x1)` against the pair and stores `(x2, x3)` on match.
/// `casp` needs consecutive even/odd register pairs; both forms leave zero
/// in `x0` on success.
macro_rules! casp {
    (, $ord:ident, $a:literal, $l:literal, $mb:literal, $sfx:literal) => {
        paste::paste! {
            #[inline(always)]
            unsafe fn [<casp_ $ord>](ptr: *mut [u64; 2], old: [u64; 2], new: [u64; 2]) -> bool {
                let ret: u64;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ld", $a, "xp {t0}, {t1}, [{p}]"),
                            "eor {t0}, {t0}, {o1}",
                            "eor {t1}, {t1}, {o2}",
                            "orr x0, {t0}, {t1}",
                            "cbnz x0, 2f",
                            concat!("st", $l, "xp {t0:w}, x2, x3, [{p}]"),
                            "cbnz {t0:w}, 1b",
                            $mb,
                            "2:",
                        ],
                        lse(4): [
                            concat!("casp", $sfx, " x0, x1, x2, x3, [{p}]"),
                            "eor x0, x0, {o1}",
                            "eor x1, x1, {o2}",
                            "orr x0, x0, x1",
                        ],
                        p = in(reg) ptr,
                        o1 = in(reg) old[0],
                        o2 = in(reg) old[1],
                        t0 = out(reg) _,
                        t1 = out(reg) _,
                        inout("x0") old[0] => ret,
                        inout("x1") old[1] => _,
                        in("x2") new[0],
                        in("x3") new[1],
                    );
                }
                ret == 0
            }
        }
    };
}

each_order!(casp!());

/// # Safety
/// `ptr` must be valid and 16-byte aligned.
#[inline]
pub unsafe fn cmpxchg_double<O: MemoryOrder>(
    ptr: *mut [u64; 2],
    old: [u64; 2],
    new: [u64; 2],
) -> bool {
    unsafe {
        match O::KIND {
            OrderKind::Relaxed => casp_relaxed(ptr, old, new),
            OrderKind::Acquire => casp_acquire(ptr, old, new),
            OrderKind::Release => casp_release(ptr, old, new),
            OrderKind::Full => casp_full(ptr, old, new),
        }
    }
}

/// Single-copy-atomic read of both words: `ldaxp` only guarantees that
/// once the matching `stxp` of the same values succeeds.
///
/// # Safety
/// `ptr` must be valid and 16-byte aligned.
#[inline]
pub unsafe fn load_pair(ptr: *const [u64; 2]) -> [u64; 2] {
    let lo: u64;
    let hi: u64;
    unsafe {
        core::arch::asm!(
            "1: ldaxp {lo}, {hi}, [{p}]",
            "stxp {s:w}, {lo}, {hi}, [{p}]",
            "cbnz {s:w}, 1b",
            p = in(reg) ptr,
            lo = out(reg) lo,
            hi = out(reg) hi,
            s = out(reg) _,
            options(nostack),
        );
    }
    [lo, hi]
}
