//! Arithmetic and bitwise RMW for 32/64-bit cells.
//!
//! | order   | LL/SC            | LSE suffix |
//! |---------|------------------|------------|
//! | relaxed | `ldxr`/`stxr`    |            |
//! | acquire | `ldaxr`/`stxr`   | `a`        |
//! | release | `ldxr`/`stlxr`   | `l`        |
//! | full    | `ldxr`/`stlxr` + `dmb ish` | `al` |

#![allow(clippy::inline_always)]

use crate::atomic::AtomicInt;
use crate::order::{MemoryOrder, OrderKind};

/// Relaxed, no return value. LSE uses the `st<op>` aliases.
macro_rules! void_op {
    ($ty:ident, $w:literal, $name:ident, $llsc:literal, $lse:literal, $pre:expr, $n:literal) => {
        #[inline(always)]
        pub(super) unsafe fn $name(ptr: *mut $ty, i: $ty) {
            unsafe {
                lse_alt!(
                    llsc: [
                        "prfm pstl1strm, [{p}]",
                        concat!("1: ldxr {tmp:", $w, "}, [{p}]"),
                        concat!($llsc, " {tmp:", $w, "}, {tmp:", $w, "}, {i:", $w, "}"),
                        concat!("stxr {fail:w}, {tmp:", $w, "}, [{p}]"),
                        "cbnz {fail:w}, 1b",
                    ],
                    lse($n): [
                        $pre,
                        concat!($lse, " {i:", $w, "}, [{p}]"),
                    ],
                    p = in(reg) ptr,
                    i = inout(reg) i => _,
                    tmp = out(reg) _,
                    fail = out(reg) _,
                );
            }
        }
    };
}

/// Returns the value before the operation.
macro_rules! fetch_op {
    (
        $ty:ident, $w:literal, $name:ident, $llsc:literal, $lse:literal, $pre:expr, $n:literal,
        $ord:ident, $a:literal, $l:literal, $mb:literal, $sfx:literal
    ) => {
        paste::paste! {
            #[inline(always)]
            pub(super) unsafe fn [<fetch_ $name _ $ord>](ptr: *mut $ty, i: $ty) -> $ty {
                let old: $ty;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ld", $a, "xr {old:", $w, "}, [{p}]"),
                            concat!($llsc, " {tmp:", $w, "}, {old:", $w, "}, {i:", $w, "}"),
                            concat!("st", $l, "xr {fail:w}, {tmp:", $w, "}, [{p}]"),
                            "cbnz {fail:w}, 1b",
                            $mb,
                        ],
                        lse($n): [
                            $pre,
                            concat!($lse, $sfx, " {i:", $w, "}, {old:", $w, "}, [{p}]"),
                        ],
                        p = in(reg) ptr,
                        i = inout(reg) i => _,
                        old = out(reg) old,
                        tmp = out(reg) _,
                        fail = out(reg) _,
                    );
                }
                old
            }
        }
    };
}

/// Returns the value after the operation. LSE re-applies the operand to
/// the fetched value.
macro_rules! return_op {
    (
        $ty:ident, $w:literal, $name:ident, $llsc:literal, $pre:expr, $n:literal,
        $ord:ident, $a:literal, $l:literal, $mb:literal, $sfx:literal
    ) => {
        paste::paste! {
            #[inline(always)]
            pub(super) unsafe fn [<$name _ $ord>](ptr: *mut $ty, i: $ty) -> $ty {
                let ret: $ty;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ld", $a, "xr {ret:", $w, "}, [{p}]"),
                            concat!($llsc, " {ret:", $w, "}, {ret:", $w, "}, {i:", $w, "}"),
                            concat!("st", $l, "xr {fail:w}, {ret:", $w, "}, [{p}]"),
                            "cbnz {fail:w}, 1b",
                            $mb,
                        ],
                        lse($n): [
                            $pre,
                            concat!("ldadd", $sfx, " {i:", $w, "}, {ret:", $w, "}, [{p}]"),
                            concat!("add {ret:", $w, "}, {ret:", $w, "}, {i:", $w, "}"),
                        ],
                        p = in(reg) ptr,
                        i = inout(reg) i => _,
                        ret = out(reg) ret,
                        fail = out(reg) _,
                    );
                }
                ret
            }
        }
    };
}

macro_rules! by_order {
    ($o:ident, $m:ident::$f:ident($($arg:expr),*)) => {
        paste::paste! {
            match $o::KIND {
                OrderKind::Relaxed => $m::[<$f _relaxed>]($($arg),*),
                OrderKind::Acquire => $m::[<$f _acquire>]($($arg),*),
                OrderKind::Release => $m::[<$f _release>]($($arg),*),
                OrderKind::Full => $m::[<$f _full>]($($arg),*),
            }
        }
    };
}

macro_rules! atomic_width {
    ($m:ident, $ty:ident, $w:literal) => {
        mod $m {
            void_op!($ty, $w, add, "add", "stadd", "", 1);
            void_op!($ty, $w, sub, "sub", "stadd", concat!("neg {i:", $w, "}, {i:", $w, "}"), 2);
            void_op!($ty, $w, and, "and", "stclr", concat!("mvn {i:", $w, "}, {i:", $w, "}"), 2);
            void_op!($ty, $w, or, "orr", "stset", "", 1);
            void_op!($ty, $w, xor, "eor", "steor", "", 1);
            void_op!($ty, $w, andnot, "bic", "stclr", "", 1);

            each_order!(fetch_op!($ty, $w, add, "add", "ldadd", "", 1));
            each_order!(fetch_op!(
                $ty, $w, sub, "sub", "ldadd", concat!("neg {i:", $w, "}, {i:", $w, "}"), 2
            ));
            each_order!(fetch_op!(
                $ty, $w, and, "and", "ldclr", concat!("mvn {i:", $w, "}, {i:", $w, "}"), 2
            ));
            each_order!(fetch_op!($ty, $w, or, "orr", "ldset", "", 1));
            each_order!(fetch_op!($ty, $w, xor, "eor", "ldeor", "", 1));
            each_order!(fetch_op!($ty, $w, andnot, "bic", "ldclr", "", 1));

            each_order!(return_op!($ty, $w, add_return, "add", "", 2));
            each_order!(return_op!(
                $ty, $w, sub_return, "sub", concat!("neg {i:", $w, "}, {i:", $w, "}"), 3
            ));

            /// Fully ordered. LSE retries the `casal` until the witnessed
            /// value matches the one the decrement was computed from.
            #[inline(always)]
            pub(super) unsafe fn dec_if_positive(ptr: *mut $ty) -> $ty {
                let ret: $ty;
                unsafe {
                    lse_alt!(
                        llsc: [
                            "prfm pstl1strm, [{p}]",
                            concat!("1: ldxr {ret:", $w, "}, [{p}]"),
                            concat!("subs {ret:", $w, "}, {ret:", $w, "}, #1"),
                            "b.lt 2f",
                            concat!("stlxr {tmp:w}, {ret:", $w, "}, [{p}]"),
                            "cbnz {tmp:w}, 1b",
                            "dmb ish",
                            "2:",
                        ],
                        lse(7): [
                            concat!("1: ldr {tmp:", $w, "}, [{p}]"),
                            concat!("subs {ret:", $w, "}, {tmp:", $w, "}, #1"),
                            "b.lt 2f",
                            concat!("casal {tmp:", $w, "}, {ret:", $w, "}, [{p}]"),
                            concat!("sub {tmp:", $w, "}, {tmp:", $w, "}, #1"),
                            concat!("subs {tmp:", $w, "}, {tmp:", $w, "}, {ret:", $w, "}"),
                            "b.ne 1b",
                            "2:",
                        ],
                        p = in(reg) ptr,
                        ret = out(reg) ret,
                        tmp = out(reg) _,
                    );
                }
                ret
            }
        }

        impl AtomicInt for $ty {
            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline]
            unsafe fn atomic_add(ptr: *mut Self, i: Self) {
                unsafe { $m::add(ptr, i) }
            }

            #[inline]
            unsafe fn atomic_sub(ptr: *mut Self, i: Self) {
                unsafe { $m::sub(ptr, i) }
            }

            #[inline]
            unsafe fn atomic_and(ptr: *mut Self, i: Self) {
                unsafe { $m::and(ptr, i) }
            }

            #[inline]
            unsafe fn atomic_or(ptr: *mut Self, i: Self) {
                unsafe { $m::or(ptr, i) }
            }

            #[inline]
            unsafe fn atomic_xor(ptr: *mut Self, i: Self) {
                unsafe { $m::xor(ptr, i) }
            }

            #[inline]
            unsafe fn atomic_andnot(ptr: *mut Self, i: Self) {
                unsafe { $m::andnot(ptr, i) }
            }

            #[inline]
            unsafe fn fetch_add<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_add(ptr, i)) }
            }

            #[inline]
            unsafe fn fetch_sub<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_sub(ptr, i)) }
            }

            #[inline]
            unsafe fn fetch_and<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_and(ptr, i)) }
            }

            #[inline]
            unsafe fn fetch_or<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_or(ptr, i)) }
            }

            #[inline]
            unsafe fn fetch_xor<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_xor(ptr, i)) }
            }

            #[inline]
            unsafe fn fetch_andnot<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::fetch_andnot(ptr, i)) }
            }

            #[inline]
            unsafe fn add_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::add_return(ptr, i)) }
            }

            #[inline]
            unsafe fn sub_return<O: MemoryOrder>(ptr: *mut Self, i: Self) -> Self {
                unsafe { by_order!(O, $m::sub_return(ptr, i)) }
            }

            #[inline]
            unsafe fn dec_if_positive(ptr: *mut Self) -> Self {
                unsafe { $m::dec_if_positive(ptr) }
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$ty>::wrapping_add(self, rhs)
            }
        }
    };
}

atomic_width!(w32, i32, "w");
atomic_width!(w64, i64, "x");
