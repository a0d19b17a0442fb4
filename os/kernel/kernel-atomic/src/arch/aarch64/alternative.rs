//! Call-site frame shared by every RMW operation.
//!
//! With `lse`, the inline path is `b 3f` padded with `nop`s to the length
//! of the LSE sequence. The LL/SC loop lives at `3:` in `.subsection 1`
//! and branches back to `4:`. The LSE sequence sits in
//! `.altinstr_replacement`, and a 12-byte record in `.altinstructions`
//! lets the patching engine copy it over the inline path once
//! `HAS_LSE_ATOMICS` is detected. The `.org` pair fails assembly unless
//! both regions have the same length.
//!
//! Without `lse` only the LL/SC loop is emitted, inline.
//!
//! Local labels `1:` and `2:` are free for the sequences themselves.

#[cfg(feature = "lse")]
macro_rules! lse_alt {
    (
        llsc: [$($llsc:expr),* $(,)?],
        lse($n:literal): [$($lse:expr),* $(,)?],
        $($operands:tt)*
    ) => {
        core::arch::asm!(
            ".arch_extension lse",
            "661:",
            "b 3f",
            concat!(".rept ", $n, " - 1"),
            "nop",
            ".endr",
            "662:",
            ".pushsection .altinstructions, \"a\"",
            ".word 661b - .",
            ".word 663f - .",
            ".hword {cap}",
            ".byte 662b - 661b",
            ".byte 664f - 663f",
            ".popsection",
            ".pushsection .altinstr_replacement, \"ax\"",
            "663:",
            $($lse,)*
            "664:",
            ".popsection",
            ".org . - (664b - 663b) + (662b - 661b)",
            ".org . - (662b - 661b) + (664b - 663b)",
            ".subsection 1",
            "3:",
            $($llsc,)*
            "b 4f",
            ".previous",
            "4:",
            cap = const $crate::arch::LSE_CAP,
            $($operands)*
            options(nostack),
        )
    };
}

#[cfg(not(feature = "lse"))]
macro_rules! lse_alt {
    (
        llsc: [$($llsc:expr),* $(,)?],
        lse($n:literal): [$($lse:expr),* $(,)?],
        $($operands:tt)*
    ) => {
        core::arch::asm!(
            $($llsc,)*
            $($operands)*
            options(nostack),
        )
    };
}

/// Expands `$op!` once per ordering with that ordering's mnemonics:
/// load-exclusive infix, store-exclusive infix, trailing barrier, LSE suffix.
macro_rules! each_order {
    ($op:ident!($($args:tt)*)) => {
        $op!($($args)*, relaxed, "", "", "", "");
        $op!($($args)*, acquire, "a", "", "", "a");
        $op!($($args)*, release, "", "l", "", "l");
        $op!($($args)*, full, "", "l", "dmb ish", "al");
    };
}
