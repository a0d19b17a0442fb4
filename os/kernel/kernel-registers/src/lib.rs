//! # Typed `AArch64` System Registers
//!
//! Identification and cache-type registers consulted during CPU capability
//! detection. Each register is a [`bitfield_struct`] model; reading the live
//! value requires the `asm` feature and an `aarch64` target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod ctr;
pub mod id_aa64isar0;
pub mod midr;

pub use ctr::CtrEl0;
pub use id_aa64isar0::IdAa64Isar0El1;
pub use midr::MidrEl1;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require EL1.
    unsafe fn load_unsafe() -> Self;
}

pub trait LoadRegister {
    /// # Safety
    /// It is generally safe to load this register even from EL0.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

/// Reads a 64-bit system register by name.
#[cfg(all(feature = "asm", target_arch = "aarch64"))]
macro_rules! mrs {
    ($name:literal) => {{
        let value: u64;
        unsafe {
            core::arch::asm!(
                concat!("mrs {}, ", $name),
                out(reg) value,
                options(nomem, nostack, preserves_flags)
            );
        }
        value
    }};
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
pub(crate) use mrs;
