//! # QEMU Debug Console
//!
//! Early console output for kernels running under QEMU. On `aarch64` bytes go
//! to the PL011 UART of the `virt` machine (`-serial stdio`); on `x86_64` to
//! the debug port `0x402` (`-debugcon stdio`).
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger initialization");
//! info!("alternatives applied");
//! ```
//!
//! Without the `enabled` feature every write is a no-op.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, format_record};

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    mod uart {
        /// PL011 data register on the `virt` machine.
        const PL011_BASE: usize = 0x0900_0000;
        const UARTFR: usize = 0x18;
        const UARTFR_TXFF: u32 = 1 << 5;

        #[inline]
        pub fn putc(c: u8) {
            let dr = PL011_BASE as *mut u32;
            let fr = (PL011_BASE + UARTFR) as *const u32;
            // SAFETY: the UART is identity mapped during early boot.
            unsafe {
                while core::ptr::read_volatile(fr) & UARTFR_TXFF != 0 {
                    core::hint::spin_loop();
                }
                core::ptr::write_volatile(dr, u32::from(c));
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    mod uart {
        /// The port number for QEMU's debug port.
        const QEMU_DEBUG_PORT: u16 = 0x402;

        #[inline]
        pub fn putc(c: u8) {
            unsafe {
                core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
                );
            }
        }
    }

    #[cfg(not(any(all(target_arch = "aarch64", target_os = "none"), target_arch = "x86_64")))]
    mod uart {
        #[inline]
        pub fn putc(_: u8) {}
    }

    /// Write a single byte to the console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        uart::putc(c);
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; there is nowhere to report a console error.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Writes `format!`-style output straight to the console, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
