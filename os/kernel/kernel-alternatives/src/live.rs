//! Patching of the running kernel image.

use crate::{
    AltCallback, IcacheSync, PatchError, PatchSummary, PatchTable, PatchTarget,
    SYSTEM_ALTERNATIVES,
};
use core::arch::asm;
use kernel_cpucaps::SYSTEM_CPUCAPS;
use kernel_registers::{CtrEl0, LoadRegisterUnsafe};

unsafe extern "C" {
    static __alt_instructions: u8;
    static __alt_instructions_end: u8;
    static __altinstr_replacement: u8;
    static __altinstr_replacement_end: u8;
}

/// Kernel text, written in place through its own mapping.
///
/// Text must be writable while patching; the boot path runs this before
/// the final text permissions are applied.
pub struct LiveText {
    dcache_line: u64,
}

impl LiveText {
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: CTR_EL0 is readable at EL1.
        let ctr = unsafe { CtrEl0::load_unsafe() };
        Self {
            dcache_line: ctr.dcache_line_size() as u64,
        }
    }
}

impl Default for LiveText {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchTarget for LiveText {
    fn read_insn(&self, addr: u64) -> Result<u32, PatchError> {
        if addr % 4 != 0 {
            return Err(PatchError::OutOfBounds { addr });
        }
        // SAFETY: addresses come from the linked patch table.
        Ok(unsafe { core::ptr::read_volatile(addr as *const u32) })
    }

    fn write_insn(&mut self, addr: u64, insn: u32) -> Result<(), PatchError> {
        if addr % 4 != 0 {
            return Err(PatchError::OutOfBounds { addr });
        }
        // SAFETY: see `read_insn`; no other core executes this text yet.
        unsafe { core::ptr::write_volatile(addr as *mut u32, insn) };
        Ok(())
    }

    fn clean_dcache_range(&mut self, start: u64, end: u64) {
        let mut line = start & !(self.dcache_line - 1);
        while line < end {
            unsafe { asm!("dc civac, {}", in(reg) line, options(nostack, preserves_flags)) };
            line += self.dcache_line;
        }
        unsafe { asm!("dsb ish", options(nostack, preserves_flags)) };
    }

    fn sync_icache(&mut self, how: IcacheSync) {
        match how {
            IcacheSync::Barrier => unsafe {
                asm!("dsb ish", "isb", options(nostack, preserves_flags));
            },
            IcacheSync::InvalidateInnerShareable => unsafe {
                asm!(
                    "dsb ish",
                    "ic ialluis",
                    "dsb ish",
                    "isb",
                    options(nostack, preserves_flags)
                );
            },
        }
    }

    fn resolve_callback(&self, addr: u64) -> Option<AltCallback> {
        if addr == 0 {
            return None;
        }
        // SAFETY: callback records point at functions with the callback signature.
        let addr = addr as usize;
        Some(unsafe { core::mem::transmute::<usize, AltCallback>(addr) })
    }
}

/// Applies the kernel's own patch table on the boot core.
///
/// # Panics
/// On any malformed record; the kernel cannot run half-patched.
pub fn apply_system_alternatives() -> PatchSummary {
    let (start, end, repl_start, repl_end) = unsafe {
        (
            (&raw const __alt_instructions) as u64,
            (&raw const __alt_instructions_end) as u64,
            (&raw const __altinstr_replacement) as u64,
            (&raw const __altinstr_replacement_end) as u64,
        )
    };

    // SAFETY: the linker script places the records between the two symbols.
    let bytes = unsafe { core::slice::from_raw_parts(start as *const u8, (end - start) as usize) };

    let result = PatchTable::new(bytes, start)
        .map(|table| table.with_replacement_section(repl_start..repl_end))
        .and_then(|table| {
            SYSTEM_ALTERNATIVES.apply_boot(&mut LiveText::new(), &table, &SYSTEM_CPUCAPS)
        });

    match result {
        Ok(summary) => summary,
        Err(err) => panic!("alternatives: {err}"),
    }
}
