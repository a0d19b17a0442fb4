//! Execution context of the caller: which CPU, and at which nesting level.
//!
//! The kernel installs a source that reads the per-CPU id and the current
//! interrupt nesting; until then every caller is the boot CPU in task context.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Interrupt nesting level; selects one of the per-CPU queue nodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ContextLevel {
    Task = 0,
    SoftIrq = 1,
    HardIrq = 2,
    Nmi = 3,
}

impl ContextLevel {
    pub const COUNT: usize = 4;

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => Self::Task,
            1 => Self::SoftIrq,
            2 => Self::HardIrq,
            _ => Self::Nmi,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExecContext {
    pub cpu: u32,
    pub level: ContextLevel,
}

impl ExecContext {
    pub const BOOT: Self = Self::new(0, ContextLevel::Task);

    #[must_use]
    pub const fn new(cpu: u32, level: ContextLevel) -> Self {
        Self { cpu, level }
    }
}

pub type ContextSource = fn() -> ExecContext;

static SOURCE: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Replaces the function used to determine the caller's context.
///
/// The source must return a CPU id below [`NR_CPUS`](crate::NR_CPUS) that
/// no other concurrently running caller reports for the same level.
pub fn install_context_source(source: ContextSource) {
    SOURCE.store(source as *mut (), Ordering::Release);
}

#[must_use]
pub fn current_context() -> ExecContext {
    let source = SOURCE.load(Ordering::Acquire);
    if source.is_null() {
        return ExecContext::BOOT;
    }
    // SAFETY: only `install_context_source` stores into SOURCE.
    let source = unsafe { core::mem::transmute::<*mut (), ContextSource>(source) };
    source()
}
