//! Gives every test thread its own CPU id so that concurrent waiters use
//! distinct queue nodes.

#![allow(dead_code)]

use kernel_sync::{ContextLevel, ExecContext, NR_CPUS, install_context_source};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

static SLOTS: [AtomicBool; NR_CPUS] = [const { AtomicBool::new(false) }; NR_CPUS];

struct Slot(u32);

impl Drop for Slot {
    fn drop(&mut self) {
        SLOTS[self.0 as usize].store(false, Ordering::Release);
    }
}

fn allocate() -> Slot {
    loop {
        // CPU 0 stays with threads that never bind.
        for (cpu, slot) in SLOTS.iter().enumerate().skip(1) {
            if slot
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Slot(u32::try_from(cpu).unwrap());
            }
        }
        thread::yield_now();
    }
}

thread_local! {
    static SLOT: Slot = allocate();
    static OVERRIDE: Cell<Option<ExecContext>> = const { Cell::new(None) };
}

fn thread_context() -> ExecContext {
    OVERRIDE.with(Cell::get).unwrap_or_else(|| {
        let cpu = SLOT.with(|slot| slot.0);
        ExecContext::new(cpu, ContextLevel::Task)
    })
}

pub fn install() {
    install_context_source(thread_context);
}

/// Binds the calling thread to a free CPU id and returns it.
pub fn bind() -> u32 {
    install();
    SLOT.with(|slot| slot.0)
}

/// Makes the calling thread report `ctx`, e.g. to stand in for an
/// interrupt handler running on another thread's CPU.
pub fn impersonate(ctx: ExecContext) {
    install();
    OVERRIDE.with(|o| o.set(Some(ctx)));
}
