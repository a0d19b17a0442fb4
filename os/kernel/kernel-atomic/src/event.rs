//! Event-register wait/wake.
//!
//! The event register is sticky: a send that lands before the matching wait
//! still wakes it. A store that clears another core's exclusive reservation
//! also raises its event, which is what lets lock spinners sleep in `wfe`
//! without explicit wakes.

/// Suspends the core until its event register is set.
#[inline]
pub fn wait_for_event() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("wfe", options(nostack, preserves_flags));
    }

    #[cfg(not(target_arch = "aarch64"))]
    cpu_relax();
}

/// Sets the local core's event register.
#[inline]
pub fn send_event_local() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("sevl", options(nomem, nostack, preserves_flags));
    }
}

/// Sets the event register of every core in the inner-shareable domain.
#[inline]
pub fn send_event_broadcast() {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("sev", options(nomem, nostack, preserves_flags));
    }
}

/// Busy-wait hint for spin loops that do not wait on a specific location.
#[inline]
pub fn cpu_relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();

    #[cfg(all(not(any(test, feature = "std")), target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("yield", options(nomem, nostack, preserves_flags));
    }

    #[cfg(all(not(any(test, feature = "std")), not(target_arch = "aarch64")))]
    core::hint::spin_loop();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pending_local_event_satisfies_wait() {
        send_event_local();
        wait_for_event();
    }

    #[test]
    fn broadcast_and_relax_return() {
        send_event_broadcast();
        cpu_relax();
    }
}
