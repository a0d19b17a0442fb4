mod common;

use kernel_sync::{
    ContextLevel, ExecContext, LockWord, NR_CPUS, QSpinLock, SpinLock, handoff_count,
    smp_mb_after_spinlock,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;

fn wait_until(mut done: impl FnMut() -> bool) {
    while !done() {
        thread::yield_now();
    }
}

fn total_handoffs() -> u64 {
    let mut total = 0;
    for cpu in 0..u32::try_from(NR_CPUS).unwrap() {
        for level in [
            ContextLevel::Task,
            ContextLevel::SoftIrq,
            ContextLevel::HardIrq,
            ContextLevel::Nmi,
        ] {
            total += handoff_count(ExecContext::new(cpu, level));
        }
    }
    total
}

#[test]
fn sixteen_threads_count_to_one_point_six_million() {
    const THREADS: usize = 16;
    const ITERATIONS: u64 = 100_000;
    common::install();

    let counter = Arc::new(SpinLock::new(0_u64));
    let start = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                common::bind();
                start.wait();
                for _ in 0..ITERATIONS {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*counter.lock(), 1_600_000);
    assert!(!counter.raw().is_locked());
}

#[test]
fn waiters_acquire_in_arrival_order() {
    const WAITERS: usize = 64;
    common::install();

    let lock = Arc::new(QSpinLock::new());
    let order = Arc::new(Mutex::new(Vec::with_capacity(WAITERS)));
    let handoffs_before = total_handoffs();

    lock.lock();
    let mut handles = Vec::with_capacity(WAITERS);
    let mut last_tail = None;
    for id in 0..WAITERS {
        let lock_ = Arc::clone(&lock);
        let order_ = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            common::bind();
            lock_.lock();
            order_.lock().unwrap().push(id);
            unsafe { lock_.unlock() };
        }));

        // Only spawn the next waiter once this one is visibly in line.
        if id == 0 {
            wait_until(|| lock.snapshot().pending());
        } else {
            wait_until(|| {
                let tail = lock.snapshot().tail();
                tail.is_some() && tail != last_tail
            });
            last_tail = lock.snapshot().tail();
        }
    }

    let word = lock.snapshot();
    assert_eq!(word.locked(), 1);
    assert!(word.pending());
    assert!(lock.is_contended());

    unsafe { lock.unlock() };
    for handle in handles {
        handle.join().unwrap();
    }

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..WAITERS).collect::<Vec<_>>());
    assert!(!lock.is_locked());
    assert_eq!(lock.snapshot(), LockWord::new());

    // Every queued waiter but the last handed the lock to its successor.
    assert!(total_handoffs() - handoffs_before >= (WAITERS - 2) as u64);
}

#[test]
fn many_threads_never_overlap_in_the_critical_section() {
    const THREADS: usize = 64;
    const ITERATIONS: usize = 2_000;
    common::install();

    let lock = Arc::new(QSpinLock::new());
    let in_cs = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let entries = Arc::clone(&entries);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                common::bind();
                start.wait();
                for _ in 0..ITERATIONS {
                    lock.lock();
                    smp_mb_after_spinlock();
                    assert_eq!(in_cs.fetch_add(1, Ordering::Relaxed), 0);
                    entries.fetch_add(1, Ordering::Relaxed);
                    in_cs.fetch_sub(1, Ordering::Relaxed);
                    unsafe { lock.unlock() };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::Relaxed), THREADS * ITERATIONS);
    assert_eq!(lock.snapshot(), LockWord::new());
}

#[test]
fn first_waiter_takes_the_pending_slot() {
    common::install();
    let lock = Arc::new(QSpinLock::new());
    lock.lock();

    let waiter = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            common::bind();
            lock.lock();
            let word = lock.snapshot();
            unsafe { lock.unlock() };
            word
        })
    };

    wait_until(|| lock.snapshot().pending());
    let word = lock.snapshot();
    assert_eq!(word.locked(), 1);
    assert_eq!(word.tail(), None);
    assert!(!lock.try_lock());

    unsafe { lock.unlock() };
    let held = waiter.join().unwrap();
    assert_eq!(held, LockWord::new().with_locked(1));
    assert!(!lock.is_locked());
}

/// Spawns a thread that takes and releases `lock` once.
///
/// With `ctx` the thread reports that context; otherwise it binds a CPU of
/// its own and sends the id to `cpu_tx`.
fn spawn_locker(
    lock: &Arc<QSpinLock>,
    ctx: Option<ExecContext>,
    cpu_tx: Option<mpsc::Sender<u32>>,
) -> thread::JoinHandle<()> {
    let lock = Arc::clone(lock);
    thread::spawn(move || {
        if let Some(ctx) = ctx {
            common::impersonate(ctx);
        } else {
            let cpu = common::bind();
            if let Some(tx) = cpu_tx {
                tx.send(cpu).unwrap();
            }
        }
        lock.lock();
        unsafe { lock.unlock() };
    })
}

#[test]
fn nested_contexts_queue_on_separate_nodes() {
    common::install();
    let a = Arc::new(QSpinLock::new());
    let b = Arc::new(QSpinLock::new());
    a.lock();
    b.lock();

    // Fill both pending slots so the next waiters have to queue.
    let mut handles = vec![spawn_locker(&a, None, None)];
    wait_until(|| a.snapshot().pending());
    handles.push(spawn_locker(&b, None, None));
    wait_until(|| b.snapshot().pending());

    let (tx, rx) = mpsc::channel();
    handles.push(spawn_locker(&a, None, Some(tx)));
    let cpu = rx.recv().unwrap();
    wait_until(|| a.snapshot().is_queued());

    // An interrupt on the same CPU takes the other lock.
    let irq = ExecContext::new(cpu, ContextLevel::HardIrq);
    handles.push(spawn_locker(&b, Some(irq), None));
    wait_until(|| b.snapshot().is_queued());

    assert_eq!(a.snapshot().tail(), Some((cpu, ContextLevel::Task)));
    assert_eq!(b.snapshot().tail(), Some((cpu, ContextLevel::HardIrq)));

    unsafe {
        a.unlock();
        b.unlock();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!a.is_locked());
    assert!(!b.is_locked());
}
