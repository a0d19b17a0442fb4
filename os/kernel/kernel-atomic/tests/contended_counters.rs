use kernel_atomic::{Atomic32, Atomic64, Relaxed};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn eight_threads_add_one_million_each() {
    let threads = 8;
    let iters = 1_000_000;

    let counter = Arc::new(Atomic32::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    counter.add(1);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.read(), 8_000_000);
}

#[test]
fn thousand_retriers_increment_through_cmpxchg() {
    let threads = 1_000;
    let iters = 1_000;

    let counter = Arc::new(Atomic64::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    let mut old = counter.read();
                    loop {
                        let seen = counter.cmpxchg::<Relaxed>(old, old + 1);
                        if seen == old {
                            break;
                        }
                        old = seen;
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.read(), 1_000_000);
}

#[test]
fn set_and_clear_with_disjoint_masks_do_not_interfere() {
    let threads = 8;
    let iters = 20_000;

    let word = Arc::new(Atomic32::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let word = Arc::clone(&word);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let mask = 0b11 << (t * 4);
                start.wait();
                for i in 0..iters {
                    word.or(mask);
                    // Other threads only ever touch their own nibble.
                    assert_eq!(word.read() & mask, mask);
                    if i % 2 == 0 {
                        word.and(!mask);
                    } else {
                        word.xor(mask);
                    }
                    assert_eq!(word.read() & mask, 0);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(word.read(), 0);
}

#[test]
fn dec_if_positive_never_goes_below_zero() {
    let tokens = 10_000;
    let threads = 8;

    let pool = Arc::new(Atomic32::new(tokens));
    let taken = Arc::new(Atomic32::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                while pool.dec_if_positive() >= 0 {
                    taken.add(1);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(pool.read(), 0);
    assert_eq!(taken.read(), tokens);
}
