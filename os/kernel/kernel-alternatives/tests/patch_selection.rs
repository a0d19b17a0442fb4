use kernel_alternatives::assemble::{AtomicSite, Image, ImageBuilder, SiteKind, SiteOp};
use kernel_alternatives::insn::{self, PcRel, Width};
use kernel_alternatives::sim::{Hart, SimData};
use kernel_alternatives::{Alternatives, IcacheSync, PatchRecord, PatchSummary};
use kernel_atomic::OrderKind;
use kernel_cpucaps::{Cpucap, CpucapSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const TEXT: u64 = 0x8000_0000;
const DATA: u64 = 0x4000_0000;

fn caps(lse: bool) -> CpucapSet {
    let caps = CpucapSet::new();
    if lse {
        caps.set(Cpucap::HAS_LSE_ATOMICS);
    }
    caps
}

/// Builds an image with the given sites and patches it for `lse`.
fn patched(sites: &[AtomicSite], lse: bool) -> (Image, Vec<u64>, PatchSummary) {
    let mut builder = ImageBuilder::new(TEXT);
    let entries = sites
        .iter()
        .map(|site| builder.add_site(site).unwrap())
        .collect();
    let mut image = builder.finish();
    let alternatives = Alternatives::new();
    let summary = {
        let (mut text, table) = image.patch_parts().unwrap();
        let set = caps(lse);
        alternatives.apply_boot(&mut text, &table, &set).unwrap()
    };
    assert_eq!(alternatives.is_applied(Cpucap::HAS_LSE_ATOMICS), lse);
    (image, entries, summary)
}

fn hammer(image: &Image, entry: u64, threads: usize, iterations: usize) -> u64 {
    let memory = [AtomicU64::new(0)];
    let data = SimData::new(DATA, &memory);
    let barrier = Barrier::new(threads);
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let mut hart = Hart::new(image.text(), image.layout().base);
                barrier.wait();
                for _ in 0..iterations {
                    hart.call(&data, entry, &[DATA, 1]).unwrap();
                }
            });
        }
    });
    memory[0].load(Ordering::SeqCst)
}

const RELAXED_ADD: AtomicSite =
    AtomicSite::new(SiteKind::Op(SiteOp::Add), OrderKind::Relaxed, Width::W32);

#[test]
fn without_lse_the_site_branches_to_the_exclusive_loop() {
    let (image, entries, summary) = patched(&[RELAXED_ADD], false);
    assert_eq!((summary.applied, summary.skipped), (0, 1));

    let first = image.insn(entries[0]).unwrap();
    assert_eq!(PcRel::classify(first), Some(PcRel::Branch26));
    let target = entries[0].wrapping_add_signed(PcRel::Branch26.offset(first).unwrap());
    assert_eq!(target, image.layout().cold());

    assert_eq!(hammer(&image, entries[0], 8, 1_000_000), 8_000_000);
}

#[test]
fn with_lse_the_site_is_a_single_stadd() {
    let (image, entries, summary) = patched(&[RELAXED_ADD], true);
    assert_eq!((summary.applied, summary.skipped), (1, 0));
    assert_eq!(image.insn(entries[0]), Some(0xB821_001F));
    assert_eq!(image.insn(entries[0] + 4), Some(insn::RET));

    assert_eq!(hammer(&image, entries[0], 8, 1_000_000), 8_000_000);
}

/// Runs each site once from the same initial memory; returns `(x3, memory)`.
fn run_each(
    image: &Image,
    entries: &[u64],
    initial: u64,
    arg: u64,
    expected: u64,
) -> Vec<(u64, u64)> {
    entries
        .iter()
        .map(|entry| {
            let memory = [AtomicU64::new(initial)];
            let data = SimData::new(DATA, &memory);
            let mut hart = Hart::new(image.text(), image.layout().base);
            hart.call(&data, *entry, &[DATA, arg, expected]).unwrap();
            (hart.reg(3), memory[0].load(Ordering::SeqCst))
        })
        .collect()
}

#[test]
fn both_forms_agree_for_every_operation() {
    let ops = [
        SiteOp::Add,
        SiteOp::Sub,
        SiteOp::And,
        SiteOp::Or,
        SiteOp::Xor,
        SiteOp::AndNot,
    ];
    let returning = [
        SiteKind::AddReturn,
        SiteKind::SubReturn,
        SiteKind::Xchg,
        SiteKind::Cmpxchg,
    ];
    let orders = [
        OrderKind::Relaxed,
        OrderKind::Acquire,
        OrderKind::Release,
        OrderKind::Full,
    ];

    let mut sites = Vec::new();
    for width in [Width::W32, Width::W64] {
        for op in ops {
            sites.push(AtomicSite::new(SiteKind::Op(op), OrderKind::Relaxed, width));
        }
        for order in orders {
            for op in ops {
                sites.push(AtomicSite::new(SiteKind::Fetch(op), order, width));
            }
            for kind in returning {
                sites.push(AtomicSite::new(kind, order, width));
            }
        }
    }

    for chunk in sites.chunks(24) {
        let (llsc, entries, _) = patched(chunk, false);
        let (lse, lse_entries, _) = patched(chunk, true);
        assert_eq!(entries, lse_entries);

        for (initial, arg, expected) in [(0b1100, 0b1010, 0b1100), (5, 9, 4), (0, 1, 0)] {
            let a = run_each(&llsc, &entries, initial, arg, expected);
            let b = run_each(&lse, &entries, initial, arg, expected);
            for ((site, a), b) in chunk.iter().zip(&a).zip(&b) {
                match site.kind {
                    SiteKind::Op(_) => assert_eq!(a.1, b.1, "{site:?}"),
                    _ => assert_eq!(a, b, "{site:?}"),
                }
            }
        }
    }
}

#[test]
fn operations_compute_the_documented_results() {
    let sites = [
        AtomicSite::new(SiteKind::Fetch(SiteOp::AndNot), OrderKind::Full, Width::W32),
        AtomicSite::new(SiteKind::SubReturn, OrderKind::Release, Width::W64),
        AtomicSite::new(SiteKind::Xchg, OrderKind::Acquire, Width::W64),
        AtomicSite::new(SiteKind::Cmpxchg, OrderKind::Full, Width::W32),
    ];
    for lse in [false, true] {
        let (image, entries, _) = patched(&sites, lse);
        let results = run_each(&image, &entries, 0b1111, 0b0101, 0b1111);
        assert_eq!(results[0], (0b1111, 0b1010));
        assert_eq!(results[1], (0b1010, 0b1010));
        assert_eq!(results[2], (0b1111, 0b0101));
        assert_eq!(results[3], (0b1111, 0b0101));

        let failed = run_each(&image, &entries[3..], 0b1111, 0b0101, 0b0111);
        assert_eq!(failed[0], (0b1111, 0b1111));
    }
}

fn load_answer(_record: &PatchRecord, _current: &[u32], out: &mut [u32]) {
    // movz x3, #42
    out[0] = 0xD280_0543;
}

#[test]
fn callback_sites_are_rewritten_without_capabilities() {
    let mut builder = ImageBuilder::new(TEXT);
    let entry = builder.add_callback(&[insn::NOP], 0xCA11).unwrap();
    let mut image = builder.finish();
    {
        let (mut text, table) = image.patch_parts().unwrap();
        text.register_callback(0xCA11, load_answer).unwrap();
        let summary = Alternatives::new()
            .apply_boot(&mut text, &table, &CpucapSet::new())
            .unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(text.icache_syncs(), 1);
        assert_eq!(
            text.last_icache_sync(),
            Some(IcacheSync::InvalidateInnerShareable)
        );
    }

    let memory = [AtomicU64::new(0)];
    let mut hart = Hart::new(image.text(), image.layout().base);
    hart.call(&SimData::new(DATA, &memory), entry, &[]).unwrap();
    assert_eq!(hart.reg(3), 42);
}

#[test]
fn secondaries_wait_for_boot_patching() {
    static ALTERNATIVES: Alternatives = Alternatives::new();
    const SECONDARIES: usize = 4;

    let ready = Arc::new(Barrier::new(SECONDARIES + 1));
    let handles: Vec<_> = (0..SECONDARIES)
        .map(|_| {
            let ready = Arc::clone(&ready);
            thread::spawn(move || {
                ready.wait();
                ALTERNATIVES.wait_for_boot_patching();
                assert!(ALTERNATIVES.is_patched());
                ALTERNATIVES.is_applied(Cpucap::HAS_LSE_ATOMICS)
            })
        })
        .collect();

    ready.wait();
    assert!(!ALTERNATIVES.is_patched());

    let mut builder = ImageBuilder::new(TEXT);
    builder.add_site(&RELAXED_ADD).unwrap();
    let mut image = builder.finish();
    let (mut text, table) = image.patch_parts().unwrap();
    let set = caps(true);
    ALTERNATIVES.apply_boot(&mut text, &table, &set).unwrap();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn malformed_records_abort_patching() {
    let mut builder = ImageBuilder::new(TEXT);
    builder
        .add_alternative(&[insn::NOP, insn::NOP], &[insn::ISB], Cpucap::HAS_CACHE_DIC)
        .unwrap();
    let mut image = builder.finish();
    let (mut text, table) = image.patch_parts().unwrap();

    let alternatives = Alternatives::new();
    assert!(alternatives
        .apply_boot(&mut text, &table, &CpucapSet::new())
        .is_err());
    assert!(!alternatives.is_patched());
}
