//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check thread
//! interleavings of the reclamation cores. The payload of each model lives
//! in a `loom::cell::UnsafeCell`, so a grace-period violation — the writer
//! "freeing" while a reader still reads — shows up as a detected data race
//! rather than relying on a lucky crash.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --test loom_tests --release`

#![cfg(loom)]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;
use memoffset::offset_of;
use qsbr_epoch::{EbrDomain, GcDomain, GcEntry, QsbrDomain};

/// Test: a reader inside its critical section blocks reclamation; after
/// two successful syncs past the removal the payload is provably private.
#[test]
fn loom_ebr_grace_period() {
    loom::model(|| {
        let (mut handle, domain) = EbrDomain::new();
        let reader = domain.register();

        let shared = Arc::new((AtomicBool::new(true), UnsafeCell::new(7u32)));

        let reader_shared = Arc::clone(&shared);
        let t = thread::spawn(move || {
            reader.enter();
            if reader_shared.0.load(Ordering::Acquire) {
                // Critical-path read of the protected payload.
                let value = unsafe { reader_shared.1.with(|p| *p) };
                assert_eq!(value, 7);
            }
            reader.exit();
        });

        // Remove from visibility, then wait out one full grace period:
        // the epoch that was current at removal time is reclaimable only
        // after the second successful sync.
        shared.0.store(false, Ordering::Release);

        let mut successes = 0;
        for _ in 0..4 {
            if handle.sync().is_some() {
                successes += 1;
                if successes == 2 {
                    break;
                }
            }
        }

        if successes == 2 {
            // "Free" the payload. If the grace period were not real, loom
            // would observe a race with the reader's `with`.
            unsafe { shared.1.with_mut(|p| *p = 0) };
        }

        t.join().unwrap();
    });
}

/// Test: a failed sync changes nothing — the epoch and the reported gc
/// epoch stay put while a stale reader is active.
#[test]
fn loom_ebr_failed_sync_is_stable() {
    loom::model(|| {
        let (mut handle, domain) = EbrDomain::new();
        let reader = domain.register();

        let t = thread::spawn(move || {
            reader.enter();
            reader.exit();
        });

        let before = handle.staging_epoch();
        if handle.sync().is_none() {
            assert_eq!(handle.staging_epoch(), before);
            assert_eq!(handle.gc_epoch(), (before + 1) % 3);
        }

        t.join().unwrap();
    });
}

/// Test: QSBR — after a barrier, the writer may only reclaim once every
/// reader has checkpointed past the target; reads before that checkpoint
/// are ordered before the reclamation.
#[test]
fn loom_qsbr_barrier_sync() {
    loom::model(|| {
        let domain = QsbrDomain::new();
        let writer = domain.register();

        let shared = Arc::new((AtomicBool::new(true), UnsafeCell::new(7u32)));

        let reader_domain = domain.clone();
        let reader_shared = Arc::clone(&shared);
        let t = thread::spawn(move || {
            let reader = reader_domain.register();
            if reader_shared.0.load(Ordering::Acquire) {
                let value = unsafe { reader_shared.1.with(|p| *p) };
                assert_eq!(value, 7);
            }
            reader.checkpoint();
        });

        shared.0.store(false, Ordering::Release);
        let target = domain.barrier();

        let mut observed = false;
        for _ in 0..4 {
            if writer.sync(target) {
                observed = true;
                break;
            }
            loom::thread::yield_now();
        }

        if observed {
            unsafe { shared.1.with_mut(|p| *p = 0) };
        }

        t.join().unwrap();
    });
}

/// Test: a dropped reader publishes the offline sentinel and can never
/// stall a later barrier.
#[test]
fn loom_qsbr_dropped_reader() {
    loom::model(|| {
        let domain = QsbrDomain::new();
        let writer = domain.register();

        let reader_domain = domain.clone();
        let t = thread::spawn(move || {
            let reader = reader_domain.register();
            reader.checkpoint();
            // Reader departs; its record must stop mattering.
        });
        t.join().unwrap();

        let target = domain.barrier();
        assert!(writer.sync(target));
    });
}

/// Test: concurrent registration — two readers CAS-prepend into the
/// registry at the same time and both records survive.
#[test]
fn loom_concurrent_registration() {
    loom::model(|| {
        let (mut handle, domain) = EbrDomain::new();

        let d1 = domain.clone();
        let t1 = thread::spawn(move || {
            let reader = d1.register();
            reader.enter();
            reader.exit();
        });
        let d2 = domain.clone();
        let t2 = thread::spawn(move || {
            let reader = d2.register();
            reader.enter();
            reader.exit();
        });

        t1.join().unwrap();
        t2.join().unwrap();

        // Both records are inactive now, so the scan passes over both.
        assert!(handle.sync().is_some());
    });
}

/// Test: multi-producer limbo — two producers publish concurrently, the
/// drainer reclaims each object exactly once.
#[test]
fn loom_limbo_multi_producer() {
    #[repr(C)]
    struct Obj {
        entry: GcEntry,
    }

    loom::model(|| {
        let reclaimed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reclaimed);

        let (mut gc, domain) = GcDomain::builder()
            .entry_offset(offset_of!(Obj, entry))
            .reclaim(move |mut entry| {
                while !entry.is_null() {
                    unsafe {
                        let next = (*entry).next();
                        drop(Box::from_raw(
                            (entry as *mut u8).sub(offset_of!(Obj, entry)) as *mut Obj,
                        ));
                        entry = next;
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        let d1 = domain.clone();
        let t1 = thread::spawn(move || {
            let obj = Box::into_raw(Box::new(Obj {
                entry: GcEntry::new(),
            }));
            unsafe { d1.limbo(obj as *mut ()) };
        });
        let d2 = domain.clone();
        let t2 = thread::spawn(move || {
            let obj = Box::into_raw(Box::new(Obj {
                entry: GcEntry::new(),
            }));
            unsafe { d2.limbo(obj as *mut ()) };
        });

        t1.join().unwrap();
        t2.join().unwrap();

        // No readers: a single cycle traverses the epochs and drains.
        gc.cycle();
        assert_eq!(reclaimed.load(Ordering::Relaxed), 2);
    });
}

/// Test: the facade end to end — an active reader delays the reclaim
/// callback, and the callback runs strictly after the reader's exit.
#[test]
fn loom_gc_grace_period() {
    struct Obj {
        payload: UnsafeCell<u32>,
        entry: GcEntry,
    }

    loom::model(|| {
        let (mut gc, domain) = GcDomain::builder()
            .entry_offset(offset_of!(Obj, entry))
            .reclaim(|mut entry| {
                while !entry.is_null() {
                    unsafe {
                        let next = (*entry).next();
                        let obj = (entry as *mut u8).sub(offset_of!(Obj, entry)) as *mut Obj;
                        // "Free": poison the payload, then drop the box.
                        // A reader still inside its critical section would
                        // make this a detected race.
                        (*obj).payload.with_mut(|p| *p = 0);
                        drop(Box::from_raw(obj));
                        entry = next;
                    }
                }
            })
            .build();

        let obj = Box::into_raw(Box::new(Obj {
            payload: UnsafeCell::new(7),
            entry: GcEntry::new(),
        }));

        let visible = Arc::new(AtomicBool::new(true));

        let reader_domain = domain.clone();
        let reader_visible = Arc::clone(&visible);
        let obj_addr = obj as usize;
        let t = thread::spawn(move || {
            let reader = reader_domain.register();
            reader.crit_enter();
            if reader_visible.load(Ordering::Acquire) {
                let obj = obj_addr as *const Obj;
                let value = unsafe { (*obj).payload.with(|p| *p) };
                assert_eq!(value, 7);
            }
            reader.crit_exit();
        });

        // Unpublish and hand over; cycle a bounded number of times while
        // the reader may still be inside its critical section.
        visible.store(false, Ordering::Release);
        unsafe { domain.limbo(obj as *mut ()) };
        for _ in 0..2 {
            gc.cycle();
        }

        t.join().unwrap();

        // Reader gone: the drain is now deterministic.
        gc.full(0);
    });
}
