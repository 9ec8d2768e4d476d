//! Mutex, condition variable and barrier behavior across real threads.

use lockstep_runtime::{
    DetBarrier, DetCondvar, DetMutex, RawDetCondvar, RawDetMutex, Runtime, SyncError, ThreadId,
};
use lockstep_test_helpers::{
    assert_all_identical, passthrough_runtime, repeat_runs, test_runtime, TraceRecorder,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_mutex_is_exclusive() {
    let rt = test_runtime();
    let inside = Arc::new(AtomicBool::new(false));
    let m = Arc::new(RawDetMutex::new(&rt));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let rt2 = rt.clone();
            let inside = Arc::clone(&inside);
            let m = Arc::clone(&m);
            rt.spawn(move || {
                for _ in 0..100 {
                    rt2.tick(3);
                    m.lock().unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two owners");
                    std::hint::spin_loop();
                    inside.store(false, Ordering::SeqCst);
                    m.unlock().unwrap();
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn test_lock_completions_are_totally_ordered_by_clock() {
    let rt = test_runtime();
    let m = Arc::new(DetMutex::new(&rt, Vec::new()));

    let workers: Vec<_> = (0..3)
        .map(|w| {
            let rt2 = rt.clone();
            let m = Arc::clone(&m);
            rt.spawn(move || {
                for i in 0..20 {
                    rt2.tick((w * 5 + i) as u64 % 7 + 1);
                    let mut log = m.lock().unwrap();
                    log.push(rt2.clock());
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let log = Arc::try_unwrap(m).unwrap().into_inner();
    assert_eq!(log.len(), 60);
    assert!(
        log.windows(2).all(|p| p[0] < p[1]),
        "acquisition clocks not increasing: {log:?}"
    );
}

#[test]
fn test_try_lock_reports_busy_while_held() {
    let rt = test_runtime();
    let m = Arc::new(DetMutex::new(&rt, 0));
    let guard = m.lock().unwrap();

    let worker = {
        let m = Arc::clone(&m);
        rt.spawn(move || m.try_lock().err()).unwrap()
    };
    assert_eq!(worker.join(), Ok(Some(SyncError::Busy)));
    drop(guard);

    let worker = {
        let m = Arc::clone(&m);
        rt.spawn(move || {
            let mut g = m.try_lock().unwrap();
            *g += 1;
        })
        .unwrap()
    };
    worker.join().unwrap();
    assert_eq!(*m.lock().unwrap(), 1);
}

#[test]
fn test_call_order_errors() {
    let rt = test_runtime();
    let m = Arc::new(RawDetMutex::new(&rt));
    m.lock().unwrap();

    let worker = {
        let m = Arc::clone(&m);
        rt.spawn(move || m.unlock()).unwrap()
    };
    assert_eq!(worker.join(), Ok(Err(SyncError::NotOwner)));
    assert_eq!(m.lock(), Err(SyncError::Deadlock));
    m.unlock().unwrap();
}

#[derive(Default)]
struct Rendezvous {
    waiting: usize,
    woken: usize,
}

#[test]
fn test_signal_wakes_exactly_one() {
    let rt = test_runtime();
    let state = Arc::new(DetMutex::new(&rt, Rendezvous::default()));
    let cv = Arc::new(DetCondvar::new(&rt));
    let progress = Arc::new(DetCondvar::new(&rt));

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let state = Arc::clone(&state);
            let cv = Arc::clone(&cv);
            let progress = Arc::clone(&progress);
            rt.spawn(move || {
                let mut guard = state.lock().unwrap();
                guard.waiting += 1;
                progress.signal().unwrap();
                let mut guard = cv.wait(guard).unwrap();
                guard.woken += 1;
                progress.signal().unwrap();
            })
            .unwrap()
        })
        .collect();

    let guard = state.lock().unwrap();
    let guard = progress.wait_while(guard, |s| s.waiting < 2).unwrap();
    cv.signal().unwrap();
    let guard = progress.wait_while(guard, |s| s.woken < 1).unwrap();
    assert_eq!(guard.woken, 1);
    drop(guard);

    cv.signal().unwrap();
    for w in waiters {
        w.join().unwrap();
    }
    assert_eq!(state.lock().unwrap().woken, 2);
}

#[test]
fn test_broadcast_wakes_all_waiters() {
    let rt = test_runtime();
    let go = Arc::new(DetMutex::new(&rt, false));
    let cv = Arc::new(DetCondvar::new(&rt));
    let ready = Arc::new(DetMutex::new(&rt, 0usize));
    let ready_cv = Arc::new(DetCondvar::new(&rt));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let go = Arc::clone(&go);
            let cv = Arc::clone(&cv);
            let ready = Arc::clone(&ready);
            let ready_cv = Arc::clone(&ready_cv);
            rt.spawn(move || {
                let guard = go.lock().unwrap();
                *ready.lock().unwrap() += 1;
                ready_cv.signal().unwrap();
                let guard = cv.wait_while(guard, |go| !*go).unwrap();
                assert!(*guard);
            })
            .unwrap()
        })
        .collect();

    let guard = ready.lock().unwrap();
    let guard = ready_cv.wait_while(guard, |n| *n < 3).unwrap();
    drop(guard);
    *go.lock().unwrap() = true;
    cv.broadcast().unwrap();

    for w in waiters {
        w.join().unwrap();
    }
}

/// Producer hands items to two consumers through a bounded buffer.
fn ping_pong(rt: &Runtime) -> Vec<(ThreadId, u32)> {
    let buffer = Arc::new(DetMutex::new(rt, VecDeque::new()));
    let not_empty = Arc::new(DetCondvar::new(rt));
    let not_full = Arc::new(DetCondvar::new(rt));
    let trace = TraceRecorder::new();
    const ITEMS: u32 = 30;
    const CAPACITY: usize = 2;

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let rt2 = rt.clone();
            let buffer = Arc::clone(&buffer);
            let not_empty = Arc::clone(&not_empty);
            let not_full = Arc::clone(&not_full);
            let trace = trace.clone();
            rt.spawn(move || loop {
                let guard = buffer.lock().unwrap();
                let mut guard = not_empty.wait_while(guard, |b| b.is_empty()).unwrap();
                let item = guard.pop_front();
                if let Some(Some(v)) = item {
                    trace.record((rt2.current_id(), v));
                }
                drop(guard);
                not_full.signal().unwrap();
                match item {
                    Some(Some(v)) => rt2.tick(u64::from(v % 5) + 1),
                    // End-of-stream marker.
                    Some(None) | None => break,
                }
            })
            .unwrap()
        })
        .collect();

    for v in (0..ITEMS).map(Some).chain([None, None]) {
        rt.tick(2);
        let guard = buffer.lock().unwrap();
        let mut guard = not_full.wait_while(guard, |b| b.len() >= CAPACITY).unwrap();
        guard.push_back(v);
        drop(guard);
        not_empty.signal().unwrap();
    }
    for c in consumers {
        c.join().unwrap();
    }
    trace.snapshot()
}

#[test]
fn test_producer_consumer_is_reproducible() {
    let runs = repeat_runs(30, ping_pong);
    assert_eq!(runs[0].len(), 30);
    let mut items: Vec<_> = runs[0].iter().map(|(_, v)| *v).collect();
    items.sort_unstable();
    assert_eq!(items, (0..30).collect::<Vec<_>>());
    assert_all_identical(&runs);
}

#[test]
fn test_raw_condvar_round_trip() {
    let rt = test_runtime();
    let m = Arc::new(RawDetMutex::new(&rt));
    let cv = Arc::new(RawDetCondvar::new(&rt));
    let flag = Arc::new(AtomicBool::new(false));

    m.lock().unwrap();
    let worker = {
        let (m, cv, flag) = (Arc::clone(&m), Arc::clone(&cv), Arc::clone(&flag));
        rt.spawn(move || {
            m.lock().unwrap();
            flag.store(true, Ordering::SeqCst);
            cv.signal().unwrap();
            m.unlock().unwrap();
        })
        .unwrap()
    };
    while !flag.load(Ordering::SeqCst) {
        let timed_out = cv
            .wait_timeout(&m, std::time::Duration::from_millis(1))
            .unwrap();
        assert!(!timed_out);
    }
    m.unlock().unwrap();
    worker.join().unwrap();
}

#[test]
fn test_barrier_separates_phases() {
    let rt = test_runtime();
    const WORKERS: usize = 4;
    const PHASES: usize = 3;
    let barrier = Arc::new(DetBarrier::new(&rt, WORKERS));
    let log = Arc::new(DetMutex::new(&rt, Vec::new()));
    let leaders = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..WORKERS)
        .map(|w| {
            let rt2 = rt.clone();
            let barrier = Arc::clone(&barrier);
            let log = Arc::clone(&log);
            let leaders = Arc::clone(&leaders);
            rt.spawn(move || {
                for phase in 0..PHASES {
                    rt2.tick(((w + 1) * (phase + 2)) as u64);
                    log.lock().unwrap().push(phase);
                    if barrier.wait().is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let log = Arc::try_unwrap(log).unwrap().into_inner();
    assert_eq!(log.len(), WORKERS * PHASES);
    assert!(log.windows(2).all(|p| p[0] <= p[1]), "phases interleaved: {log:?}");
    assert_eq!(leaders.load(Ordering::SeqCst), PHASES);
}

#[test]
fn test_barrier_leader_is_reproducible() {
    let runs = repeat_runs(20, |rt| {
        let barrier = Arc::new(DetBarrier::new(rt, 3));
        let workers: Vec<_> = (0..3u64)
            .map(|w| {
                let rt2 = rt.clone();
                let barrier = Arc::clone(&barrier);
                rt.spawn(move || {
                    rt2.tick(10 * (3 - w));
                    barrier.wait().is_leader()
                })
                .unwrap()
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(runs[0].iter().filter(|l| **l).count(), 1);
    assert_all_identical(&runs);
}

#[test]
fn test_passthrough_mode_still_excludes() {
    let rt = passthrough_runtime();
    let sum = Arc::new(DetMutex::new(&rt, 0u32));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let sum = Arc::clone(&sum);
            rt.spawn(move || {
                for _ in 0..250 {
                    *sum.lock().unwrap() += 1;
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(*sum.lock().unwrap(), 1000);
    // Nothing is ordered, so no clock moved.
    assert_eq!(rt.stats().total_locks(), 0);
}

/// Holders do a lot of work inside the critical section, so waiters with
/// earlier clocks often win the physical lock against a release that is
/// logically later than their own turn and have to fast-forward.
fn stale_contention_program(rt: &Runtime) -> Vec<ThreadId> {
    let m = Arc::new(DetMutex::new(rt, ()));
    let trace = TraceRecorder::new();

    let workers: Vec<_> = (0..4u64)
        .map(|w| {
            let rt2 = rt.clone();
            let m = Arc::clone(&m);
            let trace = trace.clone();
            rt.spawn(move || {
                let me = rt2.current_id();
                for i in 0..40u64 {
                    rt2.tick(if (i + w) % 4 == 0 { 500 } else { 1 });
                    let _guard = m.lock().unwrap();
                    trace.record(me);
                    rt2.tick(w * 50 + 1);
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    trace.snapshot()
}

#[test]
fn test_concurrent_stale_acquisitions_stay_ordered() {
    let runs = repeat_runs(30, stale_contention_program);
    for trace in &runs {
        assert_eq!(trace.len(), 160);
    }
    assert_all_identical(&runs);
}
