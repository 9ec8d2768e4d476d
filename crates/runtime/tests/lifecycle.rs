//! Thread lifecycle: exit, cancel, panics, determinism switch, log files.

use lockstep_runtime::{
    thread_log_path, DetCondvar, DetMutex, JoinError, LogicalTime, Runtime, ThreadId,
};
use lockstep_test_helpers::{test_config, test_runtime};
use std::sync::Arc;

fn deep_exit(rt: &Runtime, depth: u32) -> u32 {
    if depth == 0 {
        rt.exit(99u32);
    }
    deep_exit(rt, depth - 1) + 1
}

#[test]
fn test_exit_from_nested_call() {
    let rt = test_runtime();
    let rt2 = rt.clone();
    let handle = rt.spawn(move || deep_exit(&rt2, 5)).unwrap();
    assert_eq!(handle.join(), Ok(99));
}

#[test]
fn test_panic_releases_held_lock() {
    let rt = test_runtime();
    let m = Arc::new(DetMutex::new(&rt, 0));
    let handle = {
        let m = Arc::clone(&m);
        rt.spawn(move || {
            let mut g = m.lock().unwrap();
            *g = 1;
            panic!("worker failed");
        })
        .unwrap()
    };
    match handle.join() {
        Err(JoinError::Panicked { thread, message }) => {
            assert_eq!(thread, ThreadId(1));
            assert_eq!(message, "worker failed");
        }
        other => panic!("expected a panic, got {other:?}"),
    }
    assert_eq!(*m.lock().unwrap(), 1);
}

#[test]
fn test_cancel_computing_thread() {
    let rt = test_runtime();
    let rt2 = rt.clone();
    let handle = rt
        .spawn(move || loop {
            rt2.tick(1);
        })
        .unwrap();
    rt.tick(100);
    handle.cancel();
    let id = handle.thread_id();
    assert_eq!(handle.join(), Err(JoinError::Cancelled { thread: id }));
    assert_eq!(rt.active_threads(), 1);
}

#[test]
fn test_cancel_thread_blocked_in_condvar() {
    let rt = test_runtime();
    let state = Arc::new(DetMutex::new(&rt, false));
    let cv = Arc::new(DetCondvar::new(&rt));
    let handle = {
        let (state, cv) = (Arc::clone(&state), Arc::clone(&cv));
        rt.spawn(move || {
            let guard = state.lock().unwrap();
            let _guard = cv.wait_while(guard, |ready| !*ready).unwrap();
        })
        .unwrap()
    };
    rt.tick(100);
    rt.cancel(&handle);
    let id = handle.thread_id();
    assert_eq!(rt.join(handle), Err(JoinError::Cancelled { thread: id }));

    // The waiter gave the mutex back when it was cancelled.
    *state.lock().unwrap() = true;
}

#[test]
fn test_join_disables_ordering_when_alone() {
    let rt = test_runtime();
    assert!(!rt.is_enabled());
    let rt2 = rt.clone();
    let handle = rt.spawn(move || rt2.is_enabled()).unwrap();
    assert!(rt.is_enabled());
    assert_eq!(handle.join(), Ok(true));
    assert!(!rt.is_enabled());
}

#[test]
fn test_nested_spawn() {
    let rt = test_runtime();
    let rt2 = rt.clone();
    let outer = rt
        .spawn(move || {
            let rt3 = rt2.clone();
            let inner = rt2.spawn(move || rt3.current_id()).unwrap();
            inner.join().unwrap()
        })
        .unwrap();
    assert_eq!(outer.join(), Ok(ThreadId(2)));
    assert_eq!(rt.created_threads(), 3);
}

#[test]
fn test_disabled_thread_runs_unordered() {
    let rt = test_runtime();
    let rt2 = rt.clone();
    let handle = rt
        .spawn(move || {
            rt2.disable();
            let parked = rt2.clock();
            let ordered = rt2.is_enabled();
            rt2.enable();
            (parked, ordered, rt2.is_enabled())
        })
        .unwrap();
    let (parked, ordered, restored) = handle.join().unwrap();
    assert_eq!(parked, LogicalTime::SUSPENDED);
    assert!(!ordered);
    assert!(restored);
}

#[test]
fn test_debug_log_writes_per_thread_files() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");
    let rt = Runtime::init(test_config().with_log_file(&prefix).with_debug_level(1)).unwrap();

    let rt2 = rt.clone();
    let handle = rt
        .spawn(move || {
            rt2.tick(4);
            rt2.debug_log("hello from worker");
        })
        .unwrap();
    handle.join().unwrap();
    rt.debug_log("master done");

    let worker_log = std::fs::read_to_string(thread_log_path(&prefix, ThreadId(1))).unwrap();
    assert!(worker_log.contains("hello from worker"), "{worker_log}");
    assert!(worker_log.contains("start"));
    let master_log = std::fs::read_to_string(thread_log_path(&prefix, ThreadId(0))).unwrap();
    assert!(master_log.contains("master done"), "{master_log}");
}

#[test]
fn test_stats_after_run() {
    let rt = test_runtime();
    let m = Arc::new(DetMutex::new(&rt, ()));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let m = Arc::clone(&m);
            rt.spawn(move || {
                for _ in 0..5 {
                    drop(m.lock().unwrap());
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let stats = rt.stats();
    assert_eq!(stats.created_threads, 3);
    assert_eq!(stats.mutexes, 1);
    for id in [1, 2] {
        let t = stats.thread(ThreadId(id)).unwrap();
        // Five user locks plus the lifecycle handshakes.
        assert!(t.locks >= 5, "{t:?}");
        assert!(t.finished);
        assert_eq!(t.clock, LogicalTime::RETIRED.get());
    }
    rt.print_stats();
}
