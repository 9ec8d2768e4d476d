//! Repeated runs of the same program produce the same synchronization order.

use lockstep_runtime::{DetMutex, Runtime, ThreadId};
use lockstep_test_helpers::{assert_all_identical, repeat_runs, TraceRecorder};
use std::sync::Arc;

const RUNS: usize = 100;

/// N workers each take the lock I times, doing a different amount of work
/// between acquisitions. Returns the order in which the lock was taken.
fn counter_program(rt: &Runtime, threads: usize, iterations: usize) -> (Vec<ThreadId>, u64) {
    let sum = Arc::new(DetMutex::new(rt, 0u64));
    let trace = TraceRecorder::new();

    let workers: Vec<_> = (0..threads)
        .map(|w| {
            let rt2 = rt.clone();
            let sum = Arc::clone(&sum);
            let trace = trace.clone();
            rt.spawn(move || {
                let me = rt2.current_id();
                for i in 0..iterations {
                    rt2.tick(((i * 7 + w * 3) % 13 + 1) as u64);
                    let mut s = sum.lock().unwrap();
                    *s += 1;
                    trace.record(me);
                }
            })
            .unwrap()
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let total = *sum.lock().unwrap();
    (trace.snapshot(), total)
}

#[test]
fn test_counter_trace_is_identical_across_runs() {
    let runs = repeat_runs(RUNS, |rt| counter_program(rt, 4, 50));
    for (_, total) in &runs {
        assert_eq!(*total, 200);
    }
    assert_all_identical(&runs);
}

#[test]
fn test_every_thread_appears_in_trace() {
    let rt = lockstep_test_helpers::test_runtime();
    let (trace, _) = counter_program(&rt, 3, 10);
    for id in 1..=3 {
        let count = trace.iter().filter(|t| **t == ThreadId(id)).count();
        assert_eq!(count, 10, "thread {id}");
    }
}

/// Atomicity violation: the balance is read and written under separate
/// critical sections, so the result depends on interleaving. Under ordering
/// the interleaving is fixed.
fn bank_program(rt: &Runtime) -> i64 {
    let account = Arc::new(DetMutex::new(rt, 10i64));

    let transfer = |rt: &Runtime, account: &DetMutex<i64>, amount: i64| {
        let balance = *account.lock().unwrap();
        rt.tick(5);
        *account.lock().unwrap() = balance + amount;
    };

    let depositor = {
        let rt2 = rt.clone();
        let account = Arc::clone(&account);
        rt.spawn(move || transfer(&rt2, &account, 1)).unwrap()
    };
    // Thread creation is work too.
    rt.tick(1_000);
    transfer(rt, &account, -2);
    depositor.join().unwrap();

    let balance = *account.lock().unwrap();
    balance
}

#[test]
fn test_bank_balance_is_always_nine() {
    let balances = repeat_runs(RUNS, bank_program);
    assert!(balances.iter().all(|b| *b == 9), "{balances:?}");
}

#[test]
fn test_lock_counts_and_last_sync_are_reproducible() {
    let summaries = repeat_runs(20, |rt| {
        counter_program(rt, 3, 20);
        let stats = rt.stats();
        let locks: Vec<_> = stats.threads.iter().map(|t| t.locks).collect();
        (locks, stats.last_sync)
    });
    assert_all_identical(&summaries);
}
