//! Scenario B (spec.md §8): `go` a pure function across `[1, 2, 3]` and
//! collect with `Promise.all`. The first two tests exercise the
//! scheduler/promise pair directly against real native function
//! pointers standing in for compiled task bodies, matching the
//! `TaskEntry` calling convention every compiled function shares; the
//! third compiles actual `go`/`await` gots source and asserts on the
//! JIT-executed result.

use gots_engine::pipeline::{self, EngineOptions};
use gots_engine::runtime::promise::{Outcome, Promise};
use gots_engine::runtime::Scheduler;
use std::time::{Duration, Instant};

const GO_AWAIT_SOURCE: &str = r#"
function doubleIt(n: int64): int64 {
    return n * 2;
}
function main(): int64 {
    let p1 = go doubleIt(1);
    let p2 = go doubleIt(2);
    let p3 = go doubleIt(3);
    let a = await p1;
    let b = await p2;
    let c = await p3;
    return a + b * 10 + c * 100;
}
"#;

#[test]
fn go_and_await_preserve_per_task_results_through_jit_code() {
    pipeline::compile_and_install(GO_AWAIT_SOURCE, EngineOptions::default())
        .expect("compiles and loads");
    let result = pipeline::call_function("main", &[]).expect("main is registered");
    assert_eq!(
        result, 642,
        "a=2 (doubleIt(1)), b=4 (doubleIt(2)), c=6 (doubleIt(3)): 2 + 40 + 600"
    );
}

/// Stands in for a compiled `function double_after_sleep(n: int64): int64`
/// task body: sleeps a fixed interval, then returns `n * 2`.
unsafe extern "C" fn double_after_sleep(args: *const i64, argc: u32) -> i64 {
    assert_eq!(argc, 1);
    std::thread::sleep(Duration::from_millis(30));
    (*args) * 2
}

#[test]
fn three_parallel_tasks_resolve_in_order_and_overlap_in_time() {
    let mut scheduler = Scheduler::new(3);
    scheduler.start();

    let start = Instant::now();
    let ids = [1i64, 2, 3].map(|n| scheduler.spawn(double_after_sleep as usize, vec![n], None));
    let tasks: Vec<_> = ids.iter().map(|id| scheduler.get_task(*id).unwrap()).collect();
    let promises: Vec<_> = tasks.iter().map(|t| t.result.clone()).collect();

    let values = Promise::all_values(&promises).expect("every input resolves");
    let elapsed = start.elapsed();

    assert_eq!(values, vec![2, 4, 6], "results preserve input order");
    // Three 30ms sleeps run serially would take >= 90ms; run in parallel
    // on a 3-worker pool they should finish well under that.
    assert!(
        elapsed < Duration::from_millis(90),
        "tasks should overlap, took {elapsed:?}"
    );

    for promise in &promises {
        assert!(promise.is_resolved());
    }
    assert!(scheduler.wait_all(Duration::from_secs(1)));
    let stats = scheduler.stats();
    assert_eq!(stats.tasks_spawned, 3);
    assert_eq!(stats.tasks_completed, 3);
    scheduler.shutdown();
}

#[test]
fn promise_all_resolves_exactly_once_even_if_polled_repeatedly() {
    let mut scheduler = Scheduler::new(2);
    scheduler.start();
    let id = scheduler.spawn(double_after_sleep as usize, vec![21], None);
    let task = scheduler.get_task(id).unwrap();

    let first = scheduler.await_task(&task);
    let second = scheduler.await_task(&task);
    assert!(matches!(first, Outcome::Resolved(42)));
    assert!(matches!(second, Outcome::Resolved(42)));
    scheduler.shutdown();
}
