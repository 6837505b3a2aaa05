//! Task scheduler (spec.md §4.8): a fixed-size worker pool pulling from
//! a shared injector, grounded in the reference workspace's
//! `vm::scheduler::{Scheduler, Worker}` — same `crossbeam_deque`
//! work-stealing setup, same `parking_lot`-guarded task registry, same
//! `num_cpus`-sized default pool — but simplified for a pipeline that
//! hands workers a compiled native function pointer to call directly
//! rather than a bytecode program to interpret cooperatively. There is
//! no suspend/resume here: a worker calls the task's entry point to
//! completion, so "waiting for timers" is driven entirely by what the
//! compiled body itself does (register a callback and return) rather
//! than by the scheduler pausing mid-function.

use crate::runtime::promise::Outcome;
use crate::runtime::task::{with_current_task, Task, TaskId, TaskState};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CWorker};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Function pointer shape every task body compiles to: a fixed-arity
/// native entry point taking its arguments packed onto the "pure
/// stack" calling convention and returning a single 64-bit result.
pub type TaskEntry = unsafe extern "C" fn(*const i64, u32) -> i64;

#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerStats {
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub active_tasks: usize,
}

struct SharedState {
    injector: Injector<Arc<Task>>,
    tasks: RwLock<FxHashMap<TaskId, Arc<Task>>>,
    tasks_spawned: AtomicU64,
    tasks_completed: AtomicU64,
}

pub struct Scheduler {
    shared: Arc<SharedState>,
    workers: Vec<WorkerHandle>,
    started: bool,
}

struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// `worker_count` of 0 defaults to `num_cpus::get()`, matching the
    /// reference workspace's own `Scheduler::new(0)` convention.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 { num_cpus::get().max(1) } else { worker_count };
        Scheduler {
            shared: Arc::new(SharedState {
                injector: Injector::new(),
                tasks: RwLock::new(FxHashMap::default()),
                tasks_spawned: AtomicU64::new(0),
                tasks_completed: AtomicU64::new(0),
            }),
            workers: Vec::with_capacity(worker_count),
            started: false,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.capacity().max(self.workers.len())
    }

    /// Spawns the worker pool. Idempotent, like the reference
    /// workspace's scheduler.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        let target = self.workers.capacity();
        // Each worker's own deque is created on its own thread since
        // `crossbeam_deque::Worker` is not `Send`; only the `Stealer`
        // handles, which are `Send`, are shared up front.
        let deques: Vec<CWorker<Arc<Task>>> = (0..target).map(|_| CWorker::new_lifo()).collect();
        let stealers: Vec<Stealer<Arc<Task>>> = deques.iter().map(|d| d.stealer()).collect();

        for (id, deque) in deques.into_iter().enumerate() {
            let shared = self.shared.clone();
            let stealers = stealers.clone();
            let shutdown = Arc::new(AtomicBool::new(false));
            let thread_shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("gots-worker-{id}"))
                .spawn(move || run_worker(deque, stealers, shared, thread_shutdown))
                .expect("failed to spawn worker thread");
            self.workers.push(WorkerHandle { shutdown, handle: Some(handle) });
        }
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Registers `task` and pushes it onto the injector. Returns the
    /// assigned id.
    pub fn spawn(&self, entry: usize, args: Vec<i64>, parent: Option<&Arc<Task>>) -> TaskId {
        let task = Task::new(entry, args, parent);
        let id = task.id();
        self.shared.tasks.write().insert(id, task.clone());
        self.shared.tasks_spawned.fetch_add(1, Ordering::Relaxed);
        self.shared.injector.push(task);
        id
    }

    pub fn get_task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.shared.tasks.read().get(&id).cloned()
    }

    /// Blocks the calling thread until `task`'s result promise settles,
    /// then returns its outcome (spec.md §4.8 `await`, §5: acquire
    /// ordering against the resolving `release`).
    pub fn await_task(&self, task: &Arc<Task>) -> Outcome {
        task.result.await_blocking()
    }

    /// Registers a one-shot or repeating timer against the calling
    /// task (spec.md §4.8 `set-timer`). Returns `None` if called
    /// outside any task context — callers surface this as
    /// `NoTaskContextError` rather than a hard `GotsError`.
    pub fn set_timer(&self, deadline: Instant, callback_addr: usize, is_interval: bool, interval: Duration) -> Option<u64> {
        let task = crate::runtime::task::current_task()?;
        Some(task.timers.lock().schedule(deadline, callback_addr, is_interval, interval))
    }

    /// Cancels a timer previously registered against the calling task
    /// (spec.md §4.8 `cancel-timer`). A no-op, not an error, if the
    /// task or timer no longer exists.
    pub fn cancel_timer(&self, id: u64) {
        if let Some(task) = crate::runtime::task::current_task() {
            task.timers.lock().cancel(id);
        }
    }

    /// Blocks until every registered task has reached `Completed` or
    /// `CleaningUp`, or until `timeout` elapses. Returns whether all
    /// tasks finished.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let all_done = self
                .shared
                .tasks
                .read()
                .values()
                .all(|t| matches!(t.state(), TaskState::Completed | TaskState::CleaningUp));
            if all_done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_spawned: self.shared.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.shared.tasks_completed.load(Ordering::Relaxed),
            active_tasks: self
                .shared
                .tasks
                .read()
                .values()
                .filter(|t| !matches!(t.state(), TaskState::Completed | TaskState::CleaningUp))
                .count(),
        }
    }

    /// Signals every worker to stop after its current task and joins
    /// the threads. Idempotent.
    pub fn shutdown(&mut self) {
        for w in &self.workers {
            w.shutdown.store(true, Ordering::Release);
        }
        for w in &mut self.workers {
            if let Some(handle) = w.handle.take() {
                let _ = handle.join();
            }
        }
        self.started = false;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(0)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    local: CWorker<Arc<Task>>,
    stealers: Vec<Stealer<Arc<Task>>>,
    shared: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let task = match find_work(&local, &stealers, &shared.injector) {
            Some(t) => t,
            None => {
                thread::sleep(Duration::from_micros(100));
                continue;
            }
        };
        run_task_to_completion(&task, &shared);
    }
}

fn run_task_to_completion(task: &Arc<Task>, shared: &Arc<SharedState>) {
    // A task re-injected to drain its timer heap (`TaskState::WaitingForTimers`)
    // has already run its body once; running it again would duplicate
    // every side effect the body performed (spec.md §8: "each [line]
    // once"). Only a freshly spawned task's body runs here.
    let first_visit = task.state() != TaskState::WaitingForTimers;
    if first_visit {
        task.set_state(TaskState::Running);
        let entry: TaskEntry = unsafe { std::mem::transmute(task.function_addr) };
        let args = task.args.clone();
        let outcome = with_current_task(task.clone(), || {
            let result = unsafe { entry(args.as_ptr(), args.len() as u32) };
            Outcome::Resolved(result)
        });

        let now = Instant::now();
        let fired = task.timers.lock().pop_due(now);
        for callback_addr in fired {
            let callback: TaskEntry = unsafe { std::mem::transmute(callback_addr) };
            with_current_task(task.clone(), || unsafe {
                callback(std::ptr::null(), 0);
            });
        }
        task.advance_after_body_return(outcome);
    } else {
        let now = Instant::now();
        let fired = task.timers.lock().pop_due(now);
        for callback_addr in fired {
            let callback: TaskEntry = unsafe { std::mem::transmute(callback_addr) };
            with_current_task(task.clone(), || unsafe {
                callback(std::ptr::null(), 0);
            });
        }
        task.recheck_after_timers();
    }

    if matches!(task.state(), TaskState::Completed | TaskState::CleaningUp) {
        shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
    } else {
        // Still waiting on a non-cancelled timer: re-inject so a
        // worker revisits it once the deadline has passed.
        shared.injector.push(task.clone());
    }
}

fn find_work(
    local: &CWorker<Arc<Task>>,
    stealers: &[Stealer<Arc<Task>>],
    injector: &Injector<Arc<Task>>,
) -> Option<Arc<Task>> {
    if let Some(task) = local.pop() {
        return Some(task);
    }
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(task) => return Some(task),
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }
    for stealer in stealers {
        loop {
            match stealer.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn returns_forty_two(_args: *const i64, _argc: u32) -> i64 {
        42
    }

    unsafe extern "C" fn adds_args(args: *const i64, argc: u32) -> i64 {
        let mut sum = 0;
        for i in 0..argc as isize {
            sum += *args.offset(i);
        }
        sum
    }

    #[test]
    fn scheduler_creation_defaults_worker_count_from_num_cpus() {
        let s = Scheduler::new(0);
        assert!(s.worker_count() >= 1);
        assert!(!s.is_started());
    }

    #[test]
    fn spawn_and_await_runs_the_task_to_completion() {
        let mut s = Scheduler::new(2);
        s.start();
        let id = s.spawn(returns_forty_two as usize, vec![], None);
        let task = s.get_task(id).unwrap();
        assert!(matches!(s.await_task(&task), Outcome::Resolved(42)));
        s.shutdown();
    }

    #[test]
    fn spawn_passes_packed_arguments_through() {
        let mut s = Scheduler::new(1);
        s.start();
        let id = s.spawn(adds_args as usize, vec![2, 3, 4], None);
        let task = s.get_task(id).unwrap();
        assert!(matches!(s.await_task(&task), Outcome::Resolved(9)));
        s.shutdown();
    }

    #[test]
    fn stats_count_spawned_and_completed_tasks() {
        let mut s = Scheduler::new(2);
        s.start();
        let id = s.spawn(returns_forty_two as usize, vec![], None);
        let task = s.get_task(id).unwrap();
        s.await_task(&task);
        assert!(s.wait_all(Duration::from_secs(1)));
        let stats = s.stats();
        assert_eq!(stats.tasks_spawned, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.active_tasks, 0);
        s.shutdown();
    }

    #[test]
    fn set_timer_outside_a_task_returns_none() {
        let s = Scheduler::new(1);
        assert!(s.set_timer(Instant::now(), 0, false, Duration::ZERO).is_none());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut s = Scheduler::new(1);
        s.start();
        s.shutdown();
        s.shutdown();
        assert!(!s.is_started());
    }
}
