//! Lightweight task (spec.md §3, §4.8): the unit the scheduler runs on
//! its worker pool. Grounded in the reference workspace's
//! `vm::scheduler::task::Task` for the shape (`AtomicU64`-backed id,
//! `Mutex<State>`), narrowed to the exact state machine spec.md names —
//! `created -> running -> (waiting-for-timers)? -> completed ->
//! cleaning-up` — which differs from the reference workspace's own
//! `Created/Running/Suspended/Resumed/Completed/Failed` set, and
//! extended with the parent/child ownership spec.md §9 calls for:
//! "children hold weak references to parents; parents hold strong
//! references to children."

use crate::runtime::promise::{Outcome, Promise};
use crate::runtime::timer::TimerHeap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    fn next() -> TaskId {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    WaitingForTimers,
    Completed,
    CleaningUp,
}

pub struct Task {
    id: TaskId,
    state: Mutex<TaskState>,
    /// Absolute address of the compiled function this task runs
    /// (spec.md §4.4.c: always an addressable function, never inline).
    pub function_addr: usize,
    pub args: Vec<i64>,
    pub result: Arc<Promise>,
    pub timers: Mutex<TimerHeap>,
    parent: Option<Weak<Task>>,
    children: Mutex<Vec<Arc<Task>>>,
    /// Cooperative exit flag checked at timer-queue waits (spec.md §5:
    /// "no forced termination").
    exit_requested: std::sync::atomic::AtomicBool,
    /// The body's return value, captured the one time it runs and held
    /// here until the timer heap settles enough to actually resolve
    /// `result` with it (spec.md §4.8: a task may be re-queued onto a
    /// worker purely to drain due timers without its body running
    /// again).
    pending_outcome: Mutex<Option<Outcome>>,
}

impl Task {
    pub fn new(function_addr: usize, args: Vec<i64>, parent: Option<&Arc<Task>>) -> Arc<Task> {
        let task = Arc::new(Task {
            id: TaskId::next(),
            state: Mutex::new(TaskState::Created),
            function_addr,
            args,
            result: Promise::new(),
            timers: Mutex::new(TimerHeap::new()),
            parent: parent.map(Arc::downgrade),
            children: Mutex::new(Vec::new()),
            exit_requested: std::sync::atomic::AtomicBool::new(false),
            pending_outcome: Mutex::new(None),
        });
        if let Some(parent) = parent {
            parent.children.lock().push(task.clone());
        }
        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, new_state: TaskState) {
        *self.state.lock() = new_state;
    }

    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children_completed(&self) -> bool {
        self.children
            .lock()
            .iter()
            .all(|c| c.state() == TaskState::Completed || c.state() == TaskState::CleaningUp)
    }

    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    /// True once the body has returned and the timer heap holds nothing
    /// but cancelled entries (spec.md §4.8's transition into `completed`).
    pub fn ready_to_complete(&self) -> bool {
        self.timers.lock().only_cancelled_remain()
    }

    /// Runs the state machine's tail end after the body returns: settle
    /// on `waiting-for-timers` if a non-cancelled timer remains or any
    /// child has not yet completed, otherwise `completed` and
    /// immediately `cleaning-up` (spec.md §8 item 5: a task must not
    /// enter `completed` with live timers or unfinished children).
    /// `outcome` is cached in `pending_outcome` regardless of which path
    /// is taken, since a `waiting-for-timers` task's body has already run
    /// and must not run again just to recompute the same value.
    pub fn advance_after_body_return(&self, outcome: Outcome) {
        *self.pending_outcome.lock() = Some(outcome.clone());
        if !self.ready_to_complete() || !self.children_completed() {
            self.set_state(TaskState::WaitingForTimers);
            return;
        }
        self.set_state(TaskState::Completed);
        self.result.resolve(outcome);
        self.set_state(TaskState::CleaningUp);
    }

    /// Re-checked every time a `waiting-for-timers` task is revisited
    /// after its due timers are drained, without re-running its body
    /// (spec.md §4.8's transition into `completed` needs the body's
    /// already-captured return value, an empty-of-live-timers heap, and
    /// every child also completed). A task only waiting on a child stays
    /// `waiting-for-timers` until the scheduler revisits it again.
    pub fn recheck_after_timers(&self) {
        if self.state() != TaskState::WaitingForTimers {
            return;
        }
        if !self.ready_to_complete() || !self.children_completed() {
            return;
        }
        let outcome = self
            .pending_outcome
            .lock()
            .clone()
            .expect("waiting-for-timers always followed a body return");
        self.set_state(TaskState::Completed);
        self.result.resolve(outcome);
        self.set_state(TaskState::CleaningUp);
    }
}

thread_local! {
    /// The task installed on the worker thread that picked it up
    /// (spec.md §5: "each task has a thread-local task pointer installed
    /// when a worker picks it up").
    static CURRENT_TASK: std::cell::RefCell<Option<Arc<Task>>> = const { std::cell::RefCell::new(None) };
}

/// Installs `task` as the current thread's task for the duration of
/// `f`, restoring whatever was installed before on return.
pub fn with_current_task<R>(task: Arc<Task>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_TASK.with(|cell| cell.borrow_mut().replace(task));
    let result = f();
    CURRENT_TASK.with(|cell| *cell.borrow_mut() = previous);
    result
}

pub fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_distinct_and_increasing() {
        let a = Task::new(0, vec![], None);
        let b = Task::new(0, vec![], None);
        assert!(b.id().0 > a.id().0);
    }

    #[test]
    fn new_task_starts_created() {
        let t = Task::new(0, vec![], None);
        assert_eq!(t.state(), TaskState::Created);
    }

    #[test]
    fn child_holds_weak_parent_parent_holds_strong_child() {
        let parent = Task::new(0, vec![], None);
        let child = Task::new(0, vec![], Some(&parent));
        assert_eq!(child.parent().unwrap().id(), parent.id());
        assert!(!parent.children_completed());
        child.set_state(TaskState::Completed);
        assert!(parent.children_completed());
    }

    #[test]
    fn completes_immediately_when_timer_heap_is_empty() {
        let t = Task::new(0, vec![], None);
        t.advance_after_body_return(Outcome::Resolved(5));
        assert_eq!(t.state(), TaskState::Completed);
        assert!(matches!(t.result.await_blocking(), Outcome::Resolved(5)));
    }

    #[test]
    fn waits_for_timers_when_a_non_cancelled_timer_remains() {
        let t = Task::new(0, vec![], None);
        t.timers.lock().schedule(
            std::time::Instant::now() + std::time::Duration::from_secs(60),
            0,
            false,
            std::time::Duration::ZERO,
        );
        t.advance_after_body_return(Outcome::Resolved(1));
        assert_eq!(t.state(), TaskState::WaitingForTimers);
        assert!(!t.result.is_resolved(), "outcome is cached, not resolved, until timers settle");
    }

    #[test]
    fn recheck_after_timers_resolves_with_the_cached_outcome_once_ready() {
        let t = Task::new(0, vec![], None);
        let id = t.timers.lock().schedule(
            std::time::Instant::now() + std::time::Duration::from_secs(60),
            0,
            false,
            std::time::Duration::ZERO,
        );
        t.advance_after_body_return(Outcome::Resolved(7));
        assert_eq!(t.state(), TaskState::WaitingForTimers);

        // Not ready yet: the timer is still live.
        t.recheck_after_timers();
        assert_eq!(t.state(), TaskState::WaitingForTimers);

        t.timers.lock().cancel(id);
        t.recheck_after_timers();
        assert_eq!(t.state(), TaskState::Completed);
        assert!(matches!(t.result.await_blocking(), Outcome::Resolved(7)));
    }

    #[test]
    fn recheck_after_timers_is_a_no_op_once_already_completed() {
        let t = Task::new(0, vec![], None);
        t.advance_after_body_return(Outcome::Resolved(3));
        assert_eq!(t.state(), TaskState::Completed);
        t.recheck_after_timers();
        assert_eq!(t.state(), TaskState::Completed);
    }

    #[test]
    fn does_not_complete_while_a_child_is_still_running() {
        let parent = Task::new(0, vec![], None);
        let child = Task::new(0, vec![], Some(&parent));
        parent.advance_after_body_return(Outcome::Resolved(9));
        assert_eq!(parent.state(), TaskState::WaitingForTimers);
        assert!(!parent.result.is_resolved(), "must not resolve before the child completes");

        child.set_state(TaskState::Completed);
        parent.recheck_after_timers();
        assert_eq!(parent.state(), TaskState::Completed);
        assert!(matches!(parent.result.await_blocking(), Outcome::Resolved(9)));
    }

    #[test]
    fn current_task_is_installed_only_for_the_closure_duration() {
        assert!(current_task().is_none());
        let t = Task::new(0, vec![], None);
        let id = t.id();
        with_current_task(t, || {
            assert_eq!(current_task().unwrap().id(), id);
        });
        assert!(current_task().is_none());
    }
}
