//! Lightweight task runtime (spec.md §3-§5): tasks, their per-task timer
//! heaps, one-shot promises, and the work-stealing scheduler that runs
//! them. Each submodule owns one entity from the data model; this module
//! only re-exports the public surface the pipeline and the generated
//! code's runtime-helper calls bind against.

pub mod promise;
pub mod scheduler;
pub mod task;
pub mod timer;

pub use promise::{Outcome, Promise};
pub use scheduler::{Scheduler, SchedulerStats, TaskEntry};
pub use task::{current_task, with_current_task, Task, TaskId, TaskState};
pub use timer::{TimerHeap, TimerId};
