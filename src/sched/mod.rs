//! Scheduling: thread lifecycle, the per-CPU ready queue, and the coarser
//! task (fork-join) layer built on top of it (spec §4.2).

pub mod scheduler;
pub mod task;
pub mod tls;
pub mod work;

pub use scheduler::{change_constraints, priority_of, wake_thread, PerCpuScheduler};
pub use task::{ForkResult, Priority, Thread, ThreadId};
