//! Tasks: a coarser-grained unit of work decoupled from threads (spec §4.2,
//! "Tasks").
//!
//! There is no teacher or original-source implementation to ground this on
//! directly (the teacher has no equivalent abstraction, and the retrieved
//! original C sources declare `nk_task_produce`/`nk_task_wait` only through
//! their call sites in `test/tasks.c`, not a header). The shape here —
//! `produce` appends to a per-CPU queue, one worker thread per CPU drains
//! it, `wait` blocks on completion and reports `nk_task_stats`-style
//! timing — follows that call-site usage directly; the queuing and
//! blocking mechanics reuse the same spinlock-protected-queue-plus-
//! `WaitQueue` idiom as [`crate::sched::scheduler::PerCpuScheduler::join`].

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::arch::x86_64::ipi;
use crate::arch::x86_64::percpu::{self, CoreId};
use crate::config::{DEFAULT_STACK_SIZE, MAX_CPUS};
use crate::errno::{Error, Result};
use crate::sched::scheduler::wake_thread;
use crate::sched::task::NORMAL_PRIO;
use crate::sync::spinlock::SpinlockIrqSave;
use crate::sync::waitqueue::WaitQueue;

/// Reserved bit field, carried through unexamined (spec §4.2 names it but
/// doesn't define any bits; the original's call sites always pass `0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFlags(pub u32);

impl TaskFlags {
	pub const NONE: Self = Self(0);
}

pub type TaskFn = Box<dyn FnOnce(usize) -> usize + Send>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

struct TaskInner {
	func: SpinlockIrqSave<Option<TaskFn>>,
	arg: usize,
	detached: bool,
	state: AtomicU8,
	result: AtomicUsize,
	waiters: WaitQueue,
	enqueued_ns: AtomicU64,
	dequeued_ns: AtomicU64,
	completed_ns: AtomicU64,
}

impl TaskInner {
	fn new(func: TaskFn, arg: usize, detached: bool) -> Self {
		Self {
			func: SpinlockIrqSave::new(Some(func)),
			arg,
			detached,
			state: AtomicU8::new(PENDING),
			result: AtomicUsize::new(0),
			waiters: WaitQueue::new(),
			enqueued_ns: AtomicU64::new(0),
			dequeued_ns: AtomicU64::new(0),
			completed_ns: AtomicU64::new(0),
		}
	}
}

/// A handle to a produced task. Cheap to clone; the underlying work runs at
/// most once, on at most one CPU, regardless of how many handles exist.
#[derive(Clone)]
pub struct Task(Arc<TaskInner>);

/// Timing breakdown returned by [`wait`], matching the original's
/// `nk_task_stats` field-for-field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
	pub size_ns: u64,
	pub enqueue_ns: u64,
	pub dequeue_ns: u64,
	pub complete_ns: u64,
	pub wait_start_ns: u64,
	pub wait_end_ns: u64,
}

struct CpuQueue {
	tasks: SpinlockIrqSave<VecDeque<Task>>,
	idle_waiters: WaitQueue,
	worker_started: AtomicBool,
}

impl CpuQueue {
	const fn new() -> Self {
		Self {
			tasks: SpinlockIrqSave::new(VecDeque::new()),
			idle_waiters: WaitQueue::new(),
			worker_started: AtomicBool::new(false),
		}
	}
}

const EMPTY_QUEUE: CpuQueue = CpuQueue::new();
static QUEUES: [CpuQueue; MAX_CPUS] = [EMPTY_QUEUE; MAX_CPUS];

static ROUND_ROBIN: AtomicUsize = AtomicUsize::new(0);

fn pick_cpu() -> CoreId {
	let online = percpu::online_cores().max(1);
	ROUND_ROBIN.fetch_add(1, Ordering::Relaxed) % online
}

/// Runs `f` on `core_id`'s own scheduler: directly if we're already running
/// there, otherwise via a cross-call (spec §4.1), since a `PerCpuScheduler`
/// is only ever touched by the core that owns it.
fn with_scheduler_on(core_id: CoreId, f: impl FnOnce() + Send + 'static) {
	if core_id == percpu::core_id() {
		f();
	} else {
		ipi::run_on(core_id, f);
	}
}

fn ensure_worker(core_id: CoreId) {
	if QUEUES[core_id]
		.worker_started
		.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
		.is_err()
	{
		return;
	}
	with_scheduler_on(core_id, move || {
		let id = percpu::scheduler().start(worker_entry, core_id, NORMAL_PRIO, DEFAULT_STACK_SIZE, true);
		crate::sched::scheduler::rename(id, "task-worker").ok();
	});
}

extern "C" fn worker_entry(core_id: usize) -> ! {
	loop {
		let next = QUEUES[core_id].tasks.lock().pop_front();
		match next {
			Some(task) => execute(task, core_id),
			None => {
				let me = percpu::scheduler().current();
				QUEUES[core_id].idle_waiters.enqueue(me).ok();
				if percpu::scheduler().block_current() {
					percpu::scheduler().reschedule();
				}
			}
		}
	}
}

fn execute(task: Task, core_id: usize) {
	let inner = &task.0;
	inner.dequeued_ns.store(crate::time::now_nanos(), Ordering::Release);
	inner.state.store(RUNNING, Ordering::Release);

	let func = inner.func.lock().take().expect("task executed twice");
	let result = func(inner.arg);

	inner.result.store(result, Ordering::Release);
	inner.completed_ns.store(crate::time::now_nanos(), Ordering::Release);
	inner.state.store(DONE, Ordering::Release);

	for waiter in inner.waiters.wake_all() {
		wake_thread(waiter);
	}
	let _ = core_id;
}

/// Appends a unit of work to `cpu`'s task queue (or a round-robin choice of
/// online CPU if `cpu` is `None`), starting that CPU's worker thread on
/// first use. Consumed by exactly one CPU, exactly once (spec §4.2,
/// "Tasks": "a task cannot be consumed from two CPUs").
pub fn produce(
	cpu: Option<CoreId>,
	_flags: TaskFlags,
	func: impl FnOnce(usize) -> usize + Send + 'static,
	arg: usize,
	detached: bool,
) -> Task {
	let target = cpu.unwrap_or_else(pick_cpu);
	ensure_worker(target);

	let task = Task(Arc::new(TaskInner::new(Box::new(func), arg, detached)));
	task.0.enqueued_ns.store(crate::time::now_nanos(), Ordering::Release);

	QUEUES[target].tasks.lock().push_back(task.clone());
	if let Some(waiter) = QUEUES[target].idle_waiters.wake_one() {
		wake_thread(waiter);
	}
	task
}

/// Blocks the calling thread until `task` completes, then reports its
/// result and timing (spec §4.2, "Tasks": `wait(task, &result, &stats)`).
/// Fails with [`Error::NotJoinable`] if `task` was produced detached.
pub fn wait(task: &Task, result: &mut usize, stats: &mut TaskStats) -> Result<()> {
	if task.0.detached {
		return Err(Error::NotJoinable);
	}

	let wait_start_ns = crate::time::now_nanos();
	loop {
		if task.0.state.load(Ordering::Acquire) == DONE {
			break;
		}
		let me = percpu::scheduler().current();
		task.0.waiters.enqueue(me).ok();
		if percpu::scheduler().block_current() {
			percpu::scheduler().reschedule();
		}
	}
	let wait_end_ns = crate::time::now_nanos();

	*result = task.0.result.load(Ordering::Acquire);
	let enqueue_ns = task.0.enqueued_ns.load(Ordering::Acquire);
	let dequeue_ns = task.0.dequeued_ns.load(Ordering::Acquire);
	let complete_ns = task.0.completed_ns.load(Ordering::Acquire);
	*stats = TaskStats {
		size_ns: complete_ns.saturating_sub(enqueue_ns),
		enqueue_ns,
		dequeue_ns,
		complete_ns,
		wait_start_ns,
		wait_end_ns,
	};
	Ok(())
}
