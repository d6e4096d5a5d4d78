//! Thread identity, priority, and the fixed-priority ready queue.
//!
//! `ThreadId`/`Priority`/`msb`-indexed bitmap queue are carried over from
//! the teacher's `scheduler::task` almost unchanged; `Thread` itself is
//! reshaped around spec §4.2's explicit lifecycle (create/run/start/fork/
//! exit/join/destroy) instead of the teacher's `Rc<RefCell<Task>>` executor
//! model, since this kernel has no async executor to cooperate with.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::{NonZeroU64, NonZeroUsize};
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use core::{cmp, fmt};

use crate::arch::x86_64::percpu::CoreId;
use crate::config::NO_PRIORITIES;
use crate::errno::{Error, Result};
use crate::sched::tls::ThreadLocalStorage;

/// Unique, non-reusable identifier for a thread.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ThreadId(pub(crate) NonZeroUsize);

impl ThreadId {
	pub fn new(raw: usize) -> Option<Self> {
		NonZeroUsize::new(raw).map(Self)
	}

	pub fn get(self) -> usize {
		self.0.get()
	}
}

impl fmt::Debug for ThreadId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ThreadId({})", self.0)
	}
}

impl fmt::Display for ThreadId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn allocate_thread_id() -> ThreadId {
	ThreadId(NonZeroUsize::new(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)).unwrap())
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Priority(u8);

impl Priority {
	pub const fn from(value: u8) -> Self {
		Self(value)
	}

	pub const fn into(self) -> u8 {
		self.0
	}
}

pub const IDLE_PRIO: Priority = Priority::from(0);
pub const LOW_PRIO: Priority = Priority::from(1);
pub const NORMAL_PRIO: Priority = Priority::from(2);
pub const HIGH_PRIO: Priority = Priority::from(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadStatus {
	Ready,
	Running,
	Blocked,
	Finished,
	Idle,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ThreadHandle {
	pub id: ThreadId,
	pub priority: Priority,
	pub core_id: CoreId,
}

impl PartialEq for ThreadHandle {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}
impl Eq for ThreadHandle {}

/// Bitmap-indexed priority queue: finding the highest nonempty priority is
/// one `u64::leading_zeros` rather than a scan, same trick as the teacher's
/// `TaskHandlePriorityQueue`.
pub(crate) struct PriorityQueue {
	queues: [VecDeque<ThreadHandle>; NO_PRIORITIES],
	bitmap: u64,
}

fn msb(n: u64) -> Option<u32> {
	NonZeroU64::new(n).map(|n| u64::BITS - 1 - n.leading_zeros())
}

impl PriorityQueue {
	pub const fn new() -> Self {
		const EMPTY: VecDeque<ThreadHandle> = VecDeque::new();
		Self {
			queues: [EMPTY; NO_PRIORITIES],
			bitmap: 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.bitmap == 0
	}

	pub fn push(&mut self, handle: ThreadHandle) {
		let i = handle.priority.into() as usize;
		self.bitmap |= 1 << i;
		self.queues[i].push_back(handle);
	}

	fn pop_from(&mut self, i: usize) -> Option<ThreadHandle> {
		let handle = self.queues[i].pop_front();
		if self.queues[i].is_empty() {
			self.bitmap &= !(1 << i);
		}
		handle
	}

	pub fn pop(&mut self) -> Option<ThreadHandle> {
		msb(self.bitmap).and_then(|i| self.pop_from(i as usize))
	}

	/// Pops only if the head priority is >= `prio`; used when preempting
	/// the current thread only for something at least as important.
	pub fn pop_with_prio(&mut self, prio: Priority) -> Option<ThreadHandle> {
		let i = msb(self.bitmap)?;
		(i >= u32::from(prio.into())).then(|| self.pop_from(i as usize)).flatten()
	}

	pub fn remove(&mut self, id: ThreadId) -> bool {
		for (i, queue) in self.queues.iter_mut().enumerate() {
			let before = queue.len();
			queue.retain(|h| h.id != id);
			if queue.len() != before {
				if queue.is_empty() {
					self.bitmap &= !(1 << i);
				}
				return true;
			}
		}
		false
	}

	pub fn highest_priority(&self) -> Priority {
		msb(self.bitmap).map_or(IDLE_PRIO, |i| Priority::from(i as u8))
	}
}

pub type EntryFn = extern "C" fn(usize) -> !;

/// Outcome of [`crate::sched::scheduler::PerCpuScheduler::fork`]: the parent
/// sees the child's id, the child sees nothing to identify itself by (spec
/// §4.2 phrases this as "the child returns from fork with 0"; `ThreadId` has
/// no zero value, so the two outcomes are a proper sum type here instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
	Parent(ThreadId),
	Child,
}

/// Legacy SSE/x87 FPU/MMX register image, the exact byte layout `fxsave`/
/// `fxrstor` read and write (spec §3: "512-byte FPU save area (16-byte
/// aligned)"). Saved/restored around every context switch by
/// [`crate::arch::x86_64::switch::switch`].
#[repr(C, align(16))]
#[derive(Clone)]
pub struct FpuState([u8; 512]);

impl FpuState {
	/// The image `fninit`/`ldmxcsr` leave the hardware in: control word
	/// 0x037F, tag word empty, MXCSR 0x1F80 (mask all FPU exceptions, no
	/// denormals-are-zero) — mirrors `original_source/src/nautilus/fpu.c`'s
	/// `enable_x87`/`enable_sse`. A thread that has never executed an FP
	/// instruction restores into this state rather than an all-zero image,
	/// whose zero control word would leave every FPU exception unmasked.
	pub fn new() -> Self {
		let mut image = [0u8; 512];
		image[0..2].copy_from_slice(&0x037Fu16.to_ne_bytes()); // FCW
		image[24..28].copy_from_slice(&0x0000_1F80u32.to_ne_bytes()); // MXCSR
		Self(image)
	}

	pub fn as_ptr(&self) -> *const u8 {
		self.0.as_ptr()
	}

	pub fn as_mut_ptr(&mut self) -> *mut u8 {
		self.0.as_mut_ptr()
	}
}

impl Default for FpuState {
	fn default() -> Self {
		Self::new()
	}
}

/// A kernel thread's control block (spec §4.2).
pub struct Thread {
	pub id: ThreadId,
	pub parent: Option<ThreadId>,
	pub priority: Priority,
	pub(crate) status: ThreadStatus,
	pub core_id: CoreId,
	pub stack: Vec<u8>,
	pub last_stack_pointer: usize,
	pub tls: ThreadLocalStorage,
	pub children: Vec<ThreadId>,
	pub detached: bool,
	pub fpu: FpuState,
	name: [u8; 32],
	/// Opaque handle to the thread's virtual console, interpreted only by
	/// the external console collaborator (spec §1, Non-goals); `None` means
	/// "use the default console".
	pub vc: Option<NonZeroUsize>,
	/// Number of wait queues this thread currently occupies a slot on
	/// (spec §5: `t.num_wait >= 1` while `t` is on any wait queue).
	pub(crate) num_wait: AtomicUsize,
	/// Set by [`crate::sched::scheduler::PerCpuScheduler::wake`] when a
	/// wakeup races a concurrent recheck-then-block sequence on this thread
	/// (spec §4.3, `wait_queue_sleep_extended`'s "recheck before sleeping to
	/// avoid lost wake-ups"); consumed by
	/// [`crate::sched::scheduler::PerCpuScheduler::block_current`].
	pub(crate) wake_pending: AtomicBool,
	exit_code: AtomicUsize,
	has_exited: core::sync::atomic::AtomicBool,
}

impl Thread {
	pub(crate) fn new(
		id: ThreadId,
		parent: Option<ThreadId>,
		priority: Priority,
		core_id: CoreId,
		stack: Vec<u8>,
	) -> Self {
		Self {
			id,
			parent,
			priority,
			status: ThreadStatus::Ready,
			core_id,
			stack,
			last_stack_pointer: 0,
			tls: ThreadLocalStorage::new(),
			children: Vec::new(),
			detached: false,
			fpu: FpuState::new(),
			name: default_name(id),
			vc: None,
			num_wait: AtomicUsize::new(0),
			wake_pending: AtomicBool::new(false),
			exit_code: AtomicUsize::new(0),
			has_exited: core::sync::atomic::AtomicBool::new(false),
		}
	}

	pub fn handle(&self) -> ThreadHandle {
		ThreadHandle {
			id: self.id,
			priority: self.priority,
			core_id: self.core_id,
		}
	}

	pub(crate) fn mark_exited(&self, code: usize) {
		self.exit_code.store(code, Ordering::Release);
		self.has_exited.store(true, Ordering::Release);
	}

	pub fn has_exited(&self) -> bool {
		self.has_exited.load(Ordering::Acquire)
	}

	pub fn exit_code(&self) -> usize {
		self.exit_code.load(Ordering::Acquire)
	}

	/// The thread's name, truncated to the first valid UTF-8 prefix that
	/// fits (spec §3: "32-char name"). Never empty: defaults to `thread-<id>`.
	pub fn name(&self) -> &str {
		let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		core::str::from_utf8(&self.name[..len]).unwrap_or("?")
	}

	pub fn set_name(&mut self, name: &str) {
		self.name = [0u8; 32];
		let bytes = name.as_bytes();
		let len = cmp::min(bytes.len(), self.name.len());
		self.name[..len].copy_from_slice(&bytes[..len]);
	}

	/// Number of wait queues this thread is currently enqueued on.
	pub fn num_wait(&self) -> usize {
		self.num_wait.load(Ordering::Acquire)
	}
}

fn default_name(id: ThreadId) -> [u8; 32] {
	use core::fmt::Write;
	let mut buf = FixedBuf::default();
	let _ = write!(buf, "thread-{id}");
	buf.bytes
}

/// Tiny fixed-capacity `fmt::Write` sink used only to render a thread's
/// default name without allocating.
#[derive(Default)]
struct FixedBuf {
	bytes: [u8; 32],
	len: usize,
}

impl fmt::Write for FixedBuf {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		let room = self.bytes.len() - self.len;
		let take = cmp::min(room, s.len());
		self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
		self.len += take;
		Ok(())
	}
}

pub(crate) type ThreadRef = Arc<crate::sync::spinlock::SpinlockIrqSave<Thread>>;

#[cfg(test)]
mod tests {
	use super::*;

	fn handle(id: usize, prio: u8) -> ThreadHandle {
		ThreadHandle {
			id: ThreadId::new(id).unwrap(),
			priority: Priority::from(prio),
			core_id: 0,
		}
	}

	#[test]
	fn pops_highest_priority_first() {
		let mut q = PriorityQueue::new();
		q.push(handle(1, 1));
		q.push(handle(2, 3));
		q.push(handle(3, 2));
		assert_eq!(q.pop().unwrap().id, ThreadId::new(2).unwrap());
		assert_eq!(q.pop().unwrap().id, ThreadId::new(3).unwrap());
		assert_eq!(q.pop().unwrap().id, ThreadId::new(1).unwrap());
		assert!(q.is_empty());
	}

	#[test]
	fn fifo_within_same_priority() {
		let mut q = PriorityQueue::new();
		q.push(handle(10, 2));
		q.push(handle(11, 2));
		assert_eq!(q.pop().unwrap().id, ThreadId::new(10).unwrap());
		assert_eq!(q.pop().unwrap().id, ThreadId::new(11).unwrap());
	}

	#[test]
	fn remove_clears_bitmap_bit_when_last() {
		let mut q = PriorityQueue::new();
		q.push(handle(1, 2));
		assert!(q.remove(ThreadId::new(1).unwrap()));
		assert!(q.is_empty());
	}

	#[test]
	fn pop_with_prio_respects_threshold() {
		let mut q = PriorityQueue::new();
		q.push(handle(1, 1));
		assert!(q.pop_with_prio(Priority::from(2)).is_none());
		assert!(q.pop_with_prio(Priority::from(1)).is_some());
	}
}
