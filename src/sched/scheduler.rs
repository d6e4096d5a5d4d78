//! Per-CPU scheduler: ready queue, blocking, and context switches.
//!
//! Structure follows the teacher's `scheduler::PerCoreScheduler`
//! (ready/blocked/finished queues, a `reschedule` that disables interrupts
//! for the swap, a global `WAITING_TASKS` map for joiners) with the async
//! executor and file-descriptor plumbing stripped out, since this kernel
//! has neither (spec §1, Non-goals).

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::arch::x86_64::percpu::CoreId;
use crate::arch::x86_64::switch::{self, InitialFrame};
use crate::config::DEFAULT_STACK_SIZE;
use crate::errno::{Error, Result};
use crate::sched::task::{
	allocate_thread_id, EntryFn, ForkResult, Priority, PriorityQueue, Thread, ThreadHandle,
	ThreadId, ThreadRef, ThreadStatus, IDLE_PRIO,
};
use crate::sync::spinlock::SpinlockIrqSave;
use crate::sync::waitqueue::WaitQueue;

static TASKS: SpinlockIrqSave<BTreeMap<ThreadId, ThreadRef>> =
	SpinlockIrqSave::new(BTreeMap::new());

/// Threads blocked on another thread's exit via [`PerCpuScheduler::join`].
static JOINERS: SpinlockIrqSave<HashMap<ThreadId, WaitQueue, RandomState>> =
	SpinlockIrqSave::new(HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)));

pub struct PerCpuScheduler {
	core_id: CoreId,
	current: ThreadId,
	idle: ThreadId,
	ready: PriorityQueue,
	finished: Vec<ThreadId>,
}

extern "C" fn thread_trampoline(func: u64, arg: u64) -> ! {
	let func: EntryFn = unsafe { core::mem::transmute::<u64, EntryFn>(func) };
	func(arg as usize);
}

extern "C" fn idle_trampoline(_: u64, _: u64) -> ! {
	loop {
		crate::arch::x86_64::irq::enable_and_wait();
	}
}

impl PerCpuScheduler {
	/// Builds the scheduler for one core, with its idle thread already
	/// created and selected as current.
	pub fn new(core_id: CoreId) -> Self {
		let idle_id = allocate_thread_id();
		let mut idle = Thread::new(idle_id, None, IDLE_PRIO, core_id, alloc::vec![0u8; DEFAULT_STACK_SIZE]);
		prepare_entry(&mut idle, idle_trampoline, 0, 0);
		idle.status = ThreadStatus::Running;
		TASKS
			.lock()
			.insert(idle_id, Arc::new(SpinlockIrqSave::new(idle)));

		Self {
			core_id,
			current: idle_id,
			idle: idle_id,
			ready: PriorityQueue::new(),
			finished: Vec::new(),
		}
	}

	pub fn current(&self) -> ThreadId {
		self.current
	}

	/// Creates a new thread pinned to this core (spec §4.2, "create"). Does
	/// not enqueue it; call [`PerCpuScheduler::run`] (or use
	/// [`PerCpuScheduler::start`] to do both at once).
	pub fn create(&mut self, func: EntryFn, arg: usize, priority: Priority, stack_size: usize, detached: bool) -> ThreadId {
		let id = allocate_thread_id();
		let mut thread = Thread::new(id, Some(self.current), priority, self.core_id, alloc::vec![0u8; stack_size]);
		thread.detached = detached;
		prepare_entry(&mut thread, thread_trampoline, func as usize as u64, arg as u64);
		TASKS.lock().insert(id, Arc::new(SpinlockIrqSave::new(thread)));
		if let Some(parent) = thread_ref(self.current) {
			parent.lock().children.push(id);
		}
		id
	}

	/// Enqueues a thread created by [`PerCpuScheduler::create`] onto its
	/// home core's ready queue (spec §4.2, "run").
	pub fn run(&mut self, id: ThreadId) -> Result<()> {
		let thread = thread_ref(id).ok_or(Error::BadParameter)?;
		let handle = thread.lock().handle();
		self.ready.push(handle);
		Ok(())
	}

	/// `create` followed immediately by `run` (spec §4.2, "start").
	pub fn start(&mut self, func: EntryFn, arg: usize, priority: Priority, stack_size: usize, detached: bool) -> ThreadId {
		let id = self.create(func, arg, priority, stack_size, detached);
		self.run(id).expect("just-created thread must exist");
		id
	}

	/// Parks the current thread as blocked. Caller is responsible for
	/// arranging a wakeup (typically by enqueuing on a [`WaitQueue`] before
	/// calling this), then invoking [`PerCpuScheduler::reschedule`] if this
	/// returns `true`.
	///
	/// Returns `false` without blocking if [`PerCpuScheduler::wake`] already
	/// ran against this thread since its last call into `block_current` —
	/// this closes the lost-wakeup race spec §4.3's
	/// `wait_queue_sleep_extended` warns about: a `check()`/enqueue/
	/// block-current sequence split across separate calls has a window
	/// where a concurrent `wake` can run in between and, finding the thread
	/// not yet `Blocked`, would otherwise have nothing to do. Here `wake`
	/// leaves a `wake_pending` marker behind instead, and this function
	/// consumes it atomically before committing to `Blocked`, so the
	/// wakeup is never silently dropped regardless of which side wins the
	/// race.
	pub fn block_current(&mut self) -> bool {
		let Some(thread) = thread_ref(self.current) else {
			return false;
		};
		let mut guard = thread.lock();
		if guard.wake_pending.swap(false, Ordering::AcqRel) {
			return false;
		}
		guard.status = ThreadStatus::Blocked;
		true
	}

	/// Moves a blocked thread back onto its core's ready queue. If the
	/// thread has not reached `Blocked` yet (it is still between its
	/// condition recheck and its call to [`PerCpuScheduler::block_current`]),
	/// records the wakeup as pending instead of dropping it; see
	/// `block_current`'s doc comment.
	pub fn wake(&mut self, id: ThreadId) {
		if let Some(thread) = thread_ref(id) {
			let mut guard = thread.lock();
			if guard.status == ThreadStatus::Blocked {
				guard.status = ThreadStatus::Ready;
				self.ready.push(guard.handle());
			} else if guard.status != ThreadStatus::Finished {
				guard.wake_pending.store(true, Ordering::Release);
			}
		}
	}

	/// Switches away from the current thread to the next ready one, or to
	/// idle if none is ready. Interrupts are disabled for the duration.
	pub fn reschedule(&mut self) {
		let was_enabled = crate::arch::x86_64::irq::nested_disable();

		let next = self.ready.pop().map(|h| h.id).unwrap_or(self.idle);
		if next == self.current {
			crate::arch::x86_64::irq::nested_enable(was_enabled);
			return;
		}

		let current_thread = thread_ref(self.current).expect("current thread missing");
		let next_thread = thread_ref(next).expect("next thread missing");

		{
			let mut guard = current_thread.lock();
			if guard.status == ThreadStatus::Running {
				guard.status = ThreadStatus::Ready;
				if guard.id != self.idle {
					self.ready.push(guard.handle());
				}
			}
		}
		next_thread.lock().status = ThreadStatus::Running;

		let (old_sp_slot, old_fpu_ptr): (*mut usize, *mut u8) = {
			let mut guard = current_thread.lock();
			(
				core::ptr::addr_of_mut!(guard.last_stack_pointer),
				guard.fpu.as_mut_ptr(),
			)
		};
		let (new_sp, new_fpu_ptr) = {
			let mut guard = next_thread.lock();
			(guard.last_stack_pointer, guard.fpu.as_mut_ptr() as *const u8)
		};

		self.current = next;
		self.reap_finished();

		unsafe {
			switch::switch(old_sp_slot, new_sp, old_fpu_ptr, new_fpu_ptr);
		}

		crate::arch::x86_64::irq::nested_enable(was_enabled);
	}

	/// Terminates the current thread (spec §4.2, "exit"): marks it
	/// finished, wakes every joiner, and reschedules. Never returns.
	pub fn exit(&mut self, code: usize) -> ! {
		let id = self.current;
		assert_ne!(id, self.idle, "attempted to exit the idle thread");

		if let Some(thread) = thread_ref(id) {
			let mut guard = thread.lock();
			guard.tls.run_destructors();
			guard.status = ThreadStatus::Finished;
			guard.mark_exited(code);
		}
		self.finished.push(id);

		if let Some(joiners) = JOINERS.lock().get(&id) {
			for waiter in joiners.wake_all() {
				self.wake(waiter);
			}
		}

		self.reschedule();
		unreachable!("exited thread was rescheduled back in")
	}

	/// Blocks the calling thread until `target` exits (spec §4.2, "join").
	/// Returns the target's exit code. Fails with [`Error::NotJoinable`] if
	/// `target` was created detached.
	pub fn join(&mut self, target: ThreadId) -> Result<usize> {
		let thread = thread_ref(target).ok_or(Error::BadParameter)?;
		if thread.lock().detached {
			return Err(Error::NotJoinable);
		}
		loop {
			{
				let guard = thread.lock();
				if guard.has_exited() {
					return Ok(guard.exit_code());
				}
			}
			{
				let mut joiners = JOINERS.lock();
				let queue = joiners.entry(target).or_insert_with(WaitQueue::new);
				queue.enqueue(self.current).ok();
			}
			if self.block_current() {
				self.reschedule();
			}
		}
	}

	/// Blocks until every child spawned by the current thread has exited
	/// (spec §4.2, "join_all_children").
	pub fn join_all_children(&mut self) -> Result<()> {
		let children = thread_ref(self.current)
			.map(|t| t.lock().children.clone())
			.unwrap_or_default();
		for child in children {
			self.join(child)?;
		}
		Ok(())
	}

	/// Duplicates the calling thread's live stack into a new thread (spec
	/// §4.2, "fork"). Returns [`ForkResult::Parent`] with the child's id to
	/// the parent; when the child is later scheduled for the first time,
	/// this same call returns [`ForkResult::Child`] to it instead.
	///
	/// The duplicated bytes include every caller frame on the live stack,
	/// not just a fresh trampoline frame, so any saved frame pointer within
	/// them is patched by the (child base − parent base) delta — the
	/// "architecture-specific contract" spec §4.2 calls out: without this,
	/// an `rbp` chain copied byte-for-byte would still point into the
	/// parent's stack.
	///
	/// Must not be inlined: [`switch::capture_frame`] snapshots the call
	/// frame immediately below this function's own, so that frame has to
	/// stay `fork`'s and not get merged into a caller's.
	#[inline(never)]
	pub fn fork(&mut self) -> ForkResult {
		let parent_id = self.current;
		let parent_thread = thread_ref(parent_id).expect("current thread missing");

		let mut captured_rsp: usize = 0;
		unsafe {
			switch::capture_frame(core::ptr::addr_of_mut!(captured_rsp));
		}

		// Both the parent (falling through right here, synchronously) and
		// the child (resumed much later by `reschedule`, landing at this
		// exact program point inside its copy of this same stack frame)
		// continue from here. `parent_id` above was captured before the
		// snapshot and so is identical in both copies; `self.current` is
		// not part of the snapshot; it is `reschedule`'s live state, and
		// `reschedule` always sets it to the thread it is about to resume
		// before switching to it. So the parent sees `self.current ==
		// parent_id` and falls through to create the child below; the
		// child, once actually scheduled, sees its own id there instead and
		// returns immediately.
		if self.current != parent_id {
			return ForkResult::Child;
		}

		let (stack_len, parent_base, priority, detached, fpu) = {
			let guard = parent_thread.lock();
			(
				guard.stack.len(),
				guard.stack.as_ptr() as usize,
				guard.priority,
				guard.detached,
				guard.fpu.clone(),
			)
		};
		let parent_top = parent_base + stack_len;
		let used = parent_top.saturating_sub(captured_rsp);
		assert!(used <= stack_len, "fork: captured stack pointer outside thread stack");

		let child_id = allocate_thread_id();
		let mut child = Thread::new(child_id, Some(parent_id), priority, self.core_id, alloc::vec![0u8; stack_len]);
		child.detached = detached;
		child.fpu = fpu;
		let child_base = child.stack.as_ptr() as usize;
		let child_top = child_base + stack_len;
		let child_rsp = child_top - used;

		unsafe {
			core::ptr::copy_nonoverlapping(
				captured_rsp as *const u8,
				child.stack.as_mut_ptr().add(stack_len - used),
				used,
			);
		}

		let delta = child_base as isize - parent_base as isize;
		patch_stack_internal_pointers(&mut child.stack[stack_len - used..], parent_base, parent_top, delta);

		child.last_stack_pointer = child_rsp;
		TASKS.lock().insert(child_id, Arc::new(SpinlockIrqSave::new(child)));
		parent_thread.lock().children.push(child_id);
		self.ready.push(ThreadHandle { id: child_id, priority, core_id: self.core_id });

		ForkResult::Parent(child_id)
	}

	fn reap_finished(&mut self) {
		let mut tasks = TASKS.lock();
		for id in self.finished.drain(..) {
			tasks.remove(&id);
		}
	}
}

/// Rewrites every 8-byte-aligned word in `region` that falls inside
/// `[parent_base, parent_top)` by `delta`, in place. `region` is the part of
/// a freshly copied child stack that used to be live parent stack; scanning
/// every aligned offset rather than walking a real `rbp` chain is a blunt
/// instrument, but it's a safe one — any word that happens to look like a
/// parent-stack address either was a frame-pointer-chain link (and needed
/// patching) or was scalar data that happened to alias an address in that
/// range, in which case it wasn't going to be dereferenced as a pointer by
/// the copy anyway.
fn patch_stack_internal_pointers(region: &mut [u8], parent_base: usize, parent_top: usize, delta: isize) {
	let mut offset = 0;
	while offset + core::mem::size_of::<usize>() <= region.len() {
		let bytes: [u8; core::mem::size_of::<usize>()] =
			region[offset..offset + core::mem::size_of::<usize>()].try_into().unwrap();
		let word = usize::from_ne_bytes(bytes);
		if word >= parent_base && word < parent_top {
			let patched = (word as isize + delta) as usize;
			region[offset..offset + core::mem::size_of::<usize>()].copy_from_slice(&patched.to_ne_bytes());
		}
		offset += core::mem::size_of::<usize>();
	}
}

fn prepare_entry(thread: &mut Thread, trampoline: extern "C" fn(u64, u64) -> !, arg0: u64, arg1: u64) {
	let frame = InitialFrame::new(trampoline, arg0, arg1);
	let frame_size = core::mem::size_of::<InitialFrame>();
	let top = thread.stack.len() - frame_size;
	unsafe {
		core::ptr::write(thread.stack.as_mut_ptr().add(top) as *mut InitialFrame, frame);
	}
	thread.last_stack_pointer = thread.stack.as_ptr() as usize + top;
}

pub(crate) fn thread_ref(id: ThreadId) -> Option<ThreadRef> {
	TASKS.lock().get(&id).cloned()
}

/// Wakes `id` on whichever CPU it's pinned to, cross-calling there if that
/// isn't the current CPU (spec §5, "Shared-resource discipline": "each
/// CPU's runqueue is mutated only by that CPU, except for `wake_*` from
/// another CPU, which inserts under the remote runqueue's lock" — the
/// cross-call IPI *is* that remote-lock insertion, since a `PerCpuScheduler`
/// is itself only ever touched by the core that owns it).
pub fn wake_thread(id: ThreadId) {
	let Some(thread) = thread_ref(id) else { return };
	let home = thread.lock().core_id;
	if home == crate::arch::x86_64::percpu::core_id() {
		crate::arch::x86_64::percpu::scheduler().wake(id);
	} else {
		crate::arch::x86_64::ipi::run_on(home, move || {
			crate::arch::x86_64::percpu::scheduler().wake(id);
		});
	}
}

/// Sets `id`'s 32-char name field (spec §3). Purely descriptive: nothing in
/// the scheduler itself reads it back, it exists for diagnostics and for
/// whatever console collaborator renders a thread listing.
pub fn rename(id: ThreadId, name: &str) -> Result<()> {
	let thread = thread_ref(id).ok_or(Error::BadParameter)?;
	thread.lock().set_name(name);
	Ok(())
}

/// Reads `id`'s current scheduling priority, for callers that need to save
/// it before attempting a [`change_constraints`] they might have to roll
/// back (spec §4.3 group scheduling's "get old constraints in case we need
/// to roll back to them").
pub fn priority_of(id: ThreadId) -> Result<Priority> {
	let thread = thread_ref(id).ok_or(Error::BadParameter)?;
	Ok(thread.lock().priority)
}

/// Updates `id`'s scheduling priority in place (spec §4.3 group scheduling's
/// per-thread `change_constraints` — this scheduler's only constraint is
/// priority, so that's the whole of what there is to change). Fails with
/// [`Error::BadParameter`] for a priority outside `0..NO_PRIORITIES`.
///
/// Only the thread record itself is touched, not any runqueue: a thread
/// already sitting in its home CPU's bitmap-indexed ready queue keeps its
/// old priority's queue slot until the next time it's scheduled in or out,
/// at which point it's re-inserted under the new one.
pub fn change_constraints(id: ThreadId, priority: Priority) -> Result<()> {
	if priority.into() as usize >= crate::config::NO_PRIORITIES {
		return Err(Error::BadParameter);
	}
	let thread = thread_ref(id).ok_or(Error::BadParameter)?;
	thread.lock().priority = priority;
	Ok(())
}

/// Destroys a finished thread's record immediately rather than waiting for
/// the next reschedule to reap it (spec §4.2, "destroy"). Only valid once
/// the thread has exited and every joiner has observed it.
pub fn destroy(id: ThreadId) -> Result<()> {
	let thread = thread_ref(id).ok_or(Error::BadParameter)?;
	if !thread.lock().has_exited() {
		return Err(Error::Busy);
	}
	TASKS.lock().remove(&id);
	Ok(())
}
