//! Condition variables with the sequence-counter protocol needed to close
//! the lost-wakeup and stolen-wakeup races (spec §4.3).
//!
//! Translated directly from the original `nk_condvar_wait`/`signal`/`bcast`
//! in `nautilus/condvar.c`: the four counters (`main_seq`, `wakeup_seq`,
//! `woken_seq`, `bcast_seq`) and the exact loop condition in `wait` are kept
//! as-is; `NK_LOCK`/`NK_UNLOCK` on the inner lock become
//! [`crate::sync::spinlock::SpinlockIrqSave`], and `nk_wait_queue_sleep`
//! becomes the usual enqueue-then-block-then-reschedule sequence used by
//! every other blocking primitive in this kernel.

use crate::arch::x86_64::percpu;
use crate::sched::scheduler::wake_thread;
use crate::sync::spinlock::{SpinlockIrqSave, SpinlockIrqSaveGuard};
use crate::sync::waitqueue::WaitQueue;

struct Inner {
	nwaiters: u64,
	main_seq: u64,
	wakeup_seq: u64,
	woken_seq: u64,
	bcast_seq: u64,
}

pub struct CondVar {
	inner: SpinlockIrqSave<Inner>,
	queue: WaitQueue,
}

impl CondVar {
	pub const fn new() -> Self {
		Self {
			inner: SpinlockIrqSave::new(Inner {
				nwaiters: 0,
				main_seq: 0,
				wakeup_seq: 0,
				woken_seq: 0,
				bcast_seq: 0,
			}),
			queue: WaitQueue::new(),
		}
	}

	/// Atomically releases `guard`'s lock and sleeps until woken by
	/// [`CondVar::signal`] or [`CondVar::broadcast`], then reacquires it.
	///
	/// Follows the original five-step protocol: snapshot `bcast_seq` and
	/// `wakeup_seq` before sleeping, loop re-sleeping while neither has
	/// moved since the snapshot, stop immediately if `bcast_seq` moved.
	pub fn wait<'a, T>(
		&self,
		lock: &'a SpinlockIrqSave<T>,
		guard: SpinlockIrqSaveGuard<'a, T>,
	) -> SpinlockIrqSaveGuard<'a, T> {
		let mut inner = self.inner.lock();
		drop(guard);

		inner.nwaiters += 1;
		inner.main_seq += 1;
		let bc = inner.bcast_seq;
		let seq = inner.wakeup_seq;
		drop(inner);

		let mut woke_via_signal = false;
		loop {
			let me = percpu::scheduler().current();
			self.queue.enqueue(me).ok();
			if percpu::scheduler().block_current() {
				percpu::scheduler().reschedule();
			}

			let inner = self.inner.lock();
			if bc != inner.bcast_seq {
				break;
			}
			let val = inner.wakeup_seq;
			let woken = inner.woken_seq;
			drop(inner);
			if val != seq && val != woken {
				woke_via_signal = true;
				break;
			}
		}

		let mut inner = self.inner.lock();
		if woke_via_signal {
			inner.woken_seq += 1;
		}
		inner.nwaiters -= 1;
		drop(inner);

		lock.lock()
	}

	/// Wakes at most one waiter, if any are waiting.
	pub fn signal(&self) {
		let mut inner = self.inner.lock();
		if inner.main_seq > inner.wakeup_seq {
			inner.wakeup_seq += 1;
			drop(inner);
			if let Some(waiter) = self.queue.wake_one() {
				wake_thread(waiter);
			}
		}
	}

	/// Wakes every current waiter.
	pub fn broadcast(&self) {
		let mut inner = self.inner.lock();
		if inner.main_seq > inner.wakeup_seq {
			inner.woken_seq = inner.main_seq;
			inner.wakeup_seq = inner.main_seq;
			inner.bcast_seq += 1;
			drop(inner);
			for waiter in self.queue.wake_all() {
				wake_thread(waiter);
			}
		}
	}

	/// Number of threads currently parked in [`CondVar::wait`].
	pub fn waiter_count(&self) -> u64 {
		self.inner.lock().nwaiters
	}
}

impl Default for CondVar {
	fn default() -> Self {
		Self::new()
	}
}
