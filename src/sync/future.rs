//! Single-result futures: a tri-state FREE/IN_PROGRESS/DONE slot with a
//! pool allocator in front of it (spec §4.3).
//!
//! Grounded on `nautilus/future.c`/`future.h`. The original stores an
//! untyped `void *result`; this keeps the same pointer-sized-payload shape
//! (`usize`) rather than making the type generic, since the point of the
//! pool is that any future can be recycled for any later use regardless of
//! what it once held. `nk_future_wait_block`'s `cond_check` callback plus
//! `nk_wait_queue_sleep_extended` becomes the same enqueue-then-block-then-
//! reschedule loop every other blocking primitive in this kernel uses.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::config::MAX_CPUS;
use crate::errno::{Error, Result};
use crate::sched::scheduler::wake_thread;
use crate::sync::spinlock::SpinlockIrqSave;
use crate::sync::waitqueue::WaitQueue;

const FREE: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

struct Inner {
	state: AtomicU8,
	result: AtomicUsize,
	waitqueue: WaitQueue,
}

impl Inner {
	fn new() -> Self {
		Self {
			state: AtomicU8::new(IN_PROGRESS),
			result: AtomicUsize::new(0),
			waitqueue: WaitQueue::new(),
		}
	}
}

/// Whether a future is still pending or has a result ready, per
/// [`Future::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
	Done(usize),
	InProgress,
}

/// How [`Future::wait`] should block while the future is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
	Spin,
	Block,
}

/// A handle to a pooled future slot (`nk_future_t *` in the original).
/// Cloning shares the same slot; the slot is returned to the pool only by
/// [`Future::free`].
#[derive(Clone)]
pub struct Future(Arc<Inner>);

static POOL: SpinlockIrqSave<Vec<Arc<Inner>>> = SpinlockIrqSave::new(Vec::new());
static SEEDED: AtomicBool = AtomicBool::new(false);

fn ensure_seeded() {
	if SEEDED.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
		let mut pool = POOL.lock();
		for _ in 0..MAX_CPUS {
			pool.push(Arc::new(Inner::new()));
		}
	}
}

/// Takes a slot from the pool, growing it if empty. The pool never shrinks
/// (matching the original's comment to the same effect in `nk_future_free`).
pub fn alloc() -> Future {
	ensure_seeded();
	let mut pool = POOL.lock();
	match pool.pop() {
		Some(inner) => {
			inner.state.store(IN_PROGRESS, Ordering::Release);
			Future(inner)
		}
		None => Future(Arc::new(Inner::new())),
	}
}

impl Future {
	/// Resets an already-allocated future for another round without going
	/// through the pool. Caller must ensure no one is still waiting on it.
	pub fn recycle(&self) {
		self.0.result.store(0, Ordering::Release);
		self.0.state.store(IN_PROGRESS, Ordering::Release);
	}

	/// Non-blocking check. Fails with [`Error::BadParameter`] if the future
	/// is currently free (checking a future no one allocated is a caller
	/// bug, not a transient condition).
	pub fn check(&self) -> Result<Poll> {
		match self.0.state.load(Ordering::Acquire) {
			DONE => Ok(Poll::Done(self.0.result.load(Ordering::Acquire))),
			IN_PROGRESS => Ok(Poll::InProgress),
			_ => Err(Error::BadParameter),
		}
	}

	/// Publishes `result` and wakes every blocked waiter.
	pub fn finish(&self, result: usize) {
		self.0.result.store(result, Ordering::Release);
		self.0.state.store(DONE, Ordering::Release);
		for waiter in self.0.waitqueue.wake_all() {
			wake_thread(waiter);
		}
	}

	/// Waits for [`Future::finish`], either by busy-spinning on `check` or
	/// by blocking on the scheduler, per `mode`.
	pub fn wait(&self, mode: WaitMode) -> Result<usize> {
		match mode {
			WaitMode::Spin => loop {
				match self.check()? {
					Poll::Done(result) => return Ok(result),
					Poll::InProgress => core::hint::spin_loop(),
				}
			},
			WaitMode::Block => loop {
				match self.check()? {
					Poll::Done(result) => return Ok(result),
					Poll::InProgress => {
						let me = crate::arch::x86_64::percpu::scheduler().current();
						self.0.waitqueue.enqueue(me).ok();
						if crate::arch::x86_64::percpu::scheduler().block_current() {
							crate::arch::x86_64::percpu::scheduler().reschedule();
						}
					}
				}
			},
		}
	}

	/// Marks the slot free and returns it to the pool for reuse.
	pub fn free(self) {
		self.0.result.store(0, Ordering::Release);
		self.0.state.store(FREE, Ordering::Release);
		POOL.lock().push(self.0);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn check_reports_in_progress_then_done() {
		let f = alloc();
		assert_eq!(f.check(), Ok(Poll::InProgress));
		f.finish(42);
		assert_eq!(f.check(), Ok(Poll::Done(42)));
	}

	#[test]
	fn spin_wait_observes_finish() {
		let f = alloc();
		f.finish(7);
		assert_eq!(f.wait(WaitMode::Spin), Ok(7));
	}

	#[test]
	fn recycle_resets_state() {
		let f = alloc();
		f.finish(1);
		f.recycle();
		assert_eq!(f.check(), Ok(Poll::InProgress));
	}
}
