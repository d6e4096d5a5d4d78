//! Wait queues that let one thread block on several conditions at once.
//!
//! Grounded on the original Nautilus `nk_wait_queue`: a bounded array of
//! slots is reserved lock-free with compare-and-swap (so enqueueing never
//! allocates and never fails under `config::WAIT_QUEUE_CAPACITY` waiters),
//! and the FIFO order itself is protected by the queue's own
//! `SpinlockIrqSave` the same way the original serializes its `list` under
//! `spinlock_t lock`. The original's raw intrusive `list_head` linkage is
//! expressed here as a `VecDeque` of slot indices — same O(1) enqueue/
//! dequeue, without hand-rolling pointer links in safe Rust.

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::WAIT_QUEUE_CAPACITY;
use crate::errno::{Error, Result};
use crate::sched::task::ThreadId;
use crate::sync::spinlock::SpinlockIrqSave;

const FREE: usize = 0;

struct Slot {
	thread: AtomicUsize,
}

/// Adjusts `tid`'s wait-queue membership counter by `delta` (spec §5: `t.num_wait`
/// tracks how many wait queues a thread is currently enqueued on). A no-op if
/// the thread has already been reaped.
fn bump_num_wait(tid: ThreadId, delta: i64) {
	let Some(thread) = crate::sched::scheduler::thread_ref(tid) else {
		return;
	};
	let guard = thread.lock();
	if delta > 0 {
		guard.num_wait.fetch_add(delta as usize, Ordering::AcqRel);
	} else {
		guard.num_wait.fetch_sub((-delta) as usize, Ordering::AcqRel);
	}
}

pub struct WaitQueue {
	slots: [Slot; WAIT_QUEUE_CAPACITY],
	order: SpinlockIrqSave<VecDeque<usize>>,
}

impl WaitQueue {
	pub const fn new() -> Self {
		const FREE_SLOT: Slot = Slot { thread: AtomicUsize::new(FREE) };
		Self {
			slots: [FREE_SLOT; WAIT_QUEUE_CAPACITY],
			order: SpinlockIrqSave::new(VecDeque::new()),
		}
	}

	/// Reserves a slot for `tid` and appends it to the wait order. Returns
	/// [`Error::Busy`] if the queue is already at `WAIT_QUEUE_CAPACITY`
	/// waiters, mirroring the original's "should never happen" bound — a
	/// caller hitting it has a sizing bug, not a transient condition.
	pub fn enqueue(&self, tid: ThreadId) -> Result<()> {
		let raw = tid.0.get();
		for (index, slot) in self.slots.iter().enumerate() {
			if slot
				.thread
				.compare_exchange(FREE, raw, Ordering::AcqRel, Ordering::Relaxed)
				.is_ok()
			{
				self.order.lock().push_back(index);
				bump_num_wait(tid, 1);
				return Ok(());
			}
		}
		Err(Error::Busy)
	}

	/// Removes `tid` from the queue if present, whether or not it has been
	/// woken yet. Used when a thread blocked on several queues at once is
	/// woken by one of them and must be retracted from the others.
	pub fn remove(&self, tid: ThreadId) {
		let raw = tid.0.get();
		let mut order = self.order.lock();
		let mut removed = false;
		order.retain(|&index| {
			let slot = &self.slots[index];
			if slot.thread.load(Ordering::Acquire) == raw {
				slot.thread.store(FREE, Ordering::Release);
				removed = true;
				false
			} else {
				true
			}
		});
		drop(order);
		if removed {
			bump_num_wait(tid, -1);
		}
	}

	/// Wakes and removes the longest-waiting thread, if any.
	pub fn wake_one(&self) -> Option<ThreadId> {
		let mut order = self.order.lock();
		while let Some(index) = order.pop_front() {
			let slot = &self.slots[index];
			let raw = slot.thread.swap(FREE, Ordering::AcqRel);
			if let Some(tid) = ThreadId::new(raw) {
				drop(order);
				bump_num_wait(tid, -1);
				return Some(tid);
			}
		}
		None
	}

	/// Wakes and removes every waiting thread, in wait order.
	pub fn wake_all(&self) -> alloc::vec::Vec<ThreadId> {
		let mut order = self.order.lock();
		let mut woken = alloc::vec::Vec::with_capacity(order.len());
		while let Some(index) = order.pop_front() {
			let slot = &self.slots[index];
			let raw = slot.thread.swap(FREE, Ordering::AcqRel);
			if let Some(tid) = ThreadId::new(raw) {
				woken.push(tid);
			}
		}
		drop(order);
		for &tid in &woken {
			bump_num_wait(tid, -1);
		}
		woken
	}

	pub fn is_empty(&self) -> bool {
		self.order.lock().is_empty()
	}

	pub fn len(&self) -> usize {
		self.order.lock().len()
	}
}

impl Default for WaitQueue {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl Sync for WaitQueue {}

#[cfg(test)]
mod tests {
	use super::*;

	fn tid(n: usize) -> ThreadId {
		ThreadId::new(n).unwrap()
	}

	#[test]
	fn fifo_wakeup_order() {
		let wq = WaitQueue::new();
		wq.enqueue(tid(1)).unwrap();
		wq.enqueue(tid(2)).unwrap();
		wq.enqueue(tid(3)).unwrap();
		assert_eq!(wq.wake_one(), Some(tid(1)));
		assert_eq!(wq.wake_one(), Some(tid(2)));
		assert_eq!(wq.wake_one(), Some(tid(3)));
		assert_eq!(wq.wake_one(), None);
	}

	#[test]
	fn remove_before_wakeup() {
		let wq = WaitQueue::new();
		wq.enqueue(tid(1)).unwrap();
		wq.enqueue(tid(2)).unwrap();
		wq.remove(tid(1));
		assert_eq!(wq.wake_one(), Some(tid(2)));
		assert!(wq.is_empty());
	}

	#[test]
	fn capacity_exhaustion_reports_busy() {
		let wq = WaitQueue::new();
		for i in 1..=WAIT_QUEUE_CAPACITY {
			wq.enqueue(tid(i)).unwrap();
		}
		assert_eq!(wq.enqueue(tid(WAIT_QUEUE_CAPACITY + 1)), Err(Error::Busy));
	}

	#[test]
	fn wake_all_drains_in_order() {
		let wq = WaitQueue::new();
		wq.enqueue(tid(5)).unwrap();
		wq.enqueue(tid(6)).unwrap();
		assert_eq!(wq.wake_all(), alloc::vec![tid(5), tid(6)]);
		assert!(wq.is_empty());
	}
}
