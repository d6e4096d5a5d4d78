//! Thread barriers and the CPU-wide stop-the-world barrier (spec §4.3).
//!
//! Grounded on `nautilus/barrier.c`. The thread barrier (`nk_barrier_*`)
//! keeps its decrement-then-spin-then-increment shape; the original mixes a
//! held spinlock with a couple of bare atomic increments on the "release"
//! side, which is not expressible soundly with
//! [`crate::sync::spinlock::SpinlockIrqSave`]'s API, so the release side
//! here just takes the lock again instead — same outcome, one more lock
//! acquisition per waiter.
//!
//! The core barrier (`nk_core_barrier_*`) is a different, single
//! system-wide instance: an orchestrator core raises it and cross-calls
//! every other online core to make it call [`arrive`], which can't block on
//! the scheduler since it runs from the cross-call interrupt handler, so it
//! busy-spins on a shared flag instead, exactly like the original's
//! `nk_yield()` loop.

use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use crate::arch::x86_64::ipi;
use crate::arch::x86_64::percpu;
use crate::errno::{Error, Result};
use crate::sync::spinlock::SpinlockIrqSave;

struct BarrierState {
	init_count: u32,
	remaining: u32,
	notify: bool,
}

/// A reusable barrier for an arbitrary group of threads (`nk_barrier_t`).
pub struct Barrier {
	state: SpinlockIrqSave<BarrierState>,
}

impl Barrier {
	/// Fails with [`Error::BadParameter`] for `count == 0`, matching
	/// `nk_barrier_init`'s `-EINVAL`.
	pub fn new(count: u32) -> Result<Self> {
		if count == 0 {
			return Err(Error::BadParameter);
		}
		Ok(Self {
			state: SpinlockIrqSave::new(BarrierState {
				init_count: count,
				remaining: count,
				notify: false,
			}),
		})
	}

	/// Blocks until every thread sharing this barrier has called `wait`.
	/// Returns `true` to exactly one caller per round — the last to arrive
	/// (`NK_BARRIER_LAST` in the original).
	pub fn wait(&self) -> bool {
		let mut state = self.state.lock();
		state.remaining -= 1;
		let last = state.remaining == 0;
		if last {
			state.notify = true;
		}
		drop(state);

		if !last {
			loop {
				if self.state.lock().notify {
					break;
				}
				core::hint::spin_loop();
			}
		}

		let mut state = self.state.lock();
		state.remaining += 1;
		if state.remaining == state.init_count {
			state.notify = false;
		}
		last
	}

	/// Fails with [`Error::Busy`] if any thread is still parked in `wait`.
	pub fn destroy(&self) -> Result<()> {
		let state = self.state.lock();
		if state.remaining == state.init_count {
			Ok(())
		} else {
			Err(Error::Busy)
		}
	}
}

struct CoreBarrierState {
	active: AtomicBool,
	remaining: AtomicIsize,
	notify: AtomicBool,
}

static SYSTEM: CoreBarrierState = CoreBarrierState {
	active: AtomicBool::new(false),
	remaining: AtomicIsize::new(0),
	notify: AtomicBool::new(false),
};

/// Handle type for the single system-wide core barrier (`nk_core_barrier_*`
/// in the original, which hangs off `per_cpu_get(system)`, not off any one
/// core). There is exactly one of these in the kernel; the type exists so
/// callers have something to name, not because more than one instance is
/// meaningful.
pub struct CoreBarrier;

impl CoreBarrier {
	/// Claims the barrier and cross-calls every other online core to
	/// [`arrive`]. Fails with [`Error::Conflict`] if another core already
	/// has it raised, instead of silently joining that round the way the
	/// original's `-EINVAL`-returning caller does.
	pub fn raise() -> Result<()> {
		if SYSTEM
			.active
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
			.is_err()
		{
			return Err(Error::Conflict);
		}

		let online = percpu::online_cores();
		let me = percpu::core_id();
		SYSTEM.notify.store(false, Ordering::Release);
		SYSTEM.remaining.store(online.saturating_sub(1) as isize, Ordering::Release);

		for core in 0..online {
			if core != me {
				ipi::run_on(core, arrive);
			}
		}
		Ok(())
	}

	/// Spins until every cross-called core has reached [`arrive`].
	pub fn wait() -> Result<()> {
		if !SYSTEM.active.load(Ordering::Acquire) {
			return Err(Error::NotInitialized);
		}
		while SYSTEM.remaining.load(Ordering::Acquire) != 0 {
			core::hint::spin_loop();
		}
		Ok(())
	}

	/// Releases every core parked in [`arrive`] and clears the barrier.
	pub fn lower() -> Result<()> {
		if !SYSTEM.active.load(Ordering::Acquire) {
			return Err(Error::NotInitialized);
		}
		SYSTEM.notify.store(true, Ordering::Release);
		SYSTEM.active.store(false, Ordering::Release);
		Ok(())
	}
}

/// Runs on every non-raising core once cross-called by [`CoreBarrier::raise`].
/// Interrupts are off for the duration on this core, by design — this is the
/// stop-the-world primitive, so the whole point is that nothing else on this
/// core runs until [`CoreBarrier::lower`] flips `notify`.
fn arrive() {
	if !SYSTEM.active.load(Ordering::Acquire) {
		return;
	}
	SYSTEM.remaining.fetch_sub(1, Ordering::AcqRel);
	while !SYSTEM.notify.load(Ordering::Acquire) {
		core::hint::spin_loop();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_count_is_rejected() {
		assert_eq!(Barrier::new(0).unwrap_err(), Error::BadParameter);
	}

	#[test]
	fn single_thread_barrier_is_immediately_last() {
		let barrier = Barrier::new(1).unwrap();
		assert!(barrier.wait());
		assert!(barrier.destroy().is_ok());
	}

	#[test]
	fn destroy_succeeds_once_remaining_recovers() {
		let barrier = Barrier::new(1).unwrap();
		barrier.wait();
		assert!(barrier.destroy().is_ok());
	}
}
