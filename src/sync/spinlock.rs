//! Ticket spinlocks, with and without an IRQ-save variant.
//!
//! Grounded directly on the teacher's `synch::spinlock`: same ticket/dequeue
//! counter scheme, same `CachePadded` + `Backoff` pairing for SMP builds,
//! collapsing to an unchecked cell when the `smp` feature is off.

use core::cell::UnsafeCell;
#[cfg(feature = "smp")]
use core::fmt;
use core::ops::{Deref, DerefMut};
#[cfg(feature = "smp")]
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "smp")]
use crossbeam_utils::{Backoff, CachePadded};

use crate::arch::x86_64::irq;

#[cfg(feature = "smp")]
pub struct Spinlock<T: ?Sized> {
	queue: CachePadded<AtomicUsize>,
	dequeue: CachePadded<AtomicUsize>,
	data: UnsafeCell<T>,
}

#[cfg(not(feature = "smp"))]
pub struct Spinlock<T: ?Sized> {
	data: UnsafeCell<T>,
}

pub struct SpinlockGuard<'a, T: ?Sized> {
	#[cfg(feature = "smp")]
	dequeue: &'a CachePadded<AtomicUsize>,
	#[cfg(feature = "smp")]
	ticket: usize,
	data: &'a mut T,
}

unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
	pub const fn new(data: T) -> Self {
		Self {
			#[cfg(feature = "smp")]
			queue: CachePadded::new(AtomicUsize::new(0)),
			#[cfg(feature = "smp")]
			dequeue: CachePadded::new(AtomicUsize::new(1)),
			data: UnsafeCell::new(data),
		}
	}

	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T: ?Sized> Spinlock<T> {
	#[cfg(feature = "smp")]
	pub fn lock(&self) -> SpinlockGuard<'_, T> {
		crate::arch::x86_64::percpu::preempt_disable();
		let backoff = Backoff::new();
		let ticket = self.queue.fetch_add(1, Ordering::Relaxed) + 1;
		while self.dequeue.load(Ordering::Acquire) != ticket {
			backoff.spin();
		}
		SpinlockGuard {
			dequeue: &self.dequeue,
			ticket,
			data: unsafe { &mut *self.data.get() },
		}
	}

	#[cfg(not(feature = "smp"))]
	pub fn lock(&self) -> SpinlockGuard<'_, T> {
		crate::arch::x86_64::percpu::preempt_disable();
		SpinlockGuard {
			data: unsafe { &mut *self.data.get() },
		}
	}

	#[cfg(feature = "smp")]
	pub fn try_lock(&self) -> Result<SpinlockGuard<'_, T>, ()> {
		crate::arch::x86_64::percpu::preempt_disable();
		self.queue
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ticket| {
				(self.dequeue.load(Ordering::Acquire) == ticket + 1).then_some(ticket + 1)
			})
			.map(|ticket| SpinlockGuard {
				dequeue: &self.dequeue,
				ticket: ticket + 1,
				data: unsafe { &mut *self.data.get() },
			})
			.map_err(|_| {
				crate::arch::x86_64::percpu::preempt_enable();
			})
	}

	#[cfg(not(feature = "smp"))]
	pub fn try_lock(&self) -> Result<SpinlockGuard<'_, T>, ()> {
		crate::arch::x86_64::percpu::preempt_disable();
		Ok(SpinlockGuard {
			data: unsafe { &mut *self.data.get() },
		})
	}
}

#[cfg(feature = "smp")]
impl<T: ?Sized + fmt::Debug> fmt::Debug for Spinlock<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"queue: {} dequeue: {}",
			self.queue.load(Ordering::Relaxed),
			self.dequeue.load(Ordering::Relaxed)
		)
	}
}

impl<T: ?Sized + Default> Default for Spinlock<T> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<'a, T: ?Sized> Deref for SpinlockGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		self.data
	}
}

impl<'a, T: ?Sized> DerefMut for SpinlockGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		self.data
	}
}

#[cfg(feature = "smp")]
impl<'a, T: ?Sized> Drop for SpinlockGuard<'a, T> {
	fn drop(&mut self) {
		self.dequeue.store(self.ticket + 1, Ordering::Release);
	}
}

/// Same ticket lock as [`Spinlock`], but `lock`/`try_lock` also disable
/// interrupts for the duration of the critical section and restore the
/// prior state on drop. Every lock reachable from interrupt context must
/// use this variant instead of [`Spinlock`].
pub struct SpinlockIrqSave<T: ?Sized> {
	#[cfg(feature = "smp")]
	queue: CachePadded<AtomicUsize>,
	#[cfg(feature = "smp")]
	dequeue: CachePadded<AtomicUsize>,
	data: UnsafeCell<T>,
}

pub struct SpinlockIrqSaveGuard<'a, T: ?Sized> {
	#[cfg(feature = "smp")]
	dequeue: &'a CachePadded<AtomicUsize>,
	#[cfg(feature = "smp")]
	ticket: usize,
	irq: bool,
	data: &'a mut T,
}

unsafe impl<T: ?Sized + Send> Sync for SpinlockIrqSave<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinlockIrqSave<T> {}

impl<T> SpinlockIrqSave<T> {
	pub const fn new(data: T) -> Self {
		Self {
			#[cfg(feature = "smp")]
			queue: CachePadded::new(AtomicUsize::new(0)),
			#[cfg(feature = "smp")]
			dequeue: CachePadded::new(AtomicUsize::new(1)),
			data: UnsafeCell::new(data),
		}
	}

	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T: ?Sized> SpinlockIrqSave<T> {
	#[cfg(feature = "smp")]
	pub fn lock(&self) -> SpinlockIrqSaveGuard<'_, T> {
		let was_enabled = irq::nested_disable();
		crate::arch::x86_64::percpu::preempt_disable();
		let backoff = Backoff::new();
		let ticket = self.queue.fetch_add(1, Ordering::Relaxed) + 1;
		while self.dequeue.load(Ordering::Acquire) != ticket {
			backoff.spin();
		}
		SpinlockIrqSaveGuard {
			dequeue: &self.dequeue,
			ticket,
			irq: was_enabled,
			data: unsafe { &mut *self.data.get() },
		}
	}

	#[cfg(not(feature = "smp"))]
	pub fn lock(&self) -> SpinlockIrqSaveGuard<'_, T> {
		let was_enabled = irq::nested_disable();
		crate::arch::x86_64::percpu::preempt_disable();
		SpinlockIrqSaveGuard {
			irq: was_enabled,
			data: unsafe { &mut *self.data.get() },
		}
	}

	#[cfg(feature = "smp")]
	pub fn try_lock(&self) -> Result<SpinlockIrqSaveGuard<'_, T>, ()> {
		let was_enabled = irq::nested_disable();
		crate::arch::x86_64::percpu::preempt_disable();
		self.queue
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ticket| {
				(self.dequeue.load(Ordering::Acquire) == ticket + 1).then_some(ticket + 1)
			})
			.map(|ticket| SpinlockIrqSaveGuard {
				dequeue: &self.dequeue,
				ticket: ticket + 1,
				irq: was_enabled,
				data: unsafe { &mut *self.data.get() },
			})
			.map_err(|_| {
				crate::arch::x86_64::percpu::preempt_enable();
				irq::nested_enable(was_enabled);
			})
	}

	#[cfg(not(feature = "smp"))]
	pub fn try_lock(&self) -> Result<SpinlockIrqSaveGuard<'_, T>, ()> {
		let was_enabled = irq::nested_disable();
		crate::arch::x86_64::percpu::preempt_disable();
		Ok(SpinlockIrqSaveGuard {
			irq: was_enabled,
			data: unsafe { &mut *self.data.get() },
		})
	}
}

#[cfg(feature = "smp")]
impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinlockIrqSave<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"queue: {} dequeue: {}",
			self.queue.load(Ordering::Relaxed),
			self.dequeue.load(Ordering::Relaxed)
		)
	}
}

impl<T: ?Sized + Default> Default for SpinlockIrqSave<T> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<'a, T: ?Sized> Deref for SpinlockIrqSaveGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		self.data
	}
}

impl<'a, T: ?Sized> DerefMut for SpinlockIrqSaveGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		self.data
	}
}

impl<'a, T: ?Sized> Drop for SpinlockIrqSaveGuard<'a, T> {
	fn drop(&mut self) {
		#[cfg(feature = "smp")]
		self.dequeue.store(self.ticket + 1, Ordering::Release);
		crate::arch::x86_64::percpu::preempt_enable();
		irq::nested_enable(self.irq);
	}
}

// No host-side tests here: both lock paths touch real CPU interrupt-enable
// state through `arch::x86_64::irq`, which a hosted unit test can't safely
// exercise (see `mm::buddy` and `sched::tls` for the pure-logic subsystems
// that do get host-side coverage).
