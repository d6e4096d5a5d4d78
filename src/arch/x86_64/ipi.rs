//! Cross-call dispatch: running a closure on another core (spec §4.1).
//!
//! Each core owns a lock-protected queue of pending closures. Sending a
//! cross-call pushes onto the target core's queue and fires a fixed-vector
//! IPI; the target's interrupt handler drains its queue and runs every
//! closure before returning. Modeled on the teacher's `SchedulerInput`
//! per-core mailbox in `scheduler::mod`, generalized from "new task /
//! wakeup task" to an arbitrary boxed closure.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::x86_64::apic;
use crate::arch::x86_64::percpu::CoreId;
use crate::config::MAX_CPUS;
use crate::sync::spinlock::SpinlockIrqSave;

type CrossCallFn = Box<dyn FnOnce() + Send + 'static>;

struct Mailbox {
	apic_id: u32,
	queue: SpinlockIrqSave<Vec<CrossCallFn>>,
}

static MAILBOXES: SpinlockIrqSave<Vec<Mailbox>> = SpinlockIrqSave::new(Vec::new());

/// Registers a core's mailbox during SMP bring-up. `core_id` must equal the
/// mailbox's index in bring-up order.
pub fn register_core(core_id: CoreId, apic_id: u32) {
	let mut mailboxes = MAILBOXES.lock();
	assert_eq!(mailboxes.len(), core_id, "cores must register in order");
	assert!(core_id < MAX_CPUS);
	mailboxes.push(Mailbox {
		apic_id,
		queue: SpinlockIrqSave::new(Vec::new()),
	});
}

/// Queues `f` to run on `target` and sends the cross-call IPI. Returns
/// without waiting for `f` to run; callers that need completion ordering
/// should pair this with a [`crate::sync::future::Future`].
pub fn run_on(target: CoreId, f: impl FnOnce() + Send + 'static) {
	let mailboxes = MAILBOXES.lock();
	let mailbox = &mailboxes[target];
	mailbox.queue.lock().push(Box::new(f));
	apic::send_fixed(mailbox.apic_id, apic::CROSS_CALL_VECTOR);
}

/// Drains and runs every closure queued for the calling core. Invoked from
/// the cross-call interrupt handler.
pub fn drain_local(core_id: CoreId) {
	let pending = {
		let mailboxes = MAILBOXES.lock();
		core::mem::take(&mut *mailboxes[core_id].queue.lock())
	};
	for f in pending {
		f();
	}
}
