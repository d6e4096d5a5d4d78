//! Stress-exercises thread creation and the non-blocking edges of join
//! (spec §4.2 "create"/"run"/"join"): the paths below never touch the raw
//! context switch, so they're safe to drive from a hosted test process —
//! the blocking side of join needs an actual running scheduler and is
//! exercised by the kernel's own integration tests instead.

use nautilus::errno::Error;
use nautilus::sched::scheduler::PerCpuScheduler;
use nautilus::sched::task::{ThreadId, HIGH_PRIO, LOW_PRIO, NORMAL_PRIO};

const THREADS_PER_CORE: usize = 200;
const CORES: usize = 8;

extern "C" fn noop(_: usize) -> ! {
	loop {}
}

#[test]
fn thread_ids_are_unique_across_many_cores_and_creations() {
	let mut seen = std::collections::HashSet::new();

	for core in 0..CORES {
		let mut scheduler = PerCpuScheduler::new(core);
		for i in 0..THREADS_PER_CORE {
			let prio = match i % 3 {
				0 => LOW_PRIO,
				1 => NORMAL_PRIO,
				_ => HIGH_PRIO,
			};
			let id = scheduler.create(noop, 0, prio, 0x4000, true);
			assert!(seen.insert(id), "thread id {id:?} reused");
		}
	}
}

#[test]
fn run_rejects_unknown_thread_id() {
	let mut scheduler = PerCpuScheduler::new(0);
	let bogus = ThreadId::new(usize::MAX).unwrap();
	assert_eq!(scheduler.run(bogus).unwrap_err(), Error::BadParameter);
}

#[test]
fn join_on_detached_thread_is_rejected_without_blocking() {
	let mut scheduler = PerCpuScheduler::new(0);

	for _ in 0..THREADS_PER_CORE {
		let id = scheduler.create(noop, 0, NORMAL_PRIO, 0x4000, true);
		scheduler.run(id).unwrap();
		assert_eq!(scheduler.join(id).unwrap_err(), Error::NotJoinable);
	}
}

#[test]
fn join_all_children_is_a_no_op_with_no_children() {
	let mut scheduler = PerCpuScheduler::new(0);
	assert!(scheduler.join_all_children().is_ok());
}

#[test]
fn created_but_never_run_threads_do_not_appear_twice() {
	let mut scheduler = PerCpuScheduler::new(1);
	let mut ids = Vec::with_capacity(THREADS_PER_CORE);
	for _ in 0..THREADS_PER_CORE {
		ids.push(scheduler.create(noop, 0, NORMAL_PRIO, 0x4000, true));
	}
	ids.sort();
	ids.dedup();
	assert_eq!(ids.len(), THREADS_PER_CORE);
}
