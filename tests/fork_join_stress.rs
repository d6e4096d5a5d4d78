//! Stress-exercises `fork` from a thread that never actually gets
//! rescheduled away (spec §4.2 "fork"): `self.current` never changes, so
//! every call takes the parent branch and returns synchronously without
//! touching the raw context switch. Resuming one of the forked children
//! needs a live scheduler loop and is exercised by the kernel's own
//! integration tests instead.

use nautilus::sched::scheduler::PerCpuScheduler;
use nautilus::sched::task::ForkResult;

const FORKS: usize = 500;

#[test]
fn repeated_fork_always_returns_distinct_parent_children() {
	let mut scheduler = PerCpuScheduler::new(0);
	let mut children = std::collections::HashSet::new();

	for _ in 0..FORKS {
		match scheduler.fork() {
			ForkResult::Parent(child) => {
				assert!(children.insert(child), "child id {child:?} reused");
			}
			ForkResult::Child => panic!("fork took the child branch on the thread that called it"),
		}
	}

	assert_eq!(children.len(), FORKS);
}

#[test]
fn fork_from_independent_cores_never_collides() {
	let mut all_children = std::collections::HashSet::new();

	for core in 0..4 {
		let mut scheduler = PerCpuScheduler::new(core);
		for _ in 0..(FORKS / 4) {
			let ForkResult::Parent(child) = scheduler.fork() else {
				panic!("fork took the child branch on the thread that called it");
			};
			assert!(all_children.insert(child), "child id {child:?} reused across cores");
		}
	}
}
