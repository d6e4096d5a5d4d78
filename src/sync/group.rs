//! Thread groups and the cooperative group-scheduling coordinator (spec
//! §4.3, "Group scheduling").
//!
//! Grounded on `nautilus/group_sched.c` for the constraint-change protocol
//! and on the call sites in `test/groups.c` for the membership API itself
//! (`nk_thread_group_create`/`find`/`join`/`leave`/`election`/
//! `check_leader`/`get_size`/`barrier`/`delete` have no retrievable header
//! or implementation, only usage). This scheduler only has one kind of
//! constraint — [`crate::sched::task::Priority`] — so `change_constraints`
//! here is a priority change rather than the original's periodic/aperiodic/
//! sporadic constraint union.
//!
//! The group's internal coordinator lock is a raw flag released by whichever
//! thread happens to be last out, not by whoever acquired it — the same as
//! the original's `spin_lock`/`spin_unlock` pair, which is just a memory
//! flag and was never scoped to one call stack either. A guard-typed lock
//! can't express that, so it's a hand-rolled compare-and-swap loop instead.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::RandomState;
use hashbrown::HashMap;

use crate::arch::x86_64::percpu;
use crate::errno::{Error, Result};
use crate::sched::scheduler;
use crate::sched::task::{Priority, ThreadId, NORMAL_PRIO};
use crate::sync::barrier::Barrier;
use crate::sync::spinlock::SpinlockIrqSave;

struct CoordinatorLock(AtomicBool);

impl CoordinatorLock {
	const fn new() -> Self {
		Self(AtomicBool::new(false))
	}

	fn lock(&self) {
		while self.0.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
			core::hint::spin_loop();
		}
	}

	fn unlock(&self) {
		self.0.store(false, Ordering::Release);
	}
}

/// Shared scratch state a leader attaches to the group for the duration of
/// one `group_change_constraints` round.
struct GroupSchedState {
	constraints: Priority,
	changing_fail: AtomicBool,
	roll_back_to_old_fail: AtomicBool,
	changing_count: AtomicUsize,
}

/// A named, joinable collection of threads with an elected leader and a
/// barrier scoped to its own membership.
pub struct ThreadGroup {
	name: String,
	leader: AtomicUsize,
	members: SpinlockIrqSave<Vec<ThreadId>>,
	barrier: SpinlockIrqSave<Option<Barrier>>,
	state: SpinlockIrqSave<Option<Arc<GroupSchedState>>>,
	change_lock: CoordinatorLock,
}

static REGISTRY: SpinlockIrqSave<Option<HashMap<String, Arc<ThreadGroup>, RandomState>>> =
	SpinlockIrqSave::new(None);

fn registry() -> &'static SpinlockIrqSave<Option<HashMap<String, Arc<ThreadGroup>, RandomState>>> {
	if REGISTRY.lock().is_none() {
		*REGISTRY.lock() = Some(HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)));
	}
	&REGISTRY
}

impl ThreadGroup {
	/// Fails with [`Error::Conflict`] if a group with this name already
	/// exists.
	pub fn create(name: &str) -> Result<Arc<Self>> {
		let mut registry = registry().lock();
		let map = registry.as_mut().unwrap();
		if map.contains_key(name) {
			return Err(Error::Conflict);
		}
		let group = Arc::new(Self {
			name: String::from(name),
			leader: AtomicUsize::new(0),
			members: SpinlockIrqSave::new(Vec::new()),
			barrier: SpinlockIrqSave::new(None),
			state: SpinlockIrqSave::new(None),
			change_lock: CoordinatorLock::new(),
		});
		map.insert(String::from(name), group.clone());
		Ok(group)
	}

	pub fn find(name: &str) -> Option<Arc<Self>> {
		registry().lock().as_ref().unwrap().get(name).cloned()
	}

	/// Removes the group from the registry. Fails with [`Error::Busy`] if
	/// anyone is still a member.
	pub fn delete(&self) -> Result<()> {
		if !self.members.lock().is_empty() {
			return Err(Error::Busy);
		}
		registry().lock().as_mut().unwrap().remove(&self.name);
		Ok(())
	}

	/// Joins the calling thread to the group. Returns the thread's
	/// group-local ordinal (its join order), the same value the original
	/// uses as an array index for per-member scratch data.
	pub fn join(&self) -> usize {
		let me = percpu::scheduler().current();
		let mut members = self.members.lock();
		let ordinal = members.len();
		members.push(me);
		ordinal
	}

	pub fn leave(&self) {
		let me = percpu::scheduler().current();
		self.members.lock().retain(|&id| id != me);
	}

	pub fn get_size(&self) -> usize {
		self.members.lock().len()
	}

	/// First-CAS-wins leader election: the first caller to move `leader`
	/// from unset wins, every later caller (including re-elections) is a
	/// no-op. `ThreadId` is never zero, so `0` doubles as "unset".
	pub fn election(&self) {
		let me = percpu::scheduler().current().get();
		self.leader.compare_exchange(0, me, Ordering::AcqRel, Ordering::Relaxed).ok();
	}

	pub fn check_leader(&self) -> bool {
		let me = percpu::scheduler().current().get();
		self.leader.load(Ordering::Acquire) == me
	}

	/// Blocks at the group's barrier, lazily sizing it to the group's
	/// current membership on first use. Returns whether this call was the
	/// last to arrive.
	pub fn barrier(&self) -> Result<bool> {
		let mut slot = self.barrier.lock();
		if slot.is_none() {
			*slot = Some(Barrier::new(self.get_size().max(1) as u32)?);
		}
		let barrier = slot.as_ref().unwrap();
		Ok(barrier.wait())
	}

	fn attach_state(&self, state: Arc<GroupSchedState>) {
		*self.state.lock() = Some(state);
	}

	fn detach_state(&self) {
		*self.state.lock() = None;
	}

	fn state(&self) -> Option<Arc<GroupSchedState>> {
		self.state.lock().clone()
	}
}

/// The default-priority aperiodic constraint every member falls back to if
/// rolling back to its own old constraint also fails (spec §4.3 step 4: "a
/// well-known default-priority aperiodic constraint"). That rollback must
/// succeed, since there is nowhere further to fall back to.
pub const DEFAULT_CONSTRAINTS: Priority = NORMAL_PRIO;

/// Coordinates every member of `group` changing to `new_priority` together,
/// or all rolling back together (spec §4.3, "Group scheduling"):
///
/// 1. Elect a leader.
/// 2. The leader seeds shared state (the proposal plus a countdown of the
///    group size) and attaches it; everyone waits at the group barrier.
/// 3. Every thread attempts its own `change_constraints`; a failure sets the
///    shared `changing_fail` flag.
/// 4. Everyone synchronizes again; on failure, every thread attempts to
///    restore its *old* priority, synchronizes once more, and falls back to
///    [`DEFAULT_CONSTRAINTS`] if even that failed.
/// 5. The last thread out detaches the shared state and releases the
///    coordinator lock for the next round.
///
/// Every member ends under exactly one of {new, old, default} — never a
/// mix — whether or not the call as a whole reports success.
pub fn group_change_constraints(group: &Arc<ThreadGroup>, new_priority: Priority) -> Result<()> {
	let me = percpu::scheduler().current();
	let old = scheduler::priority_of(me)?;

	group.election();

	if group.check_leader() {
		group.change_lock.lock();
		group.attach_state(Arc::new(GroupSchedState {
			constraints: new_priority,
			changing_fail: AtomicBool::new(false),
			roll_back_to_old_fail: AtomicBool::new(false),
			changing_count: AtomicUsize::new(group.get_size()),
		}));
	}

	group.barrier()?;

	let state = group.state().expect("leader attaches state before the first barrier");

	if !state.changing_fail.load(Ordering::Acquire) && scheduler::change_constraints(me, state.constraints).is_err() {
		state.changing_fail.store(true, Ordering::Release);
	}

	group.barrier()?;

	let mut result = Ok(());
	if state.changing_fail.load(Ordering::Acquire) {
		if scheduler::change_constraints(me, old).is_err() {
			state.roll_back_to_old_fail.store(true, Ordering::Release);
		}

		group.barrier()?;

		if state.roll_back_to_old_fail.load(Ordering::Acquire) {
			scheduler::change_constraints(me, DEFAULT_CONSTRAINTS)
				.expect("rollback to default constraints must not fail");
		}

		result = Err(Error::Conflict);
	}

	if state.changing_count.fetch_sub(1, Ordering::AcqRel) == 1 {
		group.detach_state();
		group.change_lock.unlock();
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_rejects_duplicate_name() {
		let _g = ThreadGroup::create("dup-test").unwrap();
		assert_eq!(ThreadGroup::create("dup-test").unwrap_err(), Error::Conflict);
		_g.delete().unwrap();
	}

	#[test]
	fn find_returns_created_group() {
		let g = ThreadGroup::create("findable").unwrap();
		assert!(Arc::ptr_eq(&g, &ThreadGroup::find("findable").unwrap()));
		g.delete().unwrap();
	}

	#[test]
	fn delete_rejects_while_members_present() {
		let g = ThreadGroup::create("nonempty").unwrap();
		g.members.lock().push(ThreadId::new(1).unwrap());
		assert_eq!(g.delete().unwrap_err(), Error::Busy);
		g.members.lock().clear();
		g.delete().unwrap();
	}
}
