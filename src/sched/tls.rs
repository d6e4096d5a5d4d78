//! Keyed thread-local storage (spec §4.2).
//!
//! The teacher's own `scheduler::task::tls` implements the ELF TLS model
//! (`.tdata`/`.tbss`, `__tls_get_addr`), which exists to support thread
//! locals declared with the `thread_local!` surface tied to dynamic
//! linking. This kernel instead needs the classic pthreads-style keyed API
//! — `key_create`/`get`/`set`, a destructor run at thread exit, at least
//! 128 live keys — so `ThreadLocalStorage` is a fresh design: a
//! fixed-size slot array indexed by key, sized from `config::NO_TLS_KEYS`.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::NO_TLS_KEYS;
use crate::errno::{Error, Result};

pub type Destructor = fn(usize);

struct KeySlot {
	in_use: AtomicBool,
	destructor: UnsafeCell<Option<Destructor>>,
}

// `destructor` is only written once, under the `in_use` CAS below, and read
// only after that write has happened-before via the same atomic.
unsafe impl Sync for KeySlot {}

/// Process-wide table of allocated keys, shared by every thread's
/// [`ThreadLocalStorage`] (each thread's *values* are private; only the
/// key namespace itself is global, as with pthreads).
pub struct KeyTable {
	slots: [KeySlot; NO_TLS_KEYS],
}

static KEY_TABLE: KeyTable = KeyTable::new();

impl KeyTable {
	const fn new() -> Self {
		const EMPTY: KeySlot = KeySlot {
			in_use: AtomicBool::new(false),
			destructor: UnsafeCell::new(None),
		};
		Self {
			slots: [EMPTY; NO_TLS_KEYS],
		}
	}
}

/// A thread-local storage key. Valid for the lifetime of the kernel unless
/// explicitly destroyed with [`key_delete`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Key(usize);

/// Allocates a new TLS key, optionally with a destructor run on every live
/// thread's value when that thread exits (spec §4.2). Returns
/// [`Error::OutOfMemory`] once all `config::NO_TLS_KEYS` slots are taken.
pub fn key_create(destructor: Option<Destructor>) -> Result<Key> {
	for (index, slot) in KEY_TABLE.slots.iter().enumerate() {
		if slot
			.in_use
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
			.is_ok()
		{
			// SAFETY: exclusive access established by the CAS above; no
			// other thread can be racing to install a destructor on this
			// slot, and `destructor` is never mutated again after this.
			unsafe {
				*slot.destructor.get() = destructor;
			}
			return Ok(Key(index));
		}
	}
	Err(Error::OutOfMemory)
}

/// Releases a key back to the table. Values still held by live threads
/// under this key become unreachable but are not implicitly freed; callers
/// are responsible for cleaning up before deleting a key in use.
pub fn key_delete(key: Key) {
	KEY_TABLE.slots[key.0].in_use.store(false, Ordering::Release);
}

fn destructor_for(key: Key) -> Option<Destructor> {
	// SAFETY: reads happen-after the key's `in_use` CAS in `key_create`
	// (established before the caller could obtain this `Key`).
	unsafe { *KEY_TABLE.slots[key.0].destructor.get() }
}

/// Per-thread value storage, indexed by [`Key`]. Lives inside
/// [`crate::sched::task::Thread`]; never shared across threads.
pub struct ThreadLocalStorage {
	values: [AtomicUsize; NO_TLS_KEYS],
	present: [AtomicBool; NO_TLS_KEYS],
}

impl ThreadLocalStorage {
	pub fn new() -> Self {
		const ZERO: AtomicUsize = AtomicUsize::new(0);
		const ABSENT: AtomicBool = AtomicBool::new(false);
		Self {
			values: [ZERO; NO_TLS_KEYS],
			present: [ABSENT; NO_TLS_KEYS],
		}
	}

	pub fn set(&self, key: Key, value: usize) {
		self.values[key.0].store(value, Ordering::Release);
		self.present[key.0].store(true, Ordering::Release);
	}

	pub fn get(&self, key: Key) -> Option<usize> {
		self.present[key.0]
			.load(Ordering::Acquire)
			.then(|| self.values[key.0].load(Ordering::Acquire))
	}

	/// Runs every key's destructor, in key-index order, against whatever
	/// value this thread last set for it. Called once from `Thread::exit`
	/// (spec §4.2, "Thread lifecycle").
	///
	/// POSIX re-runs destructors up to `PTHREAD_DESTRUCTOR_ITERATIONS` times
	/// if a destructor itself calls `set` again; `config::TLS_DESTRUCTOR_ITERATIONS`
	/// bounds that the same way.
	pub(crate) fn run_destructors(&self) {
		for _ in 0..crate::config::TLS_DESTRUCTOR_ITERATIONS {
			let mut any_ran = false;
			for index in 0..NO_TLS_KEYS {
				if !self.present[index].load(Ordering::Acquire) {
					continue;
				}
				let key = Key(index);
				if let Some(destructor) = destructor_for(key) {
					self.present[index].store(false, Ordering::Release);
					let value = self.values[index].load(Ordering::Acquire);
					destructor(value);
					any_ran = true;
				} else {
					self.present[index].store(false, Ordering::Release);
				}
			}
			if !any_ran {
				break;
			}
		}
	}
}

impl Default for ThreadLocalStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use core::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

	#[test]
	fn set_and_get_roundtrip() {
		let tls = ThreadLocalStorage::new();
		let key = key_create(None).unwrap();
		assert_eq!(tls.get(key), None);
		tls.set(key, 42);
		assert_eq!(tls.get(key), Some(42));
		key_delete(key);
	}

	#[test]
	fn destructor_runs_once_on_exit() {
		static RAN_WITH: StdAtomicUsize = StdAtomicUsize::new(0);
		fn dtor(value: usize) {
			RAN_WITH.store(value, StdOrdering::SeqCst);
		}

		let tls = ThreadLocalStorage::new();
		let key = key_create(Some(dtor)).unwrap();
		tls.set(key, 7);
		tls.run_destructors();
		assert_eq!(RAN_WITH.load(StdOrdering::SeqCst), 7);
		assert_eq!(tls.get(key), None);
		key_delete(key);
	}

	#[test]
	fn at_least_128_keys_available() {
		assert!(NO_TLS_KEYS >= 128);
	}
}
