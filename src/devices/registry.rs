//! The typed device registry (spec §3 "Device", §6 "Device drivers").
//!
//! Grounded on the same process-wide-lock-for-pointer-churn shape the
//! thread-group registry in [`crate::sync::group`] and the flag registry in
//! [`crate::env`] already use: a spinlock around a `hashbrown` map keyed by
//! name, handing back `Arc` clones so lookups stay valid past unregister of
//! some *other* entry. The original's "process-wide linked list" becomes a
//! map because every caller here looks devices up by name, never walks the
//! whole registry.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use ahash::RandomState;
use bitflags::bitflags;
use hashbrown::HashMap;

use crate::errno::{Error, Result};
use crate::sync::spinlock::SpinlockIrqSave;

/// The type tag every registered device carries alongside its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
	Char,
	Block,
	Net,
	Timer,
	Generic,
}

bitflags! {
	/// Readable/writeable status bits a character device reports (spec §6).
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct Status: u8 {
		const READABLE = 0b01;
		const WRITEABLE = 0b10;
	}
}

/// Completion callback for asynchronous block and network I/O. Takes the
/// operation's result; state the caller needs is expected to be captured in
/// the closure.
pub type Callback = Box<dyn FnOnce(Result<usize>) + Send>;

/// The common header every device implements, regardless of kind (spec §3,
/// "common header (name, type tag, flags, impl-state pointer, vtable)" — the
/// vtable is just Rust's native trait object dispatch here).
pub trait Device: Send + Sync {
	fn name(&self) -> &str;
	fn kind(&self) -> DeviceKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCharacteristics {
	pub block_size: usize,
	pub num_blocks: u64,
}

/// Block device contract (spec §6): synchronous when `callback` is `None`,
/// asynchronous otherwise.
pub trait BlockDevice: Device {
	fn get_characteristics(&self) -> BlockCharacteristics;
	fn read_blocks(&self, lba: u64, count: u64, buf: &mut [u8], callback: Option<Callback>) -> Result<()>;
	fn write_blocks(&self, lba: u64, count: u64, buf: &[u8], callback: Option<Callback>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharCharacteristics {
	pub blocking: bool,
}

/// Character device contract (spec §6): single-byte best-effort primitives,
/// aggregated into arbitrary lengths by callers above the registry.
pub trait CharDevice: Device {
	fn get_characteristics(&self) -> CharCharacteristics;
	fn status(&self) -> Status;
	fn read(&self) -> Result<u8>;
	fn write(&self, byte: u8) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetCharacteristics {
	pub mtu: usize,
	pub mac: [u8; 6],
}

/// Network device contract (spec §6): posted buffers complete via callback.
pub trait NetDevice: Device {
	fn get_characteristics(&self) -> NetCharacteristics;
	fn post_send(&self, buf: &[u8], callback: Callback) -> Result<()>;
	fn post_receive(&self, buf: &mut [u8], callback: Callback) -> Result<()>;
}

static REGISTRY: SpinlockIrqSave<Option<HashMap<String, Arc<dyn Device>, RandomState>>> =
	SpinlockIrqSave::new(None);

fn registry() -> &'static SpinlockIrqSave<Option<HashMap<String, Arc<dyn Device>, RandomState>>> {
	if REGISTRY.lock().is_none() {
		*REGISTRY.lock() = Some(HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)));
	}
	&REGISTRY
}

/// Registers `device` under its own name. Fails with [`Error::Conflict`] if
/// that name is already taken.
pub fn register(device: Arc<dyn Device>) -> Result<()> {
	let mut registry = registry().lock();
	let map = registry.as_mut().unwrap();
	if map.contains_key(device.name()) {
		return Err(Error::Conflict);
	}
	map.insert(String::from(device.name()), device);
	Ok(())
}

/// Looks a device up by name. The `Arc` stays valid even if some other
/// device is unregistered afterward.
pub fn find(name: &str) -> Option<Arc<dyn Device>> {
	registry().lock().as_ref().unwrap().get(name).cloned()
}

/// Removes `name` from the registry. Fails with [`Error::BadParameter`] if
/// no such device is registered.
pub fn unregister(name: &str) -> Result<()> {
	registry().lock().as_mut().unwrap().remove(name).map(|_| ()).ok_or(Error::BadParameter)
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Stub(&'static str);
	impl Device for Stub {
		fn name(&self) -> &str {
			self.0
		}
		fn kind(&self) -> DeviceKind {
			DeviceKind::Generic
		}
	}

	#[test]
	fn register_then_find_round_trips() {
		register(Arc::new(Stub("regtest-a"))).unwrap();
		assert_eq!(find("regtest-a").unwrap().kind(), DeviceKind::Generic);
		unregister("regtest-a").unwrap();
	}

	#[test]
	fn register_rejects_duplicate_name() {
		register(Arc::new(Stub("regtest-b"))).unwrap();
		assert_eq!(register(Arc::new(Stub("regtest-b"))).unwrap_err(), Error::Conflict);
		unregister("regtest-b").unwrap();
	}

	#[test]
	fn unregister_missing_name_is_bad_parameter() {
		assert_eq!(unregister("regtest-never-registered").unwrap_err(), Error::BadParameter);
	}
}
