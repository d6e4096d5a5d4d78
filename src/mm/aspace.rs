//! Base address space (spec §4.4, "Base address space").
//!
//! The rest of this kernel runs against one identity-mapped address space
//! for its entire lifetime, so this is a singleton rather than the usual
//! create-many-instances pattern: everything that looks like a per-aspace
//! operation other than switching to it is rejected, the same shape
//! `nk_aspace_register_impl` callback tables use for an implementation that
//! opts out of region management.

use alloc::sync::Arc;

use x86_64::registers::control::{Cr3, Cr3Flags, Cr4, Cr4Flags};
use x86_64::structures::paging::PhysFrame;
#[cfg(test)]
use x86_64::PhysAddr;

use crate::errno::{Error, Result};
use crate::sched::task::ThreadId;
use crate::sync::spinlock::SpinlockIrqSave;

/// The single process-wide address space (`nk_aspace_t` with the base
/// implementation installed). Holds what `switch_to` needs to reinstall:
/// the page table root and the CR4 bits this kernel manages itself.
pub struct AddressSpace {
	cr3: PhysFrame,
	cr3_flags: Cr3Flags,
	cr4_mask: Cr4Flags,
}

static SINGLETON: SpinlockIrqSave<Option<Arc<AddressSpace>>> = SpinlockIrqSave::new(None);
static ACTIVE: SpinlockIrqSave<Option<Arc<AddressSpace>>> = SpinlockIrqSave::new(None);

impl AddressSpace {
	/// Creates the one base address space, capturing the page tables and
	/// CR4 bits already live at boot time as its default. Fails with
	/// [`Error::Conflict`] on any call after the first.
	pub fn create() -> Result<Arc<Self>> {
		let mut slot = SINGLETON.lock();
		if slot.is_some() {
			return Err(Error::Conflict);
		}
		let (cr3, cr3_flags) = Cr3::read();
		let cr4_mask = Cr4::read();
		let aspace = Arc::new(Self { cr3, cr3_flags, cr4_mask });
		*slot = Some(aspace.clone());
		Ok(aspace)
	}

	/// Accepts unconditionally: the base aspace doesn't track membership
	/// beyond letting any thread run under it.
	pub fn add_thread(&self, _thread: ThreadId) -> Result<()> {
		Ok(())
	}

	pub fn remove_thread(&self, _thread: ThreadId) -> Result<()> {
		Ok(())
	}

	/// Region mutation always fails: the base aspace is the flat identity
	/// map, not something with carve-out-able regions.
	pub fn add_region(&self) -> Result<()> {
		Err(Error::NotSupported)
	}

	pub fn remove_region(&self) -> Result<()> {
		Err(Error::NotSupported)
	}

	pub fn protect_region(&self) -> Result<()> {
		Err(Error::NotSupported)
	}

	pub fn move_region(&self) -> Result<()> {
		Err(Error::NotSupported)
	}

	/// Loads this aspace's saved CR3 and the CR4 bits it manages. A no-op if
	/// this is already the active aspace — with exactly one instance ever
	/// able to exist, that's every call after the first.
	pub fn switch_to(self: &Arc<Self>) {
		let mut active = ACTIVE.lock();
		if let Some(current) = active.as_ref() {
			if Arc::ptr_eq(current, self) {
				return;
			}
			current.switch_from();
		}

		unsafe {
			Cr3::write(self.cr3, self.cr3_flags);
			let mut cr4 = Cr4::read();
			cr4.insert(self.cr4_mask);
			Cr4::write(cr4);
		}
		*active = Some(self.clone());
	}

	/// Hook run on the outgoing aspace before a different one takes over.
	/// The base aspace has nothing to tear down.
	fn switch_from(&self) {}

	/// No page fault should ever hit the identity map this aspace backs;
	/// reaching here means something walked off the mapped region or
	/// corrupted the page tables, either way unrecoverable (spec §7,
	/// `Fatal`).
	pub fn exception(&self) -> ! {
		panic!("page fault in base address space");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn region_mutation_is_rejected() {
		// Doesn't touch CR3/CR4, so safe to run host-side.
		let aspace = AddressSpace {
			cr3: PhysFrame::containing_address(PhysAddr::new(0x1000)),
			cr3_flags: Cr3Flags::empty(),
			cr4_mask: Cr4Flags::empty(),
		};
		assert_eq!(aspace.add_region().unwrap_err(), Error::NotSupported);
		assert_eq!(aspace.remove_region().unwrap_err(), Error::NotSupported);
		assert_eq!(aspace.protect_region().unwrap_err(), Error::NotSupported);
		assert_eq!(aspace.move_region().unwrap_err(), Error::NotSupported);
	}

	#[test]
	fn thread_membership_always_accepts() {
		let aspace = AddressSpace {
			cr3: PhysFrame::containing_address(PhysAddr::new(0x1000)),
			cr3_flags: Cr3Flags::empty(),
			cr4_mask: Cr4Flags::empty(),
		};
		let tid = ThreadId::new(1).unwrap();
		assert!(aspace.add_thread(tid).is_ok());
		assert!(aspace.remove_thread(tid).is_ok());
	}
}
