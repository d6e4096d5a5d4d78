//! Per-CPU state, reached through the GS segment base (spec §4.1).
//!
//! One [`CpuLocal`] is allocated per core at bring-up and its address is
//! written into `IA32_GS_BASE`; [`CpuLocal::get`] reads it back with a single
//! `mov %gs:offset` rather than a table lookup, mirroring the teacher's
//! `CoreLocal` in `arch::x86_64::kernel::core_local`.

use alloc::boxed::Box;
use core::arch::asm;
use core::cell::Cell;
use core::mem;
use core::sync::atomic::{AtomicUsize, Ordering};

use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use x86_64::VirtAddr;
use x86_64::registers::model_specific::GsBase;

use crate::config::MAX_CPUS;
use crate::sched::scheduler::PerCpuScheduler;

static NEXT_CORE_ID: AtomicUsize = AtomicUsize::new(0);
static ONLINE_CORES: AtomicUsize = AtomicUsize::new(0);

pub type CoreId = usize;

pub struct CpuLocal {
	this: *const Self,
	core_id: CoreId,
	local_apic_id: u32,
	scheduler: Cell<*mut PerCpuScheduler>,
	preempt_count: Cell<u32>,
	rng: Cell<ChaCha8Rng>,
	pub hlt: core::sync::atomic::AtomicBool,
}

// Every field is only ever touched by the core that owns this record, with
// the single exception of wakeups delivered through the APIC, which don't go
// through these accessors at all.
unsafe impl Sync for CpuLocal {}

impl CpuLocal {
	/// Installs a fresh [`CpuLocal`] for the calling core and writes its
	/// address into `GS_BASE`. Must run once per core, before interrupts are
	/// enabled on that core.
	pub fn install(local_apic_id: u32, seed: u64) {
		assert_eq!(VirtAddr::zero(), GsBase::read(), "CpuLocal::install called twice on this core");

		let core_id = NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed);
		assert!(core_id < MAX_CPUS, "too many cores brought up");

		let this = Box::leak(Box::new(Self {
			this: core::ptr::null_mut(),
			core_id,
			local_apic_id,
			scheduler: Cell::new(core::ptr::null_mut()),
			preempt_count: Cell::new(0),
			rng: Cell::new(ChaCha8Rng::seed_from_u64(seed)),
			hlt: core::sync::atomic::AtomicBool::new(false),
		}));
		this.this = core::ptr::from_ref(this);

		GsBase::write(VirtAddr::from_ptr(this));
		ONLINE_CORES.fetch_add(1, Ordering::Release);
	}

	#[inline]
	pub fn get() -> &'static Self {
		debug_assert_ne!(VirtAddr::zero(), GsBase::read());
		unsafe {
			let raw: *const Self;
			asm!(
				"mov {}, gs:{}",
				out(reg) raw,
				const mem::offset_of!(Self, this),
				options(nomem, nostack, preserves_flags),
			);
			&*raw
		}
	}

	#[inline]
	pub fn core_id(&self) -> CoreId {
		self.core_id
	}

	#[inline]
	pub fn local_apic_id(&self) -> u32 {
		self.local_apic_id
	}

	#[inline]
	pub fn scheduler(&self) -> &'static mut PerCpuScheduler {
		unsafe { self.scheduler.get().as_mut().expect("scheduler not installed") }
	}

	pub fn set_scheduler(&self, scheduler: *mut PerCpuScheduler) {
		self.scheduler.set(scheduler);
	}

	/// Increments the preempt-disable counter; a nonzero count means the
	/// scheduler must not preempt the running thread (spec §4.2).
	pub fn preempt_disable(&self) {
		self.preempt_count.set(self.preempt_count.get() + 1);
	}

	pub fn preempt_enable(&self) {
		let count = self.preempt_count.get();
		debug_assert!(count > 0, "unbalanced preempt_enable");
		self.preempt_count.set(count - 1);
	}

	pub fn preemptible(&self) -> bool {
		self.preempt_count.get() == 0
	}

	/// Draws from this core's private RNG stream (spec §4.2, per-CPU
	/// entropy). Never shared across cores, so no locking is needed.
	pub fn next_u64(&self) -> u64 {
		let mut rng = self.rng.get();
		let value = rand_core::RngCore::next_u64(&mut rng);
		self.rng.set(rng);
		value
	}
}

/// Number of cores that have completed [`CpuLocal::install`] so far.
pub fn online_cores() -> usize {
	ONLINE_CORES.load(Ordering::Acquire)
}

pub fn core_id() -> CoreId {
	if GsBase::read() == VirtAddr::zero() {
		0
	} else {
		CpuLocal::get().core_id()
	}
}

pub fn scheduler() -> &'static mut PerCpuScheduler {
	CpuLocal::get().scheduler()
}

/// Guarded wrapper around [`CpuLocal::preempt_disable`]: a no-op before
/// [`CpuLocal::install`] has run on this core, the same early-boot
/// allowance [`core_id`] makes. Lock acquisition (spec §4.2) calls this
/// instead of `CpuLocal::get().preempt_disable()` directly because some
/// locks — `mm::allocator`'s buddy pool among them — take their first lock
/// before `GS_BASE` is installed.
pub fn preempt_disable() {
	if GsBase::read() != VirtAddr::zero() {
		CpuLocal::get().preempt_disable();
	}
}

/// See [`preempt_disable`].
pub fn preempt_enable() {
	if GsBase::read() != VirtAddr::zero() {
		CpuLocal::get().preempt_enable();
	}
}

/// Whether the running thread on this core may be cooperatively preempted
/// right now. `true` before `CpuLocal::install`, since nothing has taken a
/// lock yet to disagree.
pub fn preemptible() -> bool {
	GsBase::read() == VirtAddr::zero() || CpuLocal::get().preemptible()
}
