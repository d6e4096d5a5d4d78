//! SMP discovery and AP bring-up (spec §4.1).
//!
//! Condensed from the teacher's `apic::boot_application_processors`: the
//! trampoline page and paging setup are hardware/bootloader details outside
//! this kernel's scope (spec §1, Non-goals), but the INIT/STARTUP IPI
//! sequence, the post-IPI spin-wait bounded by a timeout, and the
//! core-count bookkeeping are carried over faithfully.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::boxed::Box;

use crate::arch::x86_64::percpu::{self, CpuLocal};
use crate::arch::x86_64::{apic, gdt, idt, ipi, processor};
use crate::config::{AP_BRINGUP_TIMEOUT_MS, AP_STARTUP_TIMEOUT_MS};
use crate::errno::{Error, Result};
use crate::sched::scheduler::PerCpuScheduler;

static PROCESSOR_COUNT: AtomicUsize = AtomicUsize::new(1);

/// The physical address of the real-mode trampoline the bootloader placed
/// below 1 MiB. Populated once by [`crate::arch::x86_64::start::boot_bsp`].
static TRAMPOLINE_PAGE: AtomicUsize = AtomicUsize::new(0);

pub fn processor_count() -> usize {
	PROCESSOR_COUNT.load(Ordering::Acquire)
}

/// Discovers every local APIC id reachable from ACPI/MP tables. The actual
/// table walk is bootloader-provided boot info (spec §1, Non-goals); this
/// takes the already-parsed list and drives bring-up.
pub fn bring_up_all(apic_ids: &[u32], bsp_apic_id: u32, trampoline_page: u32) -> Result<()> {
	TRAMPOLINE_PAGE.store(trampoline_page as usize, Ordering::Relaxed);

	for &apic_id in apic_ids {
		if apic_id == bsp_apic_id {
			continue;
		}
		bring_up_one(apic_id, trampoline_page)?;
	}
	Ok(())
}

fn bring_up_one(apic_id: u32, trampoline_page: u32) -> Result<()> {
	let before = percpu::online_cores();

	apic::send_init(apic_id);
	processor::udelay(200);
	apic::send_startup(apic_id, trampoline_page);

	let deadline = processor::timestamp()
		+ u64::from(processor::frequency_mhz()).max(1) * u64::from(AP_STARTUP_TIMEOUT_MS) * 1000;
	while percpu::online_cores() == before {
		if processor::timestamp() > deadline {
			return Err(Error::Timeout);
		}
		core::hint::spin_loop();
	}

	PROCESSOR_COUNT.fetch_add(1, Ordering::AcqRel);
	Ok(())
}

/// Entry point every AP lands on after the trampoline hands off to Rust.
/// Installs per-core state, then blocks waiting for the scheduler to start
/// handing it work.
pub fn ap_entry(apic_id: u32, core_seed: u64) -> ! {
	CpuLocal::install(apic_id, core_seed);
	gdt::install(crate::mm::percpu_pool::alloc_ist_stacks());
	idt::load();
	apic::enable(apic::WAKEUP_VECTOR);
	apic::start_timer(processor::timer_initial_count(crate::config::TIMER_HZ));

	let core_id = percpu::core_id();
	let scheduler = Box::leak(Box::new(PerCpuScheduler::new(core_id)));
	CpuLocal::get().set_scheduler(scheduler);
	ipi::register_core(core_id, apic_id);

	log::info!("core {core_id} online (apic id {apic_id})");

	loop {
		ipi::drain_local(percpu::core_id());
		crate::arch::x86_64::irq::enable_and_wait();
	}
}

/// Spins forever with interrupts disabled. Used by fatal exception handlers
/// (spec §5): a single-address-space kernel has nowhere safe to unwind to.
pub fn halt_forever() -> ! {
	crate::arch::x86_64::irq::disable();
	loop {
		x86_64::instructions::hlt();
	}
}

/// Waits (with a bound) until every core has reached [`percpu::online_cores`]
/// equal to `expected`. Used by boot to know when it's safe to start
/// scheduling work onto every core.
pub fn wait_for_all_cores(expected: usize) -> Result<()> {
	let deadline = processor::timestamp()
		+ u64::from(processor::frequency_mhz()).max(1) * u64::from(AP_BRINGUP_TIMEOUT_MS) * 1000;
	while percpu::online_cores() < expected {
		if processor::timestamp() > deadline {
			return Err(Error::Timeout);
		}
		core::hint::spin_loop();
	}
	Ok(())
}
