//! BSP boot sequence (spec §4.1, §6 "Firmware inputs").
//!
//! Everything upstream of [`BootInfo`] — walking the Multiboot2/SFI/e820/HRT
//! hand-off structure into a normalized memory map, CPU list, and command
//! line string — is bootloader-specific and out of this kernel's scope (spec
//! §1, Non-goals). `boot_bsp` starts from that already-normalized input and
//! brings the rest of the kernel up in dependency order (spec §2): CPU
//! primitives, IDT, boot memory, buddy, per-CPU state, APIC, wait queues,
//! scheduler, sync primitives, address space, device registry.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::x86_64::percpu::CpuLocal;
use crate::arch::x86_64::{apic, cpu, gdt, idt, processor};
use crate::config::TIMER_HZ;
use crate::env::FlagRegistry;
use crate::mm;
use crate::sched::scheduler::PerCpuScheduler;

/// Already-normalized boot-time input, produced by a platform-specific
/// front end this kernel doesn't implement (spec §6).
pub struct BootInfo {
	pub regions: Vec<mm::boot::RawRegion>,
	pub apic_ids: Vec<u32>,
	pub bsp_apic_id: u32,
	pub trampoline_page: u32,
	pub io_port: u16,
	pub cmdline: String,
}

/// Smallest power-of-two region, in bytes, the kernel will use as its buddy
/// pool if the boot memory map offers one at least this large.
const MIN_POOL_ORDER: u8 = 24; // 16 MiB
const MIN_BLOCK_ORDER: u8 = 6; // 64 bytes

fn largest_available_region(regions: &[mm::boot::Region]) -> Option<&mm::boot::Region> {
	regions
		.iter()
		.filter(|r| r.kind == mm::boot::RegionKind::Available)
		.max_by_key(|r| r.length)
}

fn calibrate_tsc_frequency() {
	let cpuid = raw_cpuid::CpuId::new();
	let mhz = cpuid
		.get_processor_frequency_info()
		.map(|info| info.processor_base_frequency())
		.filter(|&mhz| mhz > 0)
		.unwrap_or(1000);
	processor::set_frequency_mhz(mhz);
}

/// Brings the boot processor, and then the rest of the SMP system, up to
/// the point where threads can be created and scheduled. Never returns: the
/// BSP falls into the same idle loop every AP lands in.
pub fn boot_bsp(info: BootInfo) -> ! {
	crate::console::CONSOLE.lock().init(info.io_port);
	crate::logging::init();

	log::info!("booting (bsp apic id {})", info.bsp_apic_id);

	calibrate_tsc_frequency();

	let (mut regions, mmap_info) = mm::boot::parse(&info.regions);
	mm::boot::reserve_zero_page(&mut regions);
	mm::boot::reserve(&mut regions, u64::from(info.trampoline_page), mm::boot::PAGE_SIZE);
	log::info!(
		"memory: {} MiB total, {} MiB usable, {} regions",
		mmap_info.total_mem / (1024 * 1024),
		mmap_info.usable_ram / (1024 * 1024),
		mmap_info.num_regions,
	);

	let pool = largest_available_region(&regions).expect("no usable memory region found");
	let pool_order = (63 - pool.length.leading_zeros()) as u8; // floor(log2(length)): largest pow2 that fits
	assert!(pool_order >= MIN_POOL_ORDER, "largest usable region is too small for a buddy pool");
	mm::install_buddy_pool(pool.base as usize, pool_order, MIN_BLOCK_ORDER);

	CpuLocal::install(info.bsp_apic_id, 0);
	gdt::install(crate::mm::percpu_pool::alloc_ist_stacks());
	idt::load();
	apic::enable(apic::WAKEUP_VECTOR);

	apic::start_timer(processor::timer_initial_count(TIMER_HZ));

	let core_id = crate::arch::x86_64::percpu::core_id();
	let scheduler = alloc::boxed::Box::leak(alloc::boxed::Box::new(PerCpuScheduler::new(core_id)));
	CpuLocal::get().set_scheduler(scheduler);
	crate::arch::x86_64::ipi::register_core(core_id, info.bsp_apic_id);

	let mut flags = FlagRegistry::new();
	flags.register("verbose", |_args| {
		crate::logging::set_level(log::LevelFilter::Debug);
		Ok(())
	});
	if let Err(err) = flags.parse_and_dispatch(&info.cmdline) {
		log::warn!("failed to parse command line: {err:?}");
	}

	crate::mm::AddressSpace::create().expect("base address space already created");

	if let Err(err) = cpu::bring_up_all(&info.apic_ids, info.bsp_apic_id, info.trampoline_page) {
		log::warn!("SMP bring-up incomplete: {err:?}");
	} else if let Err(err) = cpu::wait_for_all_cores(info.apic_ids.len()) {
		log::warn!("not every core came online in time: {err:?}");
	}

	log::info!("boot complete, {} core(s) online", crate::arch::x86_64::percpu::online_cores());

	loop {
		crate::arch::x86_64::ipi::drain_local(core_id);
		crate::arch::x86_64::irq::enable_and_wait();
	}
}
