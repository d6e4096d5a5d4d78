//! Global descriptor table and per-core task-state segment.
//!
//! The teacher's own `gdt.rs` is built on the legacy `x86` crate's
//! `DescriptorBuilder`, which predates the modern `x86_64` 0.15 dependency
//! the rest of this kernel uses; this module is grounded on that modern
//! crate's [`x86_64::structures::gdt::GlobalDescriptorTable`] instead, kept
//! in the spirit of the teacher's one-GDT-per-core, dedicated-IST-per-fault
//! layout (see `arch::x86_64::kernel::gdt`).

use alloc::boxed::Box;

use x86_64::VirtAddr;
use x86_64::instructions::segmentation::{CS, DS, SS, Segment};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;

use crate::config::KERNEL_STACK_SIZE;

pub const IST_DOUBLE_FAULT: u16 = 0;
pub const IST_NMI: u16 = 1;
pub const IST_MACHINE_CHECK: u16 = 2;

/// Per-core descriptor state. One is leaked per core during bring-up, same
/// lifetime as [`crate::arch::x86_64::percpu::CpuLocal`].
struct CoreDescriptors {
	gdt: GlobalDescriptorTable,
	tss: TaskStateSegment,
}

/// Installs a fresh GDT and TSS for the calling core and switches the
/// segment registers over to it. Must run once per core during bring-up,
/// after the interrupt stack table slots have had their stacks allocated.
pub fn install(ist_stacks: [VirtAddr; 3]) {
	let mut tss = TaskStateSegment::new();
	tss.interrupt_stack_table[usize::from(IST_DOUBLE_FAULT)] = ist_stacks[0];
	tss.interrupt_stack_table[usize::from(IST_NMI)] = ist_stacks[1];
	tss.interrupt_stack_table[usize::from(IST_MACHINE_CHECK)] = ist_stacks[2];
	tss.privilege_stack_table[0] = alloc_kernel_stack_top();

	let descriptors = Box::leak(Box::new(CoreDescriptors {
		gdt: GlobalDescriptorTable::new(),
		tss,
	}));

	let code_selector = descriptors.gdt.append(Descriptor::kernel_code_segment());
	let data_selector = descriptors.gdt.append(Descriptor::kernel_data_segment());
	let tss_selector = descriptors
		.gdt
		.append(Descriptor::tss_segment(&descriptors.tss));

	descriptors.gdt.load();
	unsafe {
		load_selectors(code_selector, data_selector, tss_selector);
	}
}

unsafe fn load_selectors(code: SegmentSelector, data: SegmentSelector, tss: SegmentSelector) {
	unsafe {
		CS::set_reg(code);
		DS::set_reg(data);
		SS::set_reg(data);
		load_tss(tss);
	}
}

fn alloc_kernel_stack_top() -> VirtAddr {
	let stack = alloc::vec![0u8; KERNEL_STACK_SIZE].leak();
	VirtAddr::from_ptr(stack.as_ptr_range().end)
}
