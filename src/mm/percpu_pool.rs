//! Per-CPU kernel-memory pool (spec §3, CPU record's "per-CPU kernel-memory
//! pool").
//!
//! Bring-up only needs one consumer today: the interrupt-stack-table stacks
//! [`crate::arch::x86_64::gdt::install`] wires into the TSS. Carved the same
//! way `gdt`'s own privilege-stack-table entry is carved — a leaked heap
//! allocation, since IST stacks live for the lifetime of the core and are
//! never freed.

use alloc::vec;

use x86_64::VirtAddr;

use crate::config::KERNEL_STACK_SIZE;

fn alloc_stack_top() -> VirtAddr {
	let stack = vec![0u8; KERNEL_STACK_SIZE].leak();
	VirtAddr::from_ptr(stack.as_ptr_range().end)
}

/// Allocates the three interrupt-stack-table stacks (double fault, NMI,
/// machine check) a newly brought-up core needs before
/// [`crate::arch::x86_64::gdt::install`].
pub fn alloc_ist_stacks() -> [VirtAddr; 3] {
	[alloc_stack_top(), alloc_stack_top(), alloc_stack_top()]
}
