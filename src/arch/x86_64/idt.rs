//! Interrupt descriptor table: CPU exception gates plus the kernel's own
//! vectors (timer, cross-call, wakeup).
//!
//! Grounded on the teacher's `arch::x86_64::kernel::interrupts`, trimmed to
//! the exceptions a single-address-space kernel actually needs to handle
//! (no page fault recovery, since there is exactly one address space and a
//! fault in it is always fatal — spec §5, "Non-goals").

use x86_64::set_general_handler;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use crate::arch::x86_64::apic;
use crate::arch::x86_64::percpu::{core_id, CpuLocal};
use crate::arch::x86_64::{cpu, ipi};

static mut IDT: InterruptDescriptorTable = InterruptDescriptorTable::new();

pub fn load() {
	let idt = unsafe { &mut *core::ptr::addr_of_mut!(IDT) };

	idt.divide_error.set_handler_fn(fatal_exception);
	idt.debug.set_handler_fn(fatal_exception);
	idt.non_maskable_interrupt.set_handler_fn(fatal_exception);
	idt.breakpoint.set_handler_fn(fatal_exception);
	idt.overflow.set_handler_fn(fatal_exception);
	idt.bound_range_exceeded.set_handler_fn(fatal_exception);
	idt.invalid_opcode.set_handler_fn(fatal_exception);
	idt.device_not_available.set_handler_fn(fatal_exception);
	unsafe {
		idt.double_fault.set_handler_fn(fatal_double_fault);
	}
	idt.invalid_tss.set_handler_fn(fatal_exception_code);
	idt.segment_not_present.set_handler_fn(fatal_exception_code);
	idt.stack_segment_fault.set_handler_fn(fatal_exception_code);
	idt.general_protection_fault
		.set_handler_fn(fatal_exception_code);
	idt.page_fault.set_handler_fn(fatal_page_fault);
	idt.x87_floating_point.set_handler_fn(fatal_exception);
	idt.alignment_check.set_handler_fn(fatal_exception_code);
	unsafe {
		idt.machine_check.set_handler_fn(fatal_machine_check);
	}
	idt.simd_floating_point.set_handler_fn(fatal_exception);

	set_general_handler!(idt, unknown, 32..=255);

	idt[usize::from(apic::TIMER_VECTOR)].set_handler_fn(timer_interrupt);
	idt[usize::from(apic::CROSS_CALL_VECTOR)].set_handler_fn(cross_call_interrupt);
	idt[usize::from(apic::WAKEUP_VECTOR)].set_handler_fn(wakeup_interrupt);

	unsafe {
		idt.load_unsafe();
	}
}

fn unknown(_stack_frame: InterruptStackFrame, index: u8, _error_code: Option<u64>) {
	log::warn!("unhandled interrupt vector {index}");
	apic::eoi();
}

extern "x86-interrupt" fn fatal_exception(frame: InterruptStackFrame) {
	log::error!("fatal CPU exception on core {}: {:#?}", core_id(), frame);
	cpu::halt_forever();
}

extern "x86-interrupt" fn fatal_exception_code(frame: InterruptStackFrame, code: u64) {
	log::error!(
		"fatal CPU exception on core {}: {:#?}, code {:#x}",
		core_id(),
		frame,
		code
	);
	cpu::halt_forever();
}

extern "x86-interrupt" fn fatal_double_fault(frame: InterruptStackFrame, code: u64) -> ! {
	log::error!("double fault on core {}: {:#?}, code {:#x}", core_id(), frame, code);
	cpu::halt_forever();
}

extern "x86-interrupt" fn fatal_machine_check(frame: InterruptStackFrame) -> ! {
	log::error!("machine check on core {}: {:#?}", core_id(), frame);
	cpu::halt_forever();
}

extern "x86-interrupt" fn fatal_page_fault(
	frame: InterruptStackFrame,
	code: x86_64::structures::idt::PageFaultErrorCode,
) {
	let addr = x86_64::registers::control::Cr2::read();
	log::error!(
		"page fault on core {} at {:?}: {:#?}, code {:?}",
		core_id(),
		addr,
		frame,
		code
	);
	cpu::halt_forever();
}

extern "x86-interrupt" fn timer_interrupt(_frame: InterruptStackFrame) {
	apic::eoi();
	crate::time::tick(core_id());
	if CpuLocal::get().preemptible() {
		CpuLocal::get().scheduler().reschedule();
	}
}

extern "x86-interrupt" fn cross_call_interrupt(_frame: InterruptStackFrame) {
	apic::eoi();
	ipi::drain_local(core_id());
}

extern "x86-interrupt" fn wakeup_interrupt(_frame: InterruptStackFrame) {
	apic::eoi();
	// Nothing to do: the point of this vector is only to break `hlt`.
}
