//! Local APIC and I/O APIC driver.
//!
//! Grounded on the teacher's `arch::x86_64::kernel::apic`, rewritten against
//! the x2APIC MSR interface only (the xAPIC memory-mapped fallback the
//! teacher carries for pre-2008 hardware is out of scope here — spec §1
//! targets current SMP hardware).

use x86_64::registers::model_specific::Msr;

const IA32_X2APIC_APICID: u32 = 0x802;
const IA32_X2APIC_ICR: u32 = 0x830;
const IA32_X2APIC_EOI: u32 = 0x80b;
const IA32_X2APIC_SIVR: u32 = 0x80f;
const IA32_X2APIC_LVT_TIMER: u32 = 0x832;
const IA32_X2APIC_TIMER_DIV: u32 = 0x83e;
const IA32_X2APIC_TIMER_ICR: u32 = 0x838;

const ICR_DELIVERY_MODE_FIXED: u64 = 0 << 8;
const ICR_DELIVERY_MODE_INIT: u64 = 5 << 8;
const ICR_DELIVERY_MODE_STARTUP: u64 = 6 << 8;
const ICR_LEVEL_ASSERT: u64 = 1 << 14;
const ICR_TRIGGER_LEVEL: u64 = 1 << 15;

/// Interrupt vector used to wake a core parked in `hlt` (spec §4.2).
pub const WAKEUP_VECTOR: u8 = 0xf0;
/// Interrupt vector used to deliver a cross-call request (spec §4.1).
pub const CROSS_CALL_VECTOR: u8 = 0xf1;
/// Interrupt vector the local APIC timer fires on.
pub const TIMER_VECTOR: u8 = 0xf2;

unsafe fn read(reg: u32) -> u64 {
	unsafe { Msr::new(reg).read() }
}

unsafe fn write(reg: u32, value: u64) {
	unsafe { Msr::new(reg).write(value) };
}

/// Reads this core's local APIC id directly from the hardware.
pub fn local_apic_id() -> u32 {
	unsafe { read(IA32_X2APIC_APICID) as u32 }
}

/// Signals end-of-interrupt to the local APIC. Must be called from every
/// interrupt handler that was dispatched through the APIC.
pub fn eoi() {
	unsafe { write(IA32_X2APIC_EOI, 0) };
}

/// Enables the local APIC and arms its spurious-interrupt vector.
pub fn enable(spurious_vector: u8) {
	unsafe {
		let sivr = read(IA32_X2APIC_SIVR);
		write(IA32_X2APIC_SIVR, sivr | (1 << 8) | u64::from(spurious_vector));
	}
}

/// Arms the local APIC timer in periodic mode at `initial_count`.
pub fn start_timer(initial_count: u32) {
	unsafe {
		write(IA32_X2APIC_TIMER_DIV, 0b1011); // divide by 1
		write(IA32_X2APIC_LVT_TIMER, (1 << 17) | u64::from(TIMER_VECTOR)); // periodic
		write(IA32_X2APIC_TIMER_ICR, u64::from(initial_count));
	}
}

fn send_ipi(destination_apic_id: u32, flags: u64) {
	let icr = (u64::from(destination_apic_id) << 32) | flags;
	unsafe { write(IA32_X2APIC_ICR, icr) };
}

/// Sends a fixed-vector IPI to a single APIC id (spec §4.1, cross-calls and
/// core-wakeup IPIs both funnel through this).
pub fn send_fixed(destination_apic_id: u32, vector: u8) {
	send_ipi(
		destination_apic_id,
		ICR_LEVEL_ASSERT | ICR_DELIVERY_MODE_FIXED | u64::from(vector),
	);
}

/// Sends an INIT IPI, step one of AP bring-up (spec §4.1).
pub fn send_init(destination_apic_id: u32) {
	send_ipi(
		destination_apic_id,
		ICR_LEVEL_ASSERT | ICR_TRIGGER_LEVEL | ICR_DELIVERY_MODE_INIT,
	);
}

/// Sends a STARTUP IPI pointing the AP at `trampoline_page`, step two of AP
/// bring-up. `trampoline_page` must be a page-aligned address below 1 MiB.
pub fn send_startup(destination_apic_id: u32, trampoline_page: u32) {
	debug_assert_eq!(trampoline_page & 0xfff, 0);
	send_ipi(
		destination_apic_id,
		ICR_DELIVERY_MODE_STARTUP | u64::from(trampoline_page >> 12),
	);
}
