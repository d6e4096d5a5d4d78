//! Interrupt enable/disable primitives.
//!
//! `nested_disable`/`nested_enable` are the pair every lock in [`crate::sync`]
//! builds on: disable unconditionally, remember whether interrupts were
//! already off, and only turn them back on if they weren't.

use x86_64::instructions::interrupts;

/// Disables interrupts unconditionally.
#[inline]
pub fn disable() {
	interrupts::disable();
}

/// Enables interrupts unconditionally.
#[inline]
pub fn enable() {
	interrupts::enable();
}

/// Enables interrupts and immediately halts until the next one arrives.
/// Used by the idle loop (spec §4.2, "Idle and power management").
#[inline]
pub fn enable_and_wait() {
	interrupts::enable_and_hlt();
}

/// Disables interrupts and reports whether they were enabled beforehand.
///
/// Pair with [`nested_enable`] to restore the pre-call state rather than
/// blindly re-enabling interrupts, which would be wrong when called from
/// inside a region that already had them off.
#[inline]
pub fn nested_disable() -> bool {
	let was_enabled = interrupts::are_enabled();
	disable();
	was_enabled
}

/// Restores the interrupt state captured by [`nested_disable`].
#[inline]
pub fn nested_enable(was_enabled: bool) {
	if was_enabled {
		enable();
	}
}
