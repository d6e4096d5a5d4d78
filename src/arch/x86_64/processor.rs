//! CPU feature detection and low-level timing helpers.
//!
//! Condensed from the teacher's `arch::x86_64::kernel::processor`: keeps the
//! `rdtsc`-based timestamp/`udelay` pair (needed for AP bring-up's
//! post-STARTUP-IPI spin-wait) and the x2APIC/TSC-deadline feature probes
//! the bring-up path checks before arming them.

use core::arch::x86_64::{__rdtscp, _mm_lfence};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU16, Ordering};

use raw_cpuid::CpuId;

static CPU_FREQUENCY_MHZ: AtomicU16 = AtomicU16::new(0);

pub struct Features {
	pub supports_x2apic: bool,
	pub supports_tsc_deadline: bool,
	pub supports_rdtscp: bool,
}

/// Probes CPUID once at boot on the BSP; APs reuse the result since it
/// describes properties shared by all cores in a homogeneous SMP machine.
pub fn detect_features() -> Features {
	let cpuid = CpuId::new();
	let features = cpuid.get_feature_info();
	let extended = cpuid.get_extended_processor_and_feature_identifiers();

	Features {
		supports_x2apic: features.as_ref().is_some_and(|f| f.has_x2apic()),
		supports_tsc_deadline: features.as_ref().is_some_and(|f| f.has_tsc_deadline()),
		supports_rdtscp: extended.as_ref().is_some_and(|f| f.has_rdtscp()),
	}
}

/// Records the TSC frequency in MHz, measured once during boot by timing a
/// known interval against a calibrated source (e.g. the PIT).
pub fn set_frequency_mhz(mhz: u16) {
	CPU_FREQUENCY_MHZ.store(mhz, Ordering::Relaxed);
}

pub fn frequency_mhz() -> u16 {
	CPU_FREQUENCY_MHZ.load(Ordering::Relaxed)
}

/// Local APIC timer reload count for a periodic tick at `hz`, assuming the
/// timer's divide-by-1 bus clock runs at the same rate as the TSC (true on
/// every invariant-TSC x2APIC machine this kernel targets).
pub fn timer_initial_count(hz: u64) -> u32 {
	((u64::from(frequency_mhz()) * 1_000_000 / hz).max(1)) as u32
}

/// Reads the timestamp counter, serializing around the read so it can't be
/// reordered past neighboring instructions.
#[inline]
pub fn timestamp() -> u64 {
	unsafe {
		_mm_lfence();
		let mut aux: u32 = 0;
		let value = __rdtscp(&mut aux);
		_mm_lfence();
		value
	}
}

/// Busy-waits for approximately `usecs` microseconds. Only used during
/// bring-up before the local APIC timer is armed; everything after that
/// uses [`crate::time`] instead.
pub fn udelay(usecs: u64) {
	let freq = u64::from(frequency_mhz()).max(1);
	let end = timestamp() + freq * usecs;
	while timestamp() < end {
		spin_loop();
	}
}
