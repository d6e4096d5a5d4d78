//! Kernel logger.
//!
//! Implements the `log` facade's [`log::Log`] trait on top of the kernel
//! console, the way a hosted binary would plug in `env_logger` — except the
//! sink is the serial console and every line is tagged with the emitting
//! core id so interleaved SMP output stays attributable.

use core::sync::atomic::{AtomicU8, Ordering};

use log::{LevelFilter, Log, Metadata, Record};

use crate::arch::percpu::core_id;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;
static LEVEL: AtomicU8 = AtomicU8::new(LevelFilter::Info as u8);

impl Log for KernelLogger {
	fn enabled(&self, metadata: &Metadata<'_>) -> bool {
		metadata.level() as u8 <= LEVEL.load(Ordering::Relaxed)
	}

	fn log(&self, record: &Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		println!("[{}][{}] {}", core_id(), record.level(), record.args());
	}

	fn flush(&self) {}
}

/// Installs the kernel logger as the global `log` sink.
///
/// Must be called once, before any other subsystem logs. Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(LevelFilter::Info);
	}
}

/// Changes the minimum level that reaches the console at runtime, e.g. in
/// response to a `-loglevel` kernel command line flag.
pub fn set_level(level: LevelFilter) {
	LEVEL.store(level as u8, Ordering::Relaxed);
	log::set_max_level(level);
}
