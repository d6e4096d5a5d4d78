//! Minimal kernel console.
//!
//! The real VGA/serial console driver is an external collaborator (spec §1,
//! Non-goals); this module only carries the thin `core::fmt::Write` sink
//! that [`crate::logging`] and early boot diagnostics need, grounded on the
//! teacher's `COM1` static in `arch::x86_64::kernel::serial`.

use core::fmt;

use crate::sync::spinlock::SpinlockIrqSave;

#[cfg(target_arch = "x86_64")]
use uart_16550::SerialPort;

/// The primary kernel console, a 16550-compatible UART on COM1.
pub static CONSOLE: SpinlockIrqSave<Console> = SpinlockIrqSave::new(Console::new());

pub struct Console {
	#[cfg(target_arch = "x86_64")]
	port: Option<SerialPort>,
}

impl Console {
	const fn new() -> Self {
		Self {
			#[cfg(target_arch = "x86_64")]
			port: None,
		}
	}

	/// Brings up the backing UART. Called once during early boot, after
	/// interrupts are still disabled.
	#[cfg(target_arch = "x86_64")]
	pub fn init(&mut self, io_port: u16) {
		let mut serial = unsafe { SerialPort::new(io_port) };
		serial.init();
		self.port = Some(serial);
	}
}

impl fmt::Write for Console {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		#[cfg(target_arch = "x86_64")]
		if let Some(port) = self.port.as_mut() {
			use embedded_io::Write as _;
			for &byte in s.as_bytes() {
				let _ = port.write(&[byte]);
			}
		}
		let _ = s;
		Ok(())
	}
}
