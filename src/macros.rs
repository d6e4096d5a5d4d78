//! Small helper macros used throughout the kernel.
//!
//! Kept deliberately minimal: alignment helpers and the `print!`/`println!`
//! pair that route through the kernel console rather than `core::fmt`'s
//! panic-on-error story.

/// Round `value` down to the next multiple of `alignment` (which must be a
/// power of two).
macro_rules! align_down {
	($value:expr, $alignment:expr) => {
		$value & !($alignment - 1)
	};
}

/// Round `value` up to the next multiple of `alignment` (which must be a
/// power of two).
macro_rules! align_up {
	($value:expr, $alignment:expr) => {
		align_down!($value + ($alignment - 1), $alignment)
	};
}

/// Print formatted text to the kernel console, without a trailing newline.
macro_rules! print {
	($($arg:tt)+) => ({
		use core::fmt::Write;
		let _ = write!($crate::console::CONSOLE.lock(), $($arg)+);
	});
}

/// Print formatted text to the kernel console, followed by a newline.
macro_rules! println {
	() => (print!("\n"));
	($($arg:tt)+) => ({
		print!($($arg)+);
		print!("\n");
	});
}
