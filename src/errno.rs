//! Error kinds returned by core entry points.
//!
//! Recoverable failures are always returned as a typed [`Error`] from public
//! entry points (spec §7). The IRQ handler path never surfaces one of these:
//! it either consumes the interrupt or treats it as [`Error::Fatal`] and
//! stops the world.

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

/// The error kinds used throughout the core, mirroring spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The boot allocator or the buddy allocator could not satisfy a request.
	#[error("out of memory")]
	OutOfMemory,
	/// An invalid IRQ number, thread id, null handler, or out-of-range region
	/// was supplied.
	#[error("bad parameter")]
	BadParameter,
	/// The operation requires a subsystem that has not been brought up yet.
	#[error("subsystem not initialized")]
	NotInitialized,
	/// Two owners were registered for one IRQ, or a singleton was created
	/// twice.
	#[error("conflicting registration")]
	Conflict,
	/// A barrier was destroyed with waiters still attached, a try-lock was
	/// contended, or non-blocking I/O had no data available.
	#[error("resource busy")]
	Busy,
	/// The base address space rejected a mutation, or a driver is missing a
	/// required callback.
	#[error("operation not supported")]
	NotSupported,
	/// AP bring-up or a watchdog timer did not complete within its bound.
	#[error("operation timed out")]
	Timeout,
	/// The target of a join/wait no longer exists or was never joinable.
	#[error("no such task")]
	NotJoinable,
	/// An unhandled exception, double fault, or corrupt page table state.
	/// Observing this is always followed by `panic!`.
	#[error("fatal condition")]
	Fatal,
}
