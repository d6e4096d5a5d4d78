//! Compile-time tunables.
//!
//! Grounded on the teacher's `config.rs`, extended with the sizes spec.md
//! names explicitly (§3, §4.1, §4.2).

/// Default kernel-mode stack size for a new thread.
pub const KERNEL_STACK_SIZE: usize = 0x8000;

/// Default stack size when a caller does not request one explicitly.
pub const DEFAULT_STACK_SIZE: usize = 0x40000;

/// Timer tick frequency used to derive each CPU's scheduling quantum.
pub const TIMER_HZ: u64 = 100;

/// Upper bound on the number of CPUs the bring-up sequence will discover.
pub const MAX_CPUS: usize = 256;

/// Number of thread-local-storage keys available per thread (spec §4.2: "a
/// fixed number of keys (≥128)").
pub const NO_TLS_KEYS: usize = 128;

/// Number of distinct scheduling priorities.
pub const NO_PRIORITIES: usize = 32;

/// Wall-time bound for a single STARTUP IPI round during AP bring-up.
pub const AP_STARTUP_TIMEOUT_MS: u64 = 10;

/// Wall-time bound for the whole AP bring-up sequence (INIT + two STARTUPs).
pub const AP_BRINGUP_TIMEOUT_MS: u64 = 100;

/// Upper bound on wait-queue slots a single wait queue reserves.
pub const WAIT_QUEUE_CAPACITY: usize = 64;

/// Bound on TLS-destructor passes run at thread exit (spec §4.2).
pub const TLS_DESTRUCTOR_ITERATIONS: usize = 4;
