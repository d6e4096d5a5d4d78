//! Architecture-specific glue.
//!
//! The kernel targets bare x86-64 SMP machines only (spec §1); unlike the
//! teacher, which fans out to aarch64 and riscv64 under this module, there
//! is exactly one arch backend here. It stays behind its own module instead
//! of being inlined at the crate root so the seam is there if a second
//! architecture is ever worth the cost.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::*;
