//! Nautilus: a single-address-space AeroKernel core for bare x86-64 SMP
//! machines.
//!
//! This crate is the portable kernel core, not a bootable image: it has no
//! `_start` symbol and no panic handler of its own. A platform-specific
//! front end (outside this crate, per the firmware/bootloader non-goals
//! documented on [`arch::x86_64::start`]) parses Multiboot2/SFI/e820/HRT
//! boot info into an [`arch::x86_64::start::BootInfo`], supplies the
//! assembly entry stub and a `#[panic_handler]`, and calls
//! [`arch::x86_64::start::boot_bsp`] to hand control to this crate.

#![no_std]

extern crate alloc;

#[macro_use]
mod macros;

pub mod arch;
pub mod config;
pub mod console;
pub mod devices;
pub mod env;
pub mod errno;
pub mod logging;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod time;

/// The kernel's heap. Every `alloc`/`Box`/`Vec`/`Arc` allocation in this
/// crate, including ones made before [`mm::install_buddy_pool`] has run,
/// flows through here.
#[global_allocator]
static ALLOCATOR: mm::KernelAllocator = mm::KernelAllocator;
