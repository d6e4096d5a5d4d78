//! x86-64 backend: the only architecture this kernel targets (spec §1).

pub mod apic;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod ipi;
pub mod irq;
pub mod percpu;
pub mod processor;
pub mod start;
pub mod switch;

pub use percpu::{core_id, CoreId, CpuLocal};
