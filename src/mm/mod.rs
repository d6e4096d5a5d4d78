//! Memory management: boot memory map, the buddy allocator, the base
//! address space, and per-CPU kernel memory (spec §4.4).

pub mod allocator;
pub mod aspace;
pub mod boot;
pub mod buddy;
pub mod percpu_pool;

pub use allocator::{install_buddy_pool, KernelAllocator};
pub use aspace::AddressSpace;
pub use boot::{MmapInfo, RawRegion, Region, RegionKind};
pub use buddy::BuddyAllocator;
