//! Synchronization primitives (spec §4.3).
//!
//! Everything here is built from the bottom up: [`spinlock`] is the only
//! primitive that talks to the interrupt controller directly, and every
//! other primitive in this module is expressed in terms of it plus
//! [`waitqueue`].

pub mod barrier;
pub mod condvar;
pub mod future;
pub mod group;
pub mod rwlock;
pub mod spinlock;
pub mod waitqueue;

pub use barrier::{Barrier, CoreBarrier};
pub use condvar::CondVar;
pub use future::Future;
pub use group::{group_change_constraints, ThreadGroup};
pub use rwlock::RwSpinLock;
pub use spinlock::{Spinlock, SpinlockGuard, SpinlockIrqSave, SpinlockIrqSaveGuard};
pub use waitqueue::WaitQueue;
