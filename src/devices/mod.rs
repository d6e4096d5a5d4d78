//! The typed device registry and its core-observable driver contracts
//! (spec §3, §6).

pub mod registry;

pub use registry::{
	BlockCharacteristics, BlockDevice, Callback, CharCharacteristics, CharDevice, Device, DeviceKind,
	NetCharacteristics, NetDevice, Status,
};
