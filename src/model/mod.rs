// Data model shared by the harness, the SDK contracts and the simulator
//
// - drive.rs: physical drive identity, location, state, progress
// - volume.rs: logical volumes, RAID levels, lifecycle, cache policy
// - event.rs: controller AENs and expectation scopes
// - controller.rs: controller properties from both read paths
// - units.rs: capacity units and size strings

pub mod controller;
pub mod drive;
pub mod event;
pub mod units;
pub mod volume;

pub use controller::{
    CapabilityGroup, CliProperties, ControllerHealth, ControllerRates, ControllerSetting,
    ControllerSnapshot, DriverInfo, Enclosure, PretestSnapshot, SdkControllerInfo,
};
pub use drive::{
    DriveCommand, DriveFilter, DriveId, DriveRecord, DriveState, EnclosureSlot, Interface,
    MediaType, OperationProgress,
};
pub use event::{ControllerEvent, EventKind, EventScope};
pub use volume::{
    CachePolicy, InitMode, IoPolicy, LifecycleTracker, LogicalVolume, RaidLevel, ReadPolicy,
    VolumeId, VolumeSpec, VolumeState, WritePolicy,
};
