/// Collaborator contracts
///
/// The harness never talks to hardware directly. Everything it reads or
/// changes goes through one of these traits:
///
/// - [`ControllerAdapter`]: the management SDK, one instance per controller
/// - [`CliReader`]: the independent command-line read path used to cross-check
///   what the SDK reports
/// - [`EventSource`]: the controller's asynchronous event stream
/// - [`PowerSwitch`]: the remote power device that pulls and reinserts drives
///
/// All calls are synchronous and short; waiting is the harness's job.
use crate::model::{
    CapabilityGroup, CliProperties, ControllerEvent, ControllerHealth, ControllerSetting,
    DriveCommand, DriveFilter, DriveId, DriveRecord, DriverInfo, Enclosure, EnclosureSlot,
    LogicalVolume, OperationProgress, PretestSnapshot, SdkControllerInfo, VolumeId, VolumeSpec,
};
use crate::VerifyResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Management SDK for one controller
#[cfg_attr(test, mockall::automock)]
pub trait ControllerAdapter: Send + Sync {
    /// Controller index as addressed by the CLI
    fn controller_id(&self) -> u32;

    fn firmware_version(&self) -> VerifyResult<String>;

    /// Start flashing `image`; completion is observed by re-reading the version
    fn flash_firmware(&self, image: &Path) -> VerifyResult<()>;

    /// Reset the controller, dropping it from the bus until it comes back
    fn restart(&self) -> VerifyResult<()>;

    fn controller_info(&self) -> VerifyResult<SdkControllerInfo>;
    fn driver_info(&self) -> VerifyResult<DriverInfo>;
    fn health(&self) -> VerifyResult<ControllerHealth>;
    fn capabilities(&self, group: CapabilityGroup) -> VerifyResult<BTreeMap<String, String>>;
    fn apply_setting(&self, setting: ControllerSetting) -> VerifyResult<()>;

    fn enclosures(&self) -> VerifyResult<Vec<Enclosure>>;

    /// Drives currently present on the controller
    fn drives(&self, filter: &DriveFilter) -> VerifyResult<Vec<DriveRecord>>;
    fn drive(&self, id: DriveId) -> VerifyResult<DriveRecord>;
    fn drive_command(&self, id: DriveId, command: DriveCommand) -> VerifyResult<()>;
    fn rebuild_progress(&self, id: DriveId) -> VerifyResult<OperationProgress>;

    /// Create `spec.count` volumes; returns their ids in creation order
    fn create_volumes(&self, spec: &VolumeSpec) -> VerifyResult<Vec<VolumeId>>;
    fn volumes(&self) -> VerifyResult<Vec<LogicalVolume>>;
    fn volume(&self, id: VolumeId) -> VerifyResult<LogicalVolume>;
    fn delete_volume(&self, id: VolumeId) -> VerifyResult<()>;

    /// Delete every volume and hot spare
    fn clear_config(&self) -> VerifyResult<()>;

    /// Number of foreign configurations found on present drives
    fn scan_foreign(&self) -> VerifyResult<usize>;
    fn clear_foreign(&self) -> VerifyResult<()>;

    fn capture_pretest(&self) -> VerifyResult<PretestSnapshot>;
    fn restore_pretest(&self, snapshot: &PretestSnapshot) -> VerifyResult<()>;
}

/// Setting commands issued through the CLI path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CliSetting {
    CcRate(u8),
    BootDrive(VolumeId),
    Ocr(bool),
    /// Factory defaults, optionally restarting the controller afterwards
    FactoryDefaults { restart: bool },
}

impl fmt::Display for CliSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliSetting::CcRate(rate) => write!(f, "set ccrate={}", rate),
            CliSetting::BootDrive(vd) => write!(f, "set bootdrive={}", vd),
            CliSetting::Ocr(on) => write!(f, "set ocr={}", if *on { "on" } else { "off" }),
            CliSetting::FactoryDefaults { restart } => {
                write!(f, "set factory defaults")?;
                if *restart {
                    write!(f, " and restart")?;
                }
                Ok(())
            }
        }
    }
}

/// Independent command-line read path
///
/// Every call is addressed by controller index, the way the CLI addresses
/// `/c0`, `/c1` and so on.
#[cfg_attr(test, mockall::automock)]
pub trait CliReader: Send + Sync {
    fn controller_count(&self) -> VerifyResult<u32>;
    fn controller_properties(&self, ctrl: u32) -> VerifyResult<CliProperties>;
    fn enclosure_ids(&self, ctrl: u32) -> VerifyResult<Vec<u16>>;
    fn drive_properties(&self, ctrl: u32, location: EnclosureSlot) -> VerifyResult<CliProperties>;
    fn volume_properties(&self, ctrl: u32, volume: VolumeId) -> VerifyResult<CliProperties>;

    /// Rebuild progress of the `member`-th drive of `volume`
    fn rebuild_progress(
        &self,
        ctrl: u32,
        volume: VolumeId,
        member: usize,
    ) -> VerifyResult<OperationProgress>;
    fn init_progress(&self, ctrl: u32, volume: VolumeId) -> VerifyResult<OperationProgress>;

    fn cc_rate(&self, ctrl: u32) -> VerifyResult<u8>;
    /// `None` when no boot volume is set
    fn boot_drive(&self, ctrl: u32) -> VerifyResult<Option<VolumeId>>;
    fn cache_flush_interval(&self, ctrl: u32) -> VerifyResult<Duration>;
    fn ocr_enabled(&self, ctrl: u32) -> VerifyResult<bool>;

    fn apply(&self, ctrl: u32, setting: CliSetting) -> VerifyResult<()>;
}

/// Source of controller events
///
/// A receiver only sees events sent after it subscribed.
pub trait EventSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;
}

/// Kind of module behind a power-switch port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Drive carrier that can pull and reinsert one drive
    DriveCarrier,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerModule {
    pub id: u16,
    pub kind: ModuleKind,
    pub label: String,
}

impl PowerModule {
    pub fn is_drive_carrier(&self) -> bool {
        self.kind == ModuleKind::DriveCarrier
    }
}

/// Remote power device used to simulate drive removal
#[cfg_attr(test, mockall::automock)]
pub trait PowerSwitch: Send + Sync {
    fn modules(&self) -> VerifyResult<Vec<PowerModule>>;

    /// Power the module up (insert) or down (pull)
    fn set_power(&self, module: u16, up: bool) -> VerifyResult<()>;

    /// Release the connection to the device
    fn close(&self) -> VerifyResult<()>;
}
