/// In-process simulated RAID controllers
///
/// A [`SimController`] answers the SDK contract and publishes the event
/// stream for one controller; [`SimCli`] answers the CLI contract for every
/// controller of a rig; [`SimPowerSwitch`] pulls and reinserts drives.
/// Background work (foreground initialization, rebuilds, firmware
/// activation, restarts) advances with the tokio clock, so tests running on
/// a paused clock see it complete as time is advanced.
pub mod builder;
pub mod cli;
pub mod power;
mod state;

pub use builder::{ControllerSpec, DriveSpec, SimProfile, SimRigBuilder};
pub use cli::SimCli;
pub use power::SimPowerSwitch;

use crate::config::TimingConfig;
use crate::harness::Harness;
use crate::model::{
    CapabilityGroup, ControllerEvent, ControllerHealth, ControllerSetting, DriveCommand,
    DriveFilter, DriveId, DriveRecord, DriverInfo, Enclosure, EnclosureSlot, LogicalVolume, OperationProgress,
    PretestSnapshot, SdkControllerInfo, VolumeId, VolumeSpec,
};
use crate::sdk::{CliReader, ControllerAdapter, EventSource};
use crate::VerifyResult;
use state::SimState;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_BUFFER: usize = 1024;

/// One simulated controller
pub struct SimController {
    ctrl: u32,
    state: Mutex<SimState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl SimController {
    /// Create the controller and start its background clock
    ///
    /// Must be called inside a tokio runtime. The clock task stops once the
    /// last handle to the controller is dropped.
    pub fn launch(ctrl: u32, spec: ControllerSpec, profile: SimProfile) -> Arc<Self> {
        let tick = profile.tick;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let controller = Arc::new(Self {
            ctrl,
            state: Mutex::new(SimState::new(ctrl, spec, profile, events.clone())),
            events,
        });

        let weak: Weak<Self> = Arc::downgrade(&controller);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                match weak.upgrade() {
                    Some(controller) => controller.tick(),
                    None => break,
                }
            }
        });

        tracing::debug!(ctrl, "simulated controller launched");
        controller
    }

    pub fn id(&self) -> u32 {
        self.ctrl
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) {
        self.lock().advance(Instant::now());
    }

    /// Run `f` against up-to-date state of an available controller
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut SimState, Instant) -> VerifyResult<T>) -> VerifyResult<T> {
        let now = Instant::now();
        let mut state = self.lock();
        state.advance(now);
        state.ensure_available()?;
        f(&mut state, now)
    }

    /// Power a drive down as a pulled carrier would
    pub fn pull_drive(&self, id: DriveId) -> VerifyResult<()> {
        let now = Instant::now();
        let mut state = self.lock();
        state.advance(now);
        state.pull(id)
    }

    /// Power a drive back up
    pub fn insert_drive(&self, id: DriveId) -> VerifyResult<()> {
        let now = Instant::now();
        let mut state = self.lock();
        state.advance(now);
        state.insert(id, now)
    }

    /// Drive installed at `location`, present or not
    pub fn drive_in_slot(&self, location: EnclosureSlot) -> Option<DriveId> {
        self.lock()
            .drives
            .values()
            .find(|d| d.record.location == location)
            .map(|d| d.record.id)
    }
}

impl std::fmt::Debug for SimController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimController").field("ctrl", &self.ctrl).finish()
    }
}

impl EventSource for SimController {
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }
}

impl ControllerAdapter for SimController {
    fn controller_id(&self) -> u32 {
        self.ctrl
    }

    fn firmware_version(&self) -> VerifyResult<String> {
        self.with_state(|s, _| Ok(s.info.firmware_version.clone()))
    }

    fn flash_firmware(&self, image: &Path) -> VerifyResult<()> {
        self.with_state(|s, now| s.flash(image, now))
    }

    fn restart(&self) -> VerifyResult<()> {
        self.with_state(|s, now| {
            s.restart(now);
            Ok(())
        })
    }

    fn controller_info(&self) -> VerifyResult<SdkControllerInfo> {
        self.with_state(|s, _| Ok(s.info.clone()))
    }

    fn driver_info(&self) -> VerifyResult<DriverInfo> {
        self.with_state(|s, _| Ok(s.driver.clone()))
    }

    fn health(&self) -> VerifyResult<ControllerHealth> {
        self.with_state(|s, _| Ok(s.health()))
    }

    fn capabilities(&self, group: CapabilityGroup) -> VerifyResult<BTreeMap<String, String>> {
        self.with_state(|s, _| Ok(s.capabilities(group)))
    }

    fn apply_setting(&self, setting: ControllerSetting) -> VerifyResult<()> {
        self.with_state(|s, _| {
            s.apply_setting(setting);
            Ok(())
        })
    }

    fn enclosures(&self) -> VerifyResult<Vec<Enclosure>> {
        self.with_state(|s, _| Ok(s.enclosures.clone()))
    }

    fn drives(&self, filter: &DriveFilter) -> VerifyResult<Vec<DriveRecord>> {
        self.with_state(|s, _| Ok(s.list_drives(filter)))
    }

    fn drive(&self, id: DriveId) -> VerifyResult<DriveRecord> {
        self.with_state(|s, _| Ok(s.present_drive(id)?.record.clone()))
    }

    fn drive_command(&self, id: DriveId, command: DriveCommand) -> VerifyResult<()> {
        self.with_state(|s, now| s.drive_command(id, command, now))
    }

    fn rebuild_progress(&self, id: DriveId) -> VerifyResult<OperationProgress> {
        self.with_state(|s, now| s.rebuild_progress(id, now))
    }

    fn create_volumes(&self, spec: &VolumeSpec) -> VerifyResult<Vec<VolumeId>> {
        self.with_state(|s, now| s.create_volumes(spec, now))
    }

    fn volumes(&self) -> VerifyResult<Vec<LogicalVolume>> {
        self.with_state(|s, _| Ok(s.volumes.values().map(|v| v.volume.clone()).collect()))
    }

    fn volume(&self, id: VolumeId) -> VerifyResult<LogicalVolume> {
        self.with_state(|s, _| Ok(s.volume(id)?.volume.clone()))
    }

    fn delete_volume(&self, id: VolumeId) -> VerifyResult<()> {
        self.with_state(|s, _| s.delete_volume(id))
    }

    fn clear_config(&self) -> VerifyResult<()> {
        self.with_state(|s, _| s.clear_config())
    }

    fn scan_foreign(&self) -> VerifyResult<usize> {
        self.with_state(|s, _| Ok(s.drives.values().filter(|d| d.present && d.record.is_foreign).count()))
    }

    fn clear_foreign(&self) -> VerifyResult<()> {
        self.with_state(|s, _| {
            for drive in s.drives.values_mut().filter(|d| d.present) {
                drive.record.is_foreign = false;
            }
            Ok(())
        })
    }

    fn capture_pretest(&self) -> VerifyResult<PretestSnapshot> {
        self.with_state(|s, _| Ok(s.capture_pretest()))
    }

    fn restore_pretest(&self, snapshot: &PretestSnapshot) -> VerifyResult<()> {
        self.with_state(|s, _| s.restore_pretest(snapshot))
    }
}

/// A set of simulated controllers with their CLI and power switch
#[derive(Debug, Clone)]
pub struct SimRig {
    pub controllers: Vec<Arc<SimController>>,
    pub cli: Arc<SimCli>,
    /// Wired to controller 0
    pub power: Option<Arc<SimPowerSwitch>>,
}

impl SimRig {
    pub fn builder() -> SimRigBuilder {
        SimRigBuilder::new()
    }

    pub fn controller(&self, ctrl: u32) -> Option<&Arc<SimController>> {
        self.controllers.iter().find(|c| c.id() == ctrl)
    }

    /// Harness bound to controller `ctrl`
    pub fn harness(&self, ctrl: u32, timing: TimingConfig) -> Option<Harness> {
        self.controller(ctrl).map(|controller| {
            Harness::new(
                Arc::clone(controller) as Arc<dyn ControllerAdapter>,
                Arc::clone(&self.cli) as Arc<dyn CliReader>,
                Arc::clone(controller) as Arc<dyn EventSource>,
                timing,
            )
        })
    }
}
