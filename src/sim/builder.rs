// Simulated rig construction
//
// A rig is one or more simulated controllers sharing one CLI reader, plus an
// optional power switch wired to drive slots of the first controller.

use super::cli::SimCli;
use super::power::SimPowerSwitch;
use super::{SimController, SimRig};
use crate::model::units::GIB;
use crate::model::{
    ControllerRates, DriverInfo, Enclosure, EnclosureSlot, Interface, MediaType, SdkControllerInfo,
};
use std::sync::Arc;
use std::time::Duration;

/// How long simulated background work takes
#[derive(Debug, Clone, PartialEq)]
pub struct SimProfile {
    /// Foreground initialization of a new volume
    pub fgi: Duration,
    /// Rebuild of one drive
    pub rebuild: Duration,
    /// From flash request to the new firmware being active
    pub flash: Duration,
    /// Controller unavailable after a restart
    pub restart: Duration,
    /// Background clock granularity
    pub tick: Duration,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            fgi: Duration::from_secs(20),
            rebuild: Duration::from_secs(120),
            flash: Duration::from_secs(3),
            restart: Duration::from_secs(3),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveSpec {
    pub media: MediaType,
    pub interface: Interface,
    pub size_bytes: u64,
    pub firmware_revision: String,
    pub sector_size: u32,
    pub foreign: bool,
}

impl DriveSpec {
    pub fn sas_hdd(size_gib: u64) -> Self {
        Self {
            media: MediaType::HDD,
            interface: Interface::SAS,
            size_bytes: size_gib * GIB,
            firmware_revision: "A003".to_string(),
            sector_size: 512,
            foreign: false,
        }
    }

    pub fn sata_ssd(size_gib: u64) -> Self {
        Self {
            media: MediaType::SSD,
            interface: Interface::SATA,
            size_bytes: size_gib * GIB,
            firmware_revision: "GXM1103Q".to_string(),
            sector_size: 512,
            foreign: false,
        }
    }

    pub fn foreign(mut self) -> Self {
        self.foreign = true;
        self
    }

    /// Advanced-format drive with 4 KiB logical sectors
    pub fn native_4k(mut self) -> Self {
        self.sector_size = 4096;
        self
    }
}

/// One simulated controller's hardware
#[derive(Debug, Clone)]
pub struct ControllerSpec {
    pub info: SdkControllerInfo,
    pub driver: DriverInfo,
    pub enclosures: Vec<Enclosure>,
    pub drives: Vec<(EnclosureSlot, DriveSpec)>,
    pub ocr: bool,
    pub sas_address: String,
}

impl ControllerSpec {
    /// An external enclosure (id 8, 12 SAS HDDs) and a server backplane
    /// (id 252, 4 SAS HDDs)
    pub fn standard(index: u32) -> Self {
        let mut drives = Vec::new();
        for slot in 0..12 {
            drives.push((EnclosureSlot::new(8, slot), DriveSpec::sas_hdd(1000)));
        }
        for slot in 0..4 {
            drives.push((EnclosureSlot::new(252, slot), DriveSpec::sas_hdd(500)));
        }

        Self {
            info: SdkControllerInfo {
                firmware_version: "4.680.00-8249".to_string(),
                bios_version: "6.36.00.3_4.19.08.00_0x06180203".to_string(),
                product_name: "MegaRAID SAS 9361-8i".to_string(),
                pci_vendor_id: "4096".to_string(),
                pci_subvendor_id: "4096".to_string(),
                pci_subdevice_id: "37648".to_string(),
                alarm_enabled: false,
                memory_size_mb: 1024,
                rates: ControllerRates::default(),
                disable_auto_rebuild: false,
                restore_hot_spare_on_insertion: false,
            },
            driver: DriverInfo {
                name: "megaraid_sas".to_string(),
                version: "07.710.50.00-rc1".to_string(),
            },
            enclosures: vec![
                Enclosure {
                    id: 8,
                    backplane: false,
                    slot_count: 12,
                },
                Enclosure {
                    id: 252,
                    backplane: true,
                    slot_count: 8,
                },
            ],
            drives,
            ocr: true,
            sas_address: format!("0x500605b00a1c{:04x}", index),
        }
    }

    pub fn with_drives(mut self, drives: Vec<(EnclosureSlot, DriveSpec)>) -> Self {
        self.drives = drives;
        self
    }

    pub fn with_ocr(mut self, enabled: bool) -> Self {
        self.ocr = enabled;
        self
    }

    pub fn with_auto_rebuild(mut self, enabled: bool) -> Self {
        self.info.disable_auto_rebuild = !enabled;
        self
    }
}

/// Builds a [`SimRig`]
#[derive(Debug, Clone)]
pub struct SimRigBuilder {
    profile: SimProfile,
    controllers: Vec<ControllerSpec>,
    power_slots: Vec<EnclosureSlot>,
}

impl Default for SimRigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRigBuilder {
    /// One standard controller with four drive carriers on external slots 8-11
    pub fn new() -> Self {
        Self {
            profile: SimProfile::default(),
            controllers: vec![ControllerSpec::standard(0)],
            power_slots: (8..12).map(|slot| EnclosureSlot::new(8, slot)).collect(),
        }
    }

    pub fn profile(mut self, profile: SimProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Use `count` standard controllers
    pub fn controllers(mut self, count: u32) -> Self {
        self.controllers = (0..count.max(1)).map(ControllerSpec::standard).collect();
        self
    }

    /// Replace the spec of controller `index`
    pub fn controller(mut self, index: usize, spec: ControllerSpec) -> Self {
        if index < self.controllers.len() {
            self.controllers[index] = spec;
        } else {
            self.controllers.push(spec);
        }
        self
    }

    /// Drive slots of controller 0 wired to power-switch modules, in module order
    pub fn power_slots(mut self, slots: Vec<EnclosureSlot>) -> Self {
        self.power_slots = slots;
        self
    }

    /// Build the rig; must be called inside a tokio runtime
    pub fn build(self) -> SimRig {
        let controllers: Vec<Arc<SimController>> = self
            .controllers
            .into_iter()
            .enumerate()
            .map(|(index, spec)| SimController::launch(index as u32, spec, self.profile.clone()))
            .collect();

        let cli = Arc::new(SimCli::new(controllers.clone()));
        let power = controllers
            .first()
            .map(|first| Arc::new(SimPowerSwitch::new(Arc::clone(first), self.power_slots.clone())));

        SimRig {
            controllers,
            cli,
            power,
        }
    }
}
