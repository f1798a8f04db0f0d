/// Rig and session builders over the simulated controllers
use raid_verify::model::{DriveId, EnclosureSlot};
use raid_verify::sdk::PowerSwitch;
use raid_verify::session::SessionParams;
use raid_verify::sim::{ControllerSpec, DriveSpec, SimRig};
use raid_verify::{Harness, Session, TimingConfig};
use std::path::PathBuf;
use std::sync::Arc;

pub const FIRMWARE_IMAGE: &str = "4.680.01-8250.rom";

pub fn timing() -> TimingConfig {
    TimingConfig::compressed()
}

/// Default rig: one standard controller, four carriers on slots 8:8 - 8:11
pub fn rig() -> SimRig {
    SimRig::builder().build()
}

pub fn harness(rig: &SimRig, ctrl: u32) -> Harness {
    rig.harness(ctrl, timing())
        .unwrap_or_else(|| panic!("controller {} not in rig", ctrl))
}

/// Session on controller 0 with every other controller as a peer and the
/// rig's power switch attached
pub fn session(rig: &SimRig) -> Session {
    let peers = rig
        .controllers
        .iter()
        .skip(1)
        .map(|c| harness(rig, c.id()))
        .collect();
    let mut session = Session::new(harness(rig, 0))
        .with_peers(peers)
        .with_params(SessionParams {
            firmware_image: Some(PathBuf::from(FIRMWARE_IMAGE)),
        });
    if let Some(power) = &rig.power {
        session = session.with_power(Arc::clone(power) as Arc<dyn PowerSwitch>);
    }
    session
}

/// Standard controller whose external slots in `sata_slots` hold SATA SSDs
pub fn controller_with_sata(index: u32, sata_slots: &[u16]) -> ControllerSpec {
    let standard = ControllerSpec::standard(index);
    let drives = standard
        .drives
        .iter()
        .map(|(location, spec)| {
            if location.enclosure == 8 && sata_slots.contains(&location.slot) {
                (*location, DriveSpec::sata_ssd(960))
            } else {
                (*location, spec.clone())
            }
        })
        .collect();
    standard.with_drives(drives)
}

/// Drive installed at `enclosure:slot` on controller `ctrl`
pub fn drive_at(rig: &SimRig, ctrl: u32, enclosure: u16, slot: u16) -> DriveId {
    rig.controller(ctrl)
        .and_then(|c| c.drive_in_slot(EnclosureSlot::new(enclosure, slot)))
        .unwrap_or_else(|| panic!("no drive at {}:{} on controller {}", enclosure, slot, ctrl))
}
