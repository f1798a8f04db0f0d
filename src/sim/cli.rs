// Simulated CLI read path
//
// Renders controller state the way the command-line tool does: hex PCI ids,
// MiB capacities, short state codes and "-1" progress sentinels behind the
// typed `OperationProgress`.

use super::SimController;
use crate::model::{CliProperties, EnclosureSlot, OperationProgress, VolumeId};
use crate::sdk::{CliReader, CliSetting};
use crate::{VerifyError, VerifyResult};
use std::sync::Arc;
use std::time::Duration;

/// CLI over every controller of a simulated rig
#[derive(Debug, Clone)]
pub struct SimCli {
    controllers: Vec<Arc<SimController>>,
}

impl SimCli {
    pub fn new(controllers: Vec<Arc<SimController>>) -> Self {
        Self { controllers }
    }

    fn controller(&self, ctrl: u32) -> VerifyResult<&SimController> {
        self.controllers
            .iter()
            .find(|c| c.id() == ctrl)
            .map(Arc::as_ref)
            .ok_or_else(|| VerifyError::Collaborator(format!("controller /c{} not found", ctrl)))
    }
}

impl CliReader for SimCli {
    fn controller_count(&self) -> VerifyResult<u32> {
        Ok(self.controllers.len() as u32)
    }

    fn controller_properties(&self, ctrl: u32) -> VerifyResult<CliProperties> {
        self.controller(ctrl)?.with_state(|s, _| s.controller_properties())
    }

    fn enclosure_ids(&self, ctrl: u32) -> VerifyResult<Vec<u16>> {
        self.controller(ctrl)?
            .with_state(|s, _| Ok(s.enclosures.iter().map(|e| e.id).collect()))
    }

    fn drive_properties(&self, ctrl: u32, location: EnclosureSlot) -> VerifyResult<CliProperties> {
        self.controller(ctrl)?
            .with_state(|s, _| s.drive_properties(location))
    }

    fn volume_properties(&self, ctrl: u32, volume: VolumeId) -> VerifyResult<CliProperties> {
        self.controller(ctrl)?
            .with_state(|s, _| s.volume_properties(volume))
    }

    fn rebuild_progress(
        &self,
        ctrl: u32,
        volume: VolumeId,
        member: usize,
    ) -> VerifyResult<OperationProgress> {
        self.controller(ctrl)?.with_state(|s, now| {
            let drive = s
                .volume(volume)?
                .volume
                .members
                .get(member)
                .copied()
                .ok_or_else(|| {
                    VerifyError::Collaborator(format!("{} has no member #{}", volume, member))
                })?;
            s.rebuild_progress(drive, now)
        })
    }

    fn init_progress(&self, ctrl: u32, volume: VolumeId) -> VerifyResult<OperationProgress> {
        self.controller(ctrl)?
            .with_state(|s, now| s.init_progress(volume, now))
    }

    fn cc_rate(&self, ctrl: u32) -> VerifyResult<u8> {
        self.controller(ctrl)?.with_state(|s, _| Ok(s.info.rates.cc))
    }

    fn boot_drive(&self, ctrl: u32) -> VerifyResult<Option<VolumeId>> {
        self.controller(ctrl)?.with_state(|s, _| Ok(s.boot_drive))
    }

    fn cache_flush_interval(&self, ctrl: u32) -> VerifyResult<Duration> {
        self.controller(ctrl)?.with_state(|s, _| Ok(s.cache_flush))
    }

    fn ocr_enabled(&self, ctrl: u32) -> VerifyResult<bool> {
        self.controller(ctrl)?.with_state(|s, _| Ok(s.ocr))
    }

    fn apply(&self, ctrl: u32, setting: CliSetting) -> VerifyResult<()> {
        tracing::debug!(ctrl, %setting, "cli command");
        self.controller(ctrl)?.with_state(|s, now| {
            match setting {
                CliSetting::CcRate(rate) => {
                    if rate > 100 {
                        return Err(VerifyError::Collaborator(format!(
                            "ccrate {} out of range",
                            rate
                        )));
                    }
                    s.info.rates.cc = rate;
                }
                CliSetting::BootDrive(volume) => {
                    s.volume(volume)?;
                    s.boot_drive = Some(volume);
                }
                CliSetting::Ocr(enabled) => s.ocr = enabled,
                CliSetting::FactoryDefaults { restart } => s.factory_defaults(restart, now),
            }
            Ok(())
        })
    }
}
