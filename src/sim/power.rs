// Simulated remote power switch
//
// Each drive-carrier module powers one slot of a simulated controller.
// Powering a module down pulls the drive; powering it up reinserts it.

use super::SimController;
use crate::model::EnclosureSlot;
use crate::sdk::{ModuleKind, PowerModule, PowerSwitch};
use crate::{VerifyError, VerifyResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Module id of the chassis fan tray, which carries no drive
const FAN_MODULE: u16 = 99;

#[derive(Debug)]
pub struct SimPowerSwitch {
    controller: Arc<SimController>,
    slots: Vec<EnclosureSlot>,
    closed: AtomicBool,
}

impl SimPowerSwitch {
    /// Module `n` powers `slots[n]`
    pub fn new(controller: Arc<SimController>, slots: Vec<EnclosureSlot>) -> Self {
        Self {
            controller,
            slots,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn slot(&self, module: u16) -> VerifyResult<EnclosureSlot> {
        self.slots
            .get(usize::from(module))
            .copied()
            .ok_or_else(|| VerifyError::Collaborator(format!("power module {} is not a drive carrier", module)))
    }
}

impl PowerSwitch for SimPowerSwitch {
    fn modules(&self) -> VerifyResult<Vec<PowerModule>> {
        let mut modules: Vec<PowerModule> = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| PowerModule {
                id: index as u16,
                kind: ModuleKind::DriveCarrier,
                label: format!("dtab {}", slot),
            })
            .collect();
        modules.push(PowerModule {
            id: FAN_MODULE,
            kind: ModuleKind::Other,
            label: "fan tray".to_string(),
        });
        Ok(modules)
    }

    fn set_power(&self, module: u16, up: bool) -> VerifyResult<()> {
        if self.is_closed() {
            return Err(VerifyError::Collaborator("power switch connection closed".to_string()));
        }
        let slot = self.slot(module)?;
        let drive = self
            .controller
            .drive_in_slot(slot)
            .ok_or_else(|| VerifyError::Collaborator(format!("no drive installed at {}", slot)))?;

        tracing::debug!(module, %slot, up, "power switch");
        if up {
            self.controller.insert_drive(drive)
        } else {
            self.controller.pull_drive(drive)
        }
    }

    fn close(&self) -> VerifyResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DriveFilter;
    use crate::sdk::ControllerAdapter;
    use crate::sim::SimRig;

    #[tokio::test(start_paused = true)]
    async fn test_module_power_pulls_and_reinserts_drive() {
        let rig = SimRig::builder().build();
        let power = rig.power.clone().unwrap();
        let controller = rig.controller(0).unwrap();
        let before = controller.drives(&DriveFilter::any()).unwrap().len();

        power.set_power(0, false).unwrap();
        assert_eq!(controller.drives(&DriveFilter::any()).unwrap().len(), before - 1);

        power.set_power(0, true).unwrap();
        assert_eq!(controller.drives(&DriveFilter::any()).unwrap().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_carrier_module_listed_but_not_switchable() {
        let rig = SimRig::builder().build();
        let power = rig.power.clone().unwrap();

        let modules = power.modules().unwrap();
        assert_eq!(modules.iter().filter(|m| m.is_drive_carrier()).count(), 4);
        assert!(power.set_power(FAN_MODULE, false).is_err());

        power.close().unwrap();
        assert!(power.set_power(0, true).is_err());
    }
}
