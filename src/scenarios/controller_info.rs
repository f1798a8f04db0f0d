// Controller information scenario
//
// Flashes new firmware, then checks that the SDK and CLI agree on
// controller identity, driver, rates, enclosure and per-drive properties.
// Two RAID-0 volumes on backplane drives exercise the health counters.

use super::common;
use crate::harness::{check_capacity, cross_check, Normalization, Reading};
use crate::model::units::GIB;
use crate::model::{
    CapabilityGroup, DriveFilter, DriveId, Interface, LifecycleTracker, RaidLevel, VolumeSpec,
    VolumeState,
};
use crate::runner::Scenario;
use crate::sdk::CliSetting;
use crate::session::Session;
use crate::{VerifyError, VerifyResult};
use futures::future::BoxFuture;
use futures::FutureExt;

const VOLUME_SIZE: u64 = 10 * GIB;
const VOLUME_COUNT: u8 = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct ControllerInfo;

fn expect_count(field: &str, observed: u32, expected: u32) -> VerifyResult<()> {
    if observed != expected {
        return Err(VerifyError::mismatch(
            field,
            "expected",
            expected.to_string(),
            "sdk",
            observed.to_string(),
        ));
    }
    Ok(())
}

impl ControllerInfo {
    async fn ensure_ocr(&self, session: &mut Session) -> VerifyResult<()> {
        if session.params.firmware_image.is_none() {
            return Err(VerifyError::Precondition(
                "a firmware image is required".to_string(),
            ));
        }

        let harness = session.harness();
        let ctrl = harness.controller();
        if harness.cli().ocr_enabled(ctrl)? {
            tracing::info!(ctrl, "online controller reset already enabled");
            return Ok(());
        }

        harness
            .cli()
            .apply(ctrl, CliSetting::Ocr(true))
            .map_err(|err| VerifyError::StimulusFailed {
                operation: CliSetting::Ocr(true).to_string(),
                reason: err.to_string(),
            })?;
        if !harness.cli().ocr_enabled(ctrl)? {
            return Err(VerifyError::mismatch("ocr", "expected", "on", "cli", "off"));
        }
        tracing::info!(ctrl, "online controller reset enabled");
        Ok(())
    }

    async fn flash_and_cross_check(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();
        let image = session
            .params
            .firmware_image
            .clone()
            .ok_or_else(|| VerifyError::Precondition("a firmware image is required".to_string()))?;

        harness.flash_firmware(&image).await?;

        let snapshot = common::verify_identity(&harness)?;
        common::verify_driver(&snapshot)?;
        tracing::info!(
            ctrl,
            alarm = snapshot.sdk.alarm_enabled,
            memory_mb = snapshot.sdk.memory_size_mb,
            max_transfer = snapshot.cli.get_opt("max_data_transfer_size").unwrap_or("-"),
            "controller properties"
        );

        let backplanes: Vec<u16> = harness
            .sdk()
            .enclosures()?
            .iter()
            .filter(|e| e.backplane)
            .map(|e| e.id)
            .collect();
        let drives: Vec<DriveId> = harness
            .sdk()
            .drives(&DriveFilter::unconfigured_good())?
            .into_iter()
            .filter(|d| backplanes.contains(&d.location.enclosure))
            .map(|d| d.id)
            .collect();
        if drives.is_empty() {
            return Err(VerifyError::Precondition(format!(
                "no unconfigured-good backplane drives on controller {}",
                ctrl
            )));
        }
        tracing::info!(ctrl, drives = ?drives, "backplane drives selected");

        let spec = VolumeSpec::new(RaidLevel::Raid0, VOLUME_SIZE)
            .on_drives(drives)
            .count(VOLUME_COUNT);
        let volumes = harness.perform_stimulus("create backplane RAID-0 volumes", |sdk| {
            sdk.create_volumes(&spec)
        })?;
        session.track_volumes(ctrl, volumes.iter().copied());

        for volume in &volumes {
            let mut tracker = LifecycleTracker::new(*volume, false);
            let ready = harness.wait_for_init(&mut tracker, *volume, None).await?;
            if ready.state != VolumeState::Optimal {
                return Err(VerifyError::mismatch(
                    format!("{} state", volume),
                    "expected",
                    VolumeState::Optimal.to_string(),
                    "sdk",
                    ready.state.to_string(),
                ));
            }
            harness.verify_volume_state(*volume, VolumeState::Optimal)?;
        }

        let health = harness.sdk().health()?;
        tracing::info!(
            ctrl,
            pd_optimal = health.pd_optimal,
            pd_pred_fail = health.pd_pred_fail,
            pd_failed = health.pd_failed,
            "drive health"
        );
        expect_count("optimal volumes", health.ld_optimal, volumes.len() as u32)?;
        expect_count("critical volumes", health.ld_critical, 0)?;
        expect_count("offline volumes", health.ld_offline, 0)?;

        for group in CapabilityGroup::all() {
            for (key, value) in harness.sdk().capabilities(group)? {
                tracing::info!(%group, key = %key, value = %value, "capability");
            }
        }

        common::verify_rates(&snapshot)
    }

    async fn cross_check_drives(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();

        let enclosures = harness.sdk().enclosures()?;
        let first = enclosures
            .first()
            .ok_or_else(|| VerifyError::Precondition(format!("controller {} reports no enclosures", ctrl)))?;
        let cli_ids = harness.cli().enclosure_ids(ctrl)?;
        cross_check(
            "enclosure id",
            Reading::sdk(first.id.to_string()),
            Reading::cli(cli_ids.first().map(u16::to_string).unwrap_or_default()),
        )?;

        let controller = harness.cli().controller_properties(ctrl)?;
        tracing::info!(ctrl, sas_address = controller.get("sas_address")?, "controller SAS address");

        for drive in harness.sdk().drives(&DriveFilter::any().in_enclosure(first.id))? {
            let props = harness.cli().drive_properties(ctrl, drive.location)?;
            let location = drive.location;

            let size_mib: u64 = props.get("size")?.trim().parse().map_err(|_| {
                VerifyError::Parse(format!("drive {} size is not a number", location))
            })?;
            check_capacity(&format!("drive {} size", location), drive.size_bytes, size_mib)?;

            cross_check(
                &format!("drive {} media type", location),
                Reading::sdk(drive.media.cli_code()).normalized(Normalization::CaseInsensitive),
                Reading::cli(props.get("media_type")?).normalized(Normalization::CaseInsensitive),
            )?;
            cross_check(
                &format!("drive {} media errors", location),
                Reading::sdk(drive.media_error_count.to_string()),
                Reading::cli(props.get("media_error_count")?).normalized(Normalization::Trimmed),
            )?;
            cross_check(
                &format!("drive {} firmware revision", location),
                Reading::sdk(&drive.firmware_revision).normalized(Normalization::Trimmed),
                Reading::cli(props.get("firmware_revision")?).normalized(Normalization::Trimmed),
            )?;

            // Port 0 reads "0x0" when the drive is attached through port 1,
            // which is always the case for SATA drives behind an interposer
            let port0 = props.get("sas_address_0")?;
            let address = if port0.trim().len() > 3 {
                port0
            } else {
                props.get("sas_address_1")?
            };
            if drive.interface == Interface::SATA {
                tracing::debug!(%location, address, "SATA drive, address read from port 1");
            }
            cross_check(
                &format!("drive {} SAS address", location),
                Reading::sdk(&drive.unique_id).normalized(Normalization::SasAddress),
                Reading::cli(address).normalized(Normalization::SasAddress),
            )?;
        }

        let volumes = session.take_volumes(ctrl);
        common::delete_volumes(&harness, &volumes).await
    }
}

impl Scenario for ControllerInfo {
    fn name(&self) -> &'static str {
        "controller-info"
    }

    fn description(&self) -> &'static str {
        "firmware flash plus SDK/CLI agreement on controller, enclosure and drive properties"
    }

    fn steps(&self) -> &'static [&'static str] {
        &[
            "flash firmware, cross-check controller properties, create backplane volumes",
            "cross-check enclosure and drive properties, delete volumes",
        ]
    }

    fn init<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        self.ensure_ocr(session).boxed()
    }

    fn step<'a>(&'a self, index: usize, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        match index {
            1 => self.flash_and_cross_check(session).boxed(),
            2 => self.cross_check_drives(session).boxed(),
            _ => super::no_such_step(self.name(), index),
        }
    }
}
