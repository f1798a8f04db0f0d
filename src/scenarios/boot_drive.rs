// Boot drive scenario
//
// Runs across every controller in the session: CC rate and factory
// defaults, volumes with distinct cache policies, a restart, then setting
// and verifying a boot volume.

use super::common;
use crate::harness::{cross_check, Harness, Normalization, Reading};
use crate::model::units::MIB;
use crate::model::{
    CachePolicy, ControllerRates, DriveFilter, Interface, IoPolicy, MediaType, RaidLevel,
    ReadPolicy, VolumeSpec, VolumeState, WritePolicy,
};
use crate::runner::Scenario;
use crate::sdk::CliSetting;
use crate::session::Session;
use crate::{VerifyError, VerifyResult};
use futures::future::BoxFuture;
use futures::FutureExt;

const TEST_CC_RATE: u8 = 35;
const REQUIRED_DRIVES: usize = 10;
const SECTOR_SIZE: u32 = 512;
const VOLUME_SIZE: u64 = 3000 * MIB;
const DISPLAYED_CONTROLLERS: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct BootDrive;

fn layouts() -> [(RaidLevel, CachePolicy); 3] {
    [
        (
            RaidLevel::Raid0,
            CachePolicy::new(WritePolicy::WriteBack, ReadPolicy::ReadAhead, IoPolicy::Direct),
        ),
        (
            RaidLevel::Raid1,
            CachePolicy::new(WritePolicy::WriteThrough, ReadPolicy::NoReadAhead, IoPolicy::Cached),
        ),
        (
            RaidLevel::Raid5,
            CachePolicy::new(WritePolicy::WriteBack, ReadPolicy::ReadAhead, IoPolicy::Direct),
        ),
    ]
}

fn apply_cli(harness: &Harness, setting: CliSetting) -> VerifyResult<()> {
    let ctrl = harness.controller();
    tracing::info!(ctrl, %setting, "applying cli setting");
    harness
        .cli()
        .apply(ctrl, setting)
        .map_err(|err| VerifyError::StimulusFailed {
            operation: format!("{} on controller {}", setting, ctrl),
            reason: err.to_string(),
        })
}

fn verify_cc_rate(harness: &Harness, expected: u8) -> VerifyResult<()> {
    let ctrl = harness.controller();
    cross_check(
        &format!("controller {} cc rate", ctrl),
        Reading::new("expected", expected.to_string()),
        Reading::cli(harness.cli().cc_rate(ctrl)?.to_string()),
    )?;
    Ok(())
}

fn show_boot_drive(harness: &Harness) -> VerifyResult<()> {
    let ctrl = harness.controller();
    match harness.cli().boot_drive(ctrl)? {
        Some(volume) => tracing::info!(ctrl, %volume, "boot drive"),
        None => tracing::info!(ctrl, "no boot volume set"),
    }
    Ok(())
}

impl BootDrive {
    fn controllers(session: &Session) -> Vec<Harness> {
        session.controllers().cloned().collect()
    }

    async fn check_controllers(&self, session: &mut Session) -> VerifyResult<()> {
        let present = session.harness().cli().controller_count()?;
        for harness in session.controllers() {
            if harness.controller() >= present {
                return Err(VerifyError::Precondition(format!(
                    "controller {} not found, the cli reports {} controller(s)",
                    harness.controller(),
                    present
                )));
            }
        }
        Ok(())
    }

    async fn reset_rates(&self, session: &mut Session) -> VerifyResult<()> {
        let controllers = Self::controllers(session);

        for harness in &controllers {
            apply_cli(harness, CliSetting::CcRate(TEST_CC_RATE))?;
            verify_cc_rate(harness, TEST_CC_RATE)?;
        }

        for harness in &controllers {
            apply_cli(harness, CliSetting::FactoryDefaults { restart: true })?;
            harness.pause(harness.timing().controller_restart_settle()).await?;
        }

        let default_rate = ControllerRates::default().cc;
        for harness in &controllers {
            verify_cc_rate(harness, default_rate)?;
        }
        Ok(())
    }

    async fn create_volumes(&self, session: &mut Session) -> VerifyResult<()> {
        let filter = DriveFilter::unconfigured_good()
            .with_media(MediaType::HDD)
            .with_interface(Interface::SAS)
            .with_sector_size(SECTOR_SIZE);

        for harness in Self::controllers(session) {
            let ctrl = harness.controller();
            harness.require_drives(&filter, REQUIRED_DRIVES, "boot drive volumes")?;

            for (raid, cache) in layouts() {
                let spec = VolumeSpec::new(raid, VOLUME_SIZE).with_cache(cache);
                let ids = harness.perform_stimulus(&format!("create {} on controller {}", raid, ctrl), |sdk| {
                    sdk.create_volumes(&spec)
                })?;
                session.track_volumes(ctrl, ids.iter().copied());

                for volume in ids {
                    harness.wait_for_cli_init(volume).await?;
                    harness.verify_volume_state(volume, VolumeState::Optimal)?;
                    let props = harness.cli().volume_properties(ctrl, volume)?;
                    cross_check(
                        &format!("{} cache policy", volume),
                        Reading::new("requested", cache.cli_code()),
                        Reading::cli(props.get("cache")?).normalized(Normalization::Trimmed),
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn show_cache_flush(&self, session: &mut Session) -> VerifyResult<()> {
        for harness in session.controllers() {
            let ctrl = harness.controller();
            let interval = harness.cli().cache_flush_interval(ctrl)?;
            tracing::info!(ctrl, interval = %humantime::format_duration(interval), "cache flush interval");
        }
        Ok(())
    }

    async fn show_boot_drives(&self, session: &mut Session, limit: usize) -> VerifyResult<()> {
        for harness in session.controllers().take(limit) {
            show_boot_drive(harness)?;
        }
        Ok(())
    }

    async fn restart(&self, session: &mut Session) -> VerifyResult<()> {
        for harness in Self::controllers(session) {
            let ctrl = harness.controller();
            harness.perform_stimulus(&format!("restart controller {}", ctrl), |sdk| sdk.restart())?;
            harness.pause(harness.timing().controller_restart_settle()).await?;
            let version = harness.sdk().firmware_version()?;
            tracing::info!(ctrl, %version, "controller back after restart");
        }
        Ok(())
    }

    async fn set_boot_drives(&self, session: &mut Session) -> VerifyResult<()> {
        for harness in session.controllers() {
            let ctrl = harness.controller();
            let volume = session.volumes(ctrl).first().copied().ok_or_else(|| {
                VerifyError::Precondition(format!("no volume on controller {} to boot from", ctrl))
            })?;
            apply_cli(harness, CliSetting::BootDrive(volume))?;
        }
        Ok(())
    }

    async fn verify_and_clean_up(&self, session: &mut Session) -> VerifyResult<()> {
        let controllers = Self::controllers(session);

        for harness in &controllers {
            let ctrl = harness.controller();
            let expected = session.volumes(ctrl).first().copied();
            let actual = harness.cli().boot_drive(ctrl)?;
            if actual.is_none() || actual != expected {
                let render = |v: Option<crate::model::VolumeId>| v.map_or("none".to_string(), |v| v.to_string());
                return Err(VerifyError::mismatch(
                    format!("controller {} boot drive", ctrl),
                    "expected",
                    render(expected),
                    "cli",
                    render(actual),
                ));
            }
            tracing::info!(ctrl, volume = ?actual, "boot drive verified");
        }

        for harness in &controllers {
            let volumes = session.take_volumes(harness.controller());
            common::delete_volumes(harness, &volumes).await?;
        }
        session.harness().settle().await
    }
}

impl Scenario for BootDrive {
    fn name(&self) -> &'static str {
        "boot-drive"
    }

    fn description(&self) -> &'static str {
        "factory defaults, cache policies and boot volume across controllers"
    }

    fn steps(&self) -> &'static [&'static str] {
        &[
            "set CC rate, then restore factory defaults",
            "create RAID-0, RAID-1 and RAID-5 volumes",
            "display cache flush interval",
            "display boot drive",
            "restart controllers",
            "display boot drive after restart",
            "set boot drive",
            "verify boot drive and delete volumes",
        ]
    }

    fn init<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        self.check_controllers(session).boxed()
    }

    fn step<'a>(&'a self, index: usize, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        match index {
            1 => self.reset_rates(session).boxed(),
            2 => self.create_volumes(session).boxed(),
            3 => self.show_cache_flush(session).boxed(),
            4 => self.show_boot_drives(session, usize::MAX).boxed(),
            5 => self.restart(session).boxed(),
            6 => self.show_boot_drives(session, DISPLAYED_CONTROLLERS).boxed(),
            7 => self.set_boot_drives(session).boxed(),
            8 => self.verify_and_clean_up(session).boxed(),
            _ => super::no_such_step(self.name(), index),
        }
    }
}
