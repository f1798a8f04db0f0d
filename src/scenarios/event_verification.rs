// Event verification scenario
//
// Drives are pulled and reinserted through a remote power switch while the
// harness checks that the controller reports each transition as an event.
// Steps 3 through 8 run once against a RAID-1 and, from step 9, once more
// against a RAID-1E.

use super::common::{self, CreationWatch};
use crate::harness::Harness;
use crate::model::units::GIB;
use crate::model::{
    ControllerSetting, DriveCommand, DriveFilter, DriveId, DriveRecord, DriveState, EventKind,
    EventScope, Interface, LifecycleTracker, RaidLevel, VolumeId, VolumeSpec, VolumeState,
};
use crate::runner::{restore_pretest, Scenario};
use crate::session::Session;
use crate::{VerifyError, VerifyResult};
use futures::future::BoxFuture;
use futures::FutureExt;

const VOLUME_SIZE: u64 = 25 * GIB;
const MEMBER: &str = "member";
const SPARE: &str = "spare";
const OPTIMAL: &str = "optimal";

#[derive(Debug, Default, Clone, Copy)]
pub struct EventVerification;

/// Volume layout for one pass over steps 3 to 8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    Raid1,
    Raid1E,
}

impl Round {
    fn raid(self) -> RaidLevel {
        match self {
            Round::Raid1 => RaidLevel::Raid1,
            Round::Raid1E => RaidLevel::Raid1E,
        }
    }

    /// Drives besides the module-0 member
    fn pd_count(self) -> usize {
        match self {
            Round::Raid1 => 1,
            Round::Raid1E => 3,
        }
    }
}

fn sas_drives() -> DriveFilter {
    DriveFilter::unconfigured_good().with_interface(Interface::SAS)
}

fn tracked_volume(session: &Session, harness: &Harness) -> VerifyResult<VolumeId> {
    session
        .volumes(harness.controller())
        .first()
        .copied()
        .ok_or_else(|| VerifyError::Precondition("no volume created by an earlier step".to_string()))
}

fn expect_drive_state(drive: &DriveRecord, expected: DriveState) -> VerifyResult<()> {
    if drive.state != expected {
        return Err(VerifyError::mismatch(
            format!("{} state", drive.id),
            "expected",
            expected.to_string(),
            "sdk",
            drive.state.to_string(),
        ));
    }
    Ok(())
}

impl EventVerification {
    async fn select_modules(&self, session: &mut Session) -> VerifyResult<()> {
        let carriers: Vec<u16> = session
            .power()?
            .modules()?
            .into_iter()
            .filter(|m| m.is_drive_carrier())
            .map(|m| m.id)
            .collect();
        if carriers.len() < 2 {
            return Err(VerifyError::Precondition(format!(
                "two drive carriers needed on the power switch, found {}",
                carriers.len()
            )));
        }
        tracing::info!(modules = ?carriers, "drive carriers selected");
        session.set_modules(carriers);
        Ok(())
    }

    async fn prepare_controller(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();

        for setting in [
            ControllerSetting::TestDefaults,
            ControllerSetting::RestoreHotSpareOnInsertion(true),
        ] {
            harness.perform_stimulus(&format!("{:?}", setting), |sdk| sdk.apply_setting(setting))?;
        }
        if harness.sdk().controller_info()?.disable_auto_rebuild {
            harness.perform_stimulus("enable auto rebuild", |sdk| {
                sdk.apply_setting(ControllerSetting::DisableAutoRebuild(false))
            })?;
            harness.settle().await?;
        }

        let info = harness.sdk().controller_info()?;
        if info.disable_auto_rebuild || !info.restore_hot_spare_on_insertion {
            return Err(VerifyError::mismatch(
                "auto rebuild / restore hot spare",
                "expected",
                "enabled / enabled",
                "sdk",
                format!(
                    "{} / {}",
                    if info.disable_auto_rebuild { "disabled" } else { "enabled" },
                    if info.restore_hot_spare_on_insertion { "enabled" } else { "disabled" }
                ),
            ));
        }

        let snapshot = common::verify_identity(&harness)?;
        common::log_cli_properties(&snapshot);
        Ok(())
    }

    async fn cycle_all_modules(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let modules = session.modules().to_vec();
        let before = harness.sdk().drives(&DriveFilter::any())?.len();

        let mut inserted = harness.register(EventKind::PdInserted, EventScope::Any);
        harness.arm().await?;

        common::switch_modules(session, &modules, false).await?;
        harness.pause(harness.timing().power_settle()).await?;
        common::switch_modules(session, &modules, true).await?;
        harness.pause(harness.timing().power_settle()).await?;

        harness.assert_resolved(&mut inserted).await?;
        let after = harness.sdk().drives(&DriveFilter::any())?.len();
        if after != before {
            return Err(VerifyError::mismatch(
                "drive count",
                "before pull",
                before.to_string(),
                "after reinsert",
                after.to_string(),
            ));
        }
        Ok(())
    }

    async fn create_group(&self, session: &mut Session, round: Round) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();
        let filter = sas_drives();

        let member = common::locate_module_drive(session, session.module(0)?, &filter).await?;
        let spare = common::locate_module_drive(session, session.module(1)?, &filter).await?;
        session.set_drive(MEMBER, member.id);
        session.set_drive(SPARE, spare.id);

        let mut watch = CreationWatch::register(&harness);
        harness.arm().await?;

        let mut group: Vec<DriveId> = harness
            .require_drives(&filter, round.pd_count() + 2, "event verification group")?
            .into_iter()
            .map(|d| d.id)
            .filter(|id| *id != member.id && *id != spare.id)
            .take(round.pd_count())
            .collect();
        group.push(member.id);
        tracing::info!(raid = %round.raid(), drives = ?group, "drive group selected");

        let spec = VolumeSpec::new(round.raid(), VOLUME_SIZE)
            .on_drives(group)
            .fast_init();
        let ids = harness.perform_stimulus(&format!("create {} with fast init", round.raid()), |sdk| {
            sdk.create_volumes(&spec)
        })?;
        session.track_volumes(ctrl, ids.iter().copied());
        let volume = ids
            .first()
            .copied()
            .ok_or_else(|| VerifyError::Collaborator("volume creation returned no id".to_string()))?;

        let mut tracker = LifecycleTracker::new(volume, true);
        harness.wait_for_init(&mut tracker, volume, Some(&mut watch.init)).await?;
        harness.settle().await?;

        harness.assert_fired(&mut watch.created)?;
        harness.assert_resolved(&mut watch.init).await?;
        harness.assert_resolved(&mut watch.state).await?;
        harness.assert_resolved(&mut watch.optimal).await?;
        harness.verify_volume_state(volume, VolumeState::Optimal)
    }

    async fn pull_member(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let member = session.drive(MEMBER)?;
        let volume = tracked_volume(session, &harness)?;

        let mut state = harness.register(EventKind::PdStateChange, EventScope::Drive(member));
        let mut degraded = harness.register(EventKind::LdDegraded, EventScope::Volume(volume));
        harness.arm().await?;

        common::switch_module(session, session.module(0)?, false).await?;

        harness.assert_resolved(&mut state).await?;
        harness.assert_resolved(&mut degraded).await?;
        harness.verify_volume_state(volume, VolumeState::Degraded)
    }

    async fn reinsert_member(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let member = session.drive(MEMBER)?;
        let volume = tracked_volume(session, &harness)?;

        let mut auto = harness.register(EventKind::PdRebuildStartAuto, EventScope::Drive(member));
        let mut done = harness.register(EventKind::PdRebuildDone, EventScope::Drive(member));
        let optimal = harness.register(EventKind::LdOptimal, EventScope::Volume(volume));
        harness.arm().await?;

        common::switch_module(session, session.module(0)?, true).await?;

        let foreign = harness.sdk().scan_foreign()?;
        if foreign > 0 {
            tracing::info!(foreign, "clearing foreign configuration");
            harness.perform_stimulus("clear foreign configuration", |sdk| sdk.clear_foreign())?;
            harness.pause(harness.timing().power_settle()).await?;
        }

        let monitor = harness.wait_rebuild_started(member).await?;
        let progress = harness.cli_rebuild_progress(&harness.sdk().volume(volume)?, member)?;
        if !progress.is_running() {
            return Err(VerifyError::mismatch(
                format!("{} rebuild progress", member),
                "sdk",
                "running",
                "cli",
                progress.to_cli(),
            ));
        }
        harness.assert_resolved(&mut auto).await?;

        let summary = harness.monitor_rebuild(monitor).await?;
        tracing::info!(drive = %member, readings = ?summary.readings, "rebuild completed");
        harness.settle().await?;

        let progress = harness.cli_rebuild_progress(&harness.sdk().volume(volume)?, member)?;
        if progress.is_running() {
            return Err(VerifyError::mismatch(
                format!("{} rebuild progress", member),
                "sdk",
                "done",
                "cli",
                progress.to_cli(),
            ));
        }
        harness.assert_resolved(&mut done).await?;

        session.carry(OPTIMAL, optimal);
        Ok(())
    }

    async fn confirm_optimal(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let volume = tracked_volume(session, &harness)?;
        let mut optimal = session.take_carried(OPTIMAL)?;

        harness.assert_resolved(&mut optimal).await?;
        harness.verify_volume_state(volume, VolumeState::Optimal)
    }

    async fn make_spare(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let spare = session.drive(SPARE)?;
        expect_drive_state(&harness.sdk().drive(spare)?, DriveState::UnconfiguredGood)?;

        let mut created = harness.register(EventKind::GlobalSpareCreated, EventScope::Drive(spare));
        harness.arm().await?;

        harness.perform_stimulus(&format!("make {} a global hot spare", spare), |sdk| {
            sdk.drive_command(spare, DriveCommand::MakeGlobalHotSpare)
        })?;
        harness.settle().await?;

        let record = harness.sdk().drive(spare)?;
        expect_drive_state(&record, DriveState::HotSpare)?;
        harness.assert_resolved(&mut created).await?;
        harness.verify_drive_state(record.location, DriveState::HotSpare)
    }

    async fn cycle_spare(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let spare = session.drive(SPARE)?;
        let module = session.module(1)?;

        let mut state = harness.register(EventKind::PdStateChange, EventScope::Drive(spare));
        let mut restored = harness.register(EventKind::GlobalSpareCreated, EventScope::Drive(spare));
        harness.arm().await?;

        common::switch_module(session, module, false).await?;
        harness.assert_resolved(&mut state).await?;

        common::switch_module(session, module, true).await?;
        harness.assert_resolved(&mut restored).await
    }

    async fn clear_and_repeat(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();

        let mut cleared = harness.register(EventKind::ConfigCleared, EventScope::Any);
        harness.arm().await?;
        harness.perform_stimulus("clear configuration", |sdk| sdk.clear_config())?;

        let remaining = harness.sdk().volumes()?;
        if !remaining.is_empty() {
            return Err(VerifyError::mismatch(
                "volumes after clear",
                "expected",
                "0",
                "sdk",
                remaining.len().to_string(),
            ));
        }
        session.take_volumes(ctrl);
        harness
            .assert_resolved_within(&mut cleared, harness.timing().long_event_window())
            .await?;

        tracing::info!(raid = %Round::Raid1E.raid(), "repeating drive events");
        self.create_group(session, Round::Raid1E).await?;
        self.pull_member(session).await?;
        self.reinsert_member(session).await?;
        self.confirm_optimal(session).await?;
        self.make_spare(session).await?;
        self.cycle_spare(session).await
    }

    async fn delete_and_pull(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();
        let modules = session.modules().to_vec();

        let mut removed = harness.register(EventKind::PdRemoved, EventScope::Any);
        harness.arm().await?;

        let volumes = session.take_volumes(ctrl);
        common::delete_volumes(&harness, &volumes).await?;

        common::switch_modules(session, &modules, false).await?;
        harness.pause(harness.timing().power_settle()).await?;
        harness.assert_resolved(&mut removed).await?;

        common::switch_modules(session, &modules, true).await?;
        harness.pause(harness.timing().power_settle()).await
    }

    /// Best effort: every module back up and the switch released
    ///
    /// Uses plain sleeps so it still runs after an interrupt.
    async fn restore_rig(&self, session: &mut Session) -> VerifyResult<()> {
        let timing = session.harness().timing().clone();
        if let Ok(power) = session.power() {
            for module in session.modules() {
                if let Err(err) = power.set_power(*module, true) {
                    tracing::warn!(module, error = %err, "could not power module back up");
                }
                tokio::time::sleep(timing.power_step()).await;
            }
            tokio::time::sleep(timing.power_settle()).await;
            if let Err(err) = power.close() {
                tracing::warn!(error = %err, "could not release power switch");
            }
        }
        session.clear_carried();
        restore_pretest(session).await
    }
}

impl Scenario for EventVerification {
    fn name(&self) -> &'static str {
        "event-verification"
    }

    fn description(&self) -> &'static str {
        "drive pull, reinsert, rebuild and hot-spare events via remote power control"
    }

    fn steps(&self) -> &'static [&'static str] {
        &[
            "apply test defaults and check controller identity",
            "pull and reinsert every drive carrier",
            "create RAID-1 with fast initialization",
            "pull a member drive",
            "reinsert the member and follow the auto rebuild",
            "confirm the volume returned to optimal",
            "make a global hot spare",
            "pull and reinsert the hot spare",
            "clear configuration and repeat with RAID-1E",
            "delete volumes and pull every drive carrier",
        ]
    }

    fn needs_power(&self) -> bool {
        true
    }

    fn init<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        self.select_modules(session).boxed()
    }

    fn step<'a>(&'a self, index: usize, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        match index {
            1 => self.prepare_controller(session).boxed(),
            2 => self.cycle_all_modules(session).boxed(),
            3 => self.create_group(session, Round::Raid1).boxed(),
            4 => self.pull_member(session).boxed(),
            5 => self.reinsert_member(session).boxed(),
            6 => self.confirm_optimal(session).boxed(),
            7 => self.make_spare(session).boxed(),
            8 => self.cycle_spare(session).boxed(),
            9 => self.clear_and_repeat(session).boxed(),
            10 => self.delete_and_pull(session).boxed(),
            _ => super::no_such_step(self.name(), index),
        }
    }

    fn teardown<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        self.restore_rig(session).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_cover_raid1_then_raid1e() {
        assert_eq!(Round::Raid1.raid(), RaidLevel::Raid1);
        assert_eq!(Round::Raid1.pd_count() + 1, 2);
        assert_eq!(Round::Raid1E.raid(), RaidLevel::Raid1E);
        assert!(Round::Raid1E.pd_count() + 1 >= RaidLevel::Raid1E.min_drives());
    }

    #[test]
    fn test_steps_follow_power_switch_flow() {
        assert!(EventVerification.needs_power());
        assert_eq!(EventVerification.steps().len(), 10);
    }
}
