// Physical drive operation progress scenario
//
// Take a member of a fresh RAID-1 offline, rebuild it by command and follow
// the rebuild progress until the controller reports it finished.

use super::common::{self, CreationWatch};
use crate::harness::Harness;
use crate::model::units::GIB;
use crate::model::{
    DriveCommand, DriveFilter, DriveId, EventKind, EventScope, Interface, LifecycleTracker,
    MediaType, RaidLevel, VolumeId, VolumeSpec, VolumeState,
};
use crate::runner::Scenario;
use crate::session::Session;
use crate::{VerifyError, VerifyResult};
use futures::future::BoxFuture;
use futures::FutureExt;

const REQUIRED_DRIVES: usize = 5;
const VOLUME_SIZE: u64 = 20 * GIB;

#[derive(Debug, Default, Clone, Copy)]
pub struct PdOperationProgress;

fn candidate_drives() -> DriveFilter {
    DriveFilter::unconfigured_good()
        .with_media(MediaType::HDD)
        .with_interface(Interface::SAS)
}

fn tracked_volume(session: &Session, harness: &Harness) -> VerifyResult<VolumeId> {
    session
        .volumes(harness.controller())
        .first()
        .copied()
        .ok_or_else(|| VerifyError::Precondition("no volume created by an earlier step".to_string()))
}

impl PdOperationProgress {
    async fn check_drives(&self, session: &mut Session) -> VerifyResult<()> {
        session
            .harness()
            .require_drives(&candidate_drives(), REQUIRED_DRIVES, "PD operation progress")?;
        Ok(())
    }

    async fn create_mirror(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();

        let mut watch = CreationWatch::register(&harness);
        harness.arm().await?;

        let spec = VolumeSpec::new(RaidLevel::Raid1, VOLUME_SIZE).fast_init();
        let ids = harness.perform_stimulus("create RAID-1 with fast init", |sdk| sdk.create_volumes(&spec))?;
        session.track_volumes(ctrl, ids.iter().copied());
        let volume = ids
            .first()
            .copied()
            .ok_or_else(|| VerifyError::Collaborator("volume creation returned no id".to_string()))?;

        let mut tracker = LifecycleTracker::new(volume, true);
        let ready = harness.wait_for_init(&mut tracker, volume, Some(&mut watch.init)).await?;
        if !tracker.initialized_before_optimal() || ready.state != VolumeState::Optimal {
            return Err(VerifyError::mismatch(
                format!("{} lifecycle", volume),
                "expected",
                "initializing then optimal",
                "observed",
                format!("{:?}", tracker.history()),
            ));
        }

        harness.assert_fired(&mut watch.created)?;
        // Creation moves the members out of unconfigured-good
        harness.assert_fired(&mut watch.state)?;
        harness.settle().await?;
        harness.assert_resolved(&mut watch.init).await?;
        harness.assert_resolved(&mut watch.optimal).await?;
        harness.verify_volume_state(volume, VolumeState::Optimal)
    }

    async fn offline_member(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let volume = tracked_volume(session, &harness)?;
        let member = harness
            .sdk()
            .volume(volume)?
            .members
            .first()
            .copied()
            .ok_or_else(|| VerifyError::Precondition(format!("{} has no members", volume)))?;
        session.set_drive("member", member);

        let mut state = harness.register(EventKind::PdStateChange, EventScope::Drive(member));
        let mut degraded = harness.register(EventKind::LdDegraded, EventScope::Volume(volume));
        harness.arm().await?;

        harness.perform_stimulus(&format!("make {} offline", member), |sdk| {
            sdk.drive_command(member, DriveCommand::MakeOffline)
        })?;
        harness.settle().await?;

        harness.assert_resolved(&mut state).await?;
        harness.assert_resolved(&mut degraded).await?;
        harness.verify_volume_state(volume, VolumeState::Degraded)
    }

    async fn start_rebuild(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let member: DriveId = session.drive("member")?;

        let mut started = harness.register(EventKind::PdRebuildStart, EventScope::Drive(member));
        harness.arm().await?;

        harness.perform_stimulus(&format!("start rebuild of {}", member), |sdk| {
            sdk.drive_command(member, DriveCommand::StartRebuild)
        })?;
        harness.settle().await?;

        harness.assert_resolved(&mut started).await
    }

    async fn follow_rebuild(&self, session: &mut Session) -> VerifyResult<()> {
        let harness = session.harness().clone();
        let ctrl = harness.controller();
        let member = session.drive("member")?;
        let volume = tracked_volume(session, &harness)?;

        let mut done = harness.register(EventKind::PdRebuildDone, EventScope::Drive(member));
        harness.arm().await?;

        let summary = harness.rebuild_to_completion(member).await?;
        tracing::info!(drive = %member, readings = ?summary.readings, "rebuild followed to completion");
        harness.settle().await?;

        harness.assert_resolved(&mut done).await?;
        harness.verify_volume_state(volume, VolumeState::Optimal)?;

        let volumes = session.take_volumes(ctrl);
        common::delete_volumes(&harness, &volumes).await
    }
}

impl Scenario for PdOperationProgress {
    fn name(&self) -> &'static str {
        "pd-operation-progress"
    }

    fn description(&self) -> &'static str {
        "offline a RAID-1 member, rebuild it by command and follow rebuild progress"
    }

    fn steps(&self) -> &'static [&'static str] {
        &[
            "create RAID-1 with fast initialization",
            "take a member offline",
            "start rebuild of the member",
            "follow rebuild to completion and delete the volume",
        ]
    }

    fn init<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        self.check_drives(session).boxed()
    }

    fn step<'a>(&'a self, index: usize, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        match index {
            1 => self.create_mirror(session).boxed(),
            2 => self.offline_member(session).boxed(),
            3 => self.start_rebuild(session).boxed(),
            4 => self.follow_rebuild(session).boxed(),
            _ => super::no_such_step(self.name(), index),
        }
    }
}
