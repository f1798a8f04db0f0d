// Expectation-verification harness for one controller
//
// register -> arm -> stimulus -> settle -> assert, then cross-check the
// resulting state through the CLI path.

use super::cross_check::{cross_check, Normalization, Reading};
use super::expectation::{Expectation, PendingExpectation};
use super::progress::{LogProgress, ProgressSink, RebuildMonitor, RebuildPhase, RebuildSummary};
use crate::config::TimingConfig;
use crate::error::{poll_until, FixedAttempts, UntilCeiling};
use crate::model::{
    ControllerSnapshot, DriveFilter, DriveId, DriveRecord, DriveState, EnclosureSlot, EventKind,
    EventScope, LifecycleTracker, LogicalVolume, OperationProgress, VolumeId, VolumeState,
};
use crate::sdk::{CliReader, ControllerAdapter, EventSource};
use crate::{is_interrupted, VerifyError, VerifyResult};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Verification harness bound to one controller
#[derive(Clone)]
pub struct Harness {
    sdk: Arc<dyn ControllerAdapter>,
    cli: Arc<dyn CliReader>,
    events: Arc<dyn EventSource>,
    timing: TimingConfig,
    progress: Arc<dyn ProgressSink>,
}

impl Harness {
    pub fn new(
        sdk: Arc<dyn ControllerAdapter>,
        cli: Arc<dyn CliReader>,
        events: Arc<dyn EventSource>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            sdk,
            cli,
            events,
            timing,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn controller(&self) -> u32 {
        self.sdk.controller_id()
    }

    pub fn sdk(&self) -> &dyn ControllerAdapter {
        self.sdk.as_ref()
    }

    pub fn cli(&self) -> &dyn CliReader {
        self.cli.as_ref()
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Start watching for `kind` events within `scope`
    pub fn register(&self, kind: EventKind, scope: EventScope) -> PendingExpectation {
        let expectation = Expectation::new(kind, scope);
        tracing::debug!(ctrl = self.controller(), expectation = %expectation, "registering expectation");
        PendingExpectation::new(expectation, self.events.subscribe())
    }

    /// Sleep for `duration`, failing early if an interrupt arrived
    pub async fn pause(&self, duration: Duration) -> VerifyResult<()> {
        if is_interrupted() {
            return Err(VerifyError::Interrupted);
        }
        tokio::time::sleep(duration).await;
        if is_interrupted() {
            return Err(VerifyError::Interrupted);
        }
        Ok(())
    }

    /// Grace period between registering expectations and the stimulus
    pub async fn arm(&self) -> VerifyResult<()> {
        self.pause(self.timing.arm_delay()).await
    }

    /// Grace period for the controller to act on a stimulus
    pub async fn settle(&self) -> VerifyResult<()> {
        self.pause(self.timing.settle()).await
    }

    /// Issue a stimulus through the SDK
    ///
    /// Any failure to issue it is reported as a stimulus failure naming
    /// `operation`.
    pub fn perform_stimulus<T, F>(&self, operation: &str, stimulus: F) -> VerifyResult<T>
    where
        F: FnOnce(&dyn ControllerAdapter) -> VerifyResult<T>,
    {
        if is_interrupted() {
            return Err(VerifyError::Interrupted);
        }
        tracing::info!(ctrl = self.controller(), operation, "performing stimulus");
        stimulus(self.sdk()).map_err(|err| match err {
            VerifyError::Interrupted => err,
            other => VerifyError::StimulusFailed {
                operation: operation.to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Require the expectation to have resolved already
    pub fn assert_fired(&self, pending: &mut PendingExpectation) -> VerifyResult<()> {
        if pending.is_pending() {
            return Err(pending.timeout(Duration::ZERO));
        }
        Ok(())
    }

    /// Require the expectation to resolve within the standard event window
    pub async fn assert_resolved(&self, pending: &mut PendingExpectation) -> VerifyResult<()> {
        self.assert_resolved_within(pending, self.timing.event_window())
            .await
    }

    /// Require the expectation to resolve within `window`
    pub async fn assert_resolved_within(
        &self,
        pending: &mut PendingExpectation,
        window: Duration,
    ) -> VerifyResult<()> {
        if is_interrupted() {
            return Err(VerifyError::Interrupted);
        }
        pending.wait(window).await.map(|_| ())
    }

    /// Present drives matching `filter`, failing unless at least `count` exist
    pub fn require_drives(
        &self,
        filter: &DriveFilter,
        count: usize,
        purpose: &str,
    ) -> VerifyResult<Vec<DriveRecord>> {
        let drives = self.sdk.drives(filter)?;
        if drives.len() < count {
            return Err(VerifyError::Precondition(format!(
                "{} more drive(s) needed on controller {} for {}",
                count - drives.len(),
                self.controller(),
                purpose
            )));
        }
        tracing::info!(
            ctrl = self.controller(),
            available = drives.len(),
            purpose,
            "drive availability checked"
        );
        Ok(drives)
    }

    /// Poll a new volume until foreground initialization completes
    ///
    /// Each read is checked against the volume lifecycle; an illegal
    /// transition fails immediately. An initialization short enough to
    /// finish between two reads is accepted only when `init` (an
    /// `LdInitSuccessful` expectation registered before the volume was
    /// created) has seen the completion event for this volume.
    pub async fn wait_for_init(
        &self,
        tracker: &mut LifecycleTracker,
        volume: VolumeId,
        mut init: Option<&mut PendingExpectation>,
    ) -> VerifyResult<LogicalVolume> {
        let strategy = UntilCeiling::new(self.timing.init_poll_interval(), self.timing.rebuild_timeout());
        let what = format!("{} initialization", volume);

        poll_until(&strategy, &what, || {
            if let Some(pending) = init.as_deref_mut() {
                if !pending.is_pending() {
                    if let Some(event) = pending.resolved_by() {
                        tracker.confirm_init(event);
                    }
                }
            }
            let current = self.sdk.volume(volume)?;
            tracker.observe(current.state)?;
            if current.fgi_running() || current.state == VolumeState::Creating {
                tracing::debug!(%volume, state = %current.state, "initialization still running");
                return Ok(None);
            }
            Ok(Some(current))
        })
        .await
    }

    /// Poll the CLI until it reports no initialization running on `volume`
    pub async fn wait_for_cli_init(&self, volume: VolumeId) -> VerifyResult<()> {
        let strategy = UntilCeiling::new(self.timing.init_poll_interval(), self.timing.rebuild_timeout());
        let what = format!("{} FGI completion via cli", volume);
        let ctrl = self.controller();

        poll_until(&strategy, &what, || {
            let progress = self.cli.init_progress(ctrl, volume)?;
            Ok((!progress.is_running()).then_some(()))
        })
        .await?;
        tracing::info!(ctrl, %volume, "FGI completed");
        Ok(())
    }

    /// Wait for a rebuild of `drive` to be observed running
    pub async fn wait_rebuild_started(&self, drive: DriveId) -> VerifyResult<RebuildMonitor> {
        let strategy = FixedAttempts::new(
            self.timing.event_poll_interval(),
            self.timing.event_poll_attempts,
        );
        let mut monitor = RebuildMonitor::new(drive);
        let what = format!("rebuild of {} to start", drive);

        poll_until(&strategy, &what, || {
            let phase = monitor.observe(self.sdk.rebuild_progress(drive)?)?;
            Ok(matches!(phase, RebuildPhase::Running(_)).then_some(()))
        })
        .await?;

        tracing::info!(%drive, "rebuild kicked in");
        Ok(monitor)
    }

    /// Follow a running rebuild until the controller reports it finished
    pub async fn monitor_rebuild(&self, mut monitor: RebuildMonitor) -> VerifyResult<RebuildSummary> {
        let drive = monitor.drive();
        let strategy = UntilCeiling::new(
            self.timing.rebuild_poll_interval(),
            self.timing.rebuild_timeout(),
        );
        let what = format!("rebuild of {} to complete", drive);
        let progress = Arc::clone(&self.progress);
        progress.begin(&format!("Rebuilding {}", drive));

        let outcome = poll_until(&strategy, &what, || {
            match monitor.observe(self.sdk.rebuild_progress(drive)?)? {
                RebuildPhase::Done => Ok(Some(())),
                RebuildPhase::Running(percent) => {
                    progress.update(percent);
                    Ok(None)
                }
                RebuildPhase::NotStarted => Ok(None),
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                progress.finish(&format!("{} rebuild completed", drive));
                Ok(monitor.summary())
            }
            Err(err) => {
                progress.finish(&format!("{} rebuild failed", drive));
                Err(err)
            }
        }
    }

    /// Watch `drive` rebuild from first sighting to completion
    pub async fn rebuild_to_completion(&self, drive: DriveId) -> VerifyResult<RebuildSummary> {
        let monitor = self.wait_rebuild_started(drive).await?;
        self.monitor_rebuild(monitor).await
    }

    /// CLI rebuild progress of `drive` within `volume`
    pub fn cli_rebuild_progress(
        &self,
        volume: &LogicalVolume,
        drive: DriveId,
    ) -> VerifyResult<OperationProgress> {
        let member = volume.member_index(drive).ok_or_else(|| {
            VerifyError::Precondition(format!("{} is not a member of {}", drive, volume.id))
        })?;
        self.cli.rebuild_progress(self.controller(), volume.id, member)
    }

    /// Flash `image` and require the firmware version to change
    pub async fn flash_firmware(&self, image: &Path) -> VerifyResult<String> {
        let before = self.sdk.firmware_version()?;
        tracing::info!(ctrl = self.controller(), version = %before, "current firmware version");

        self.perform_stimulus("flash firmware", |sdk| sdk.flash_firmware(image))?;
        self.pause(self.timing.flash_settle()).await?;

        let after = self.sdk.firmware_version()?;
        if after == before {
            return Err(VerifyError::mismatch(
                "firmware version",
                "expected change from",
                before,
                "after flash",
                after,
            ));
        }
        tracing::info!(ctrl = self.controller(), version = %after, "new firmware version");
        Ok(after)
    }

    /// Require the CLI to report `volume` in `expected`
    pub fn verify_volume_state(&self, volume: VolumeId, expected: VolumeState) -> VerifyResult<()> {
        let props = self.cli.volume_properties(self.controller(), volume)?;
        cross_check(
            &format!("{} state", volume),
            Reading::new("expected", expected.cli_code()),
            Reading::cli(props.get("state")?).normalized(Normalization::Trimmed),
        )?;
        Ok(())
    }

    /// Require the CLI to report the drive at `location` in `expected`
    pub fn verify_drive_state(&self, location: EnclosureSlot, expected: DriveState) -> VerifyResult<()> {
        let props = self.cli.drive_properties(self.controller(), location)?;
        cross_check(
            &format!("drive {} state", location),
            Reading::new("expected", expected.cli_code()),
            Reading::cli(props.get("state")?).normalized(Normalization::Trimmed),
        )?;
        Ok(())
    }

    /// Require the SDK and CLI to agree on `volume`'s state
    pub fn cross_check_volume(&self, volume: VolumeId) -> VerifyResult<VolumeState> {
        let state = self.sdk.volume(volume)?.state;
        self.verify_volume_state(volume, state)?;
        Ok(state)
    }

    /// Read controller properties through both paths
    pub fn snapshot_controller(&self) -> VerifyResult<ControllerSnapshot> {
        Ok(ControllerSnapshot {
            sdk: self.sdk.controller_info()?,
            driver: self.sdk.driver_info()?,
            cli: self.cli.controller_properties(self.controller())?,
            taken_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("controller", &self.controller())
            .field("timing", &self.timing)
            .finish()
    }
}
