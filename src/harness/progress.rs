// Long-running operation progress
//
// Rebuild progress is read as a percentage until the controller reports no
// operation in progress. "No operation" is ambiguous on its own: it reads the
// same before a rebuild starts and after it ends. `RebuildMonitor` resolves
// it by only accepting `Idle` as completion once the rebuild has been seen
// running.

use crate::model::{DriveId, OperationProgress};
use crate::{VerifyError, VerifyResult};
use serde::Serialize;

/// Receives progress of a long-running operation
pub trait ProgressSink: Send + Sync {
    fn begin(&self, label: &str);
    fn update(&self, percent: u8);
    fn finish(&self, message: &str);
}

/// Progress reported through the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn begin(&self, label: &str) {
        tracing::info!(label, "operation started");
    }

    fn update(&self, percent: u8) {
        tracing::info!(percent, "progress");
    }

    fn finish(&self, message: &str) {
        tracing::info!(message, "operation finished");
    }
}

/// Where a monitored rebuild stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    NotStarted,
    Running(u8),
    Done,
}

/// Outcome of a completed rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub drive: DriveId,
    /// Every distinct percentage observed, in order
    pub readings: Vec<u8>,
}

/// Interprets successive rebuild progress reads of one drive
#[derive(Debug, Clone)]
pub struct RebuildMonitor {
    drive: DriveId,
    phase: RebuildPhase,
    readings: Vec<u8>,
}

impl RebuildMonitor {
    pub fn new(drive: DriveId) -> Self {
        Self {
            drive,
            phase: RebuildPhase::NotStarted,
            readings: Vec::new(),
        }
    }

    pub fn drive(&self) -> DriveId {
        self.drive
    }

    pub fn phase(&self) -> RebuildPhase {
        self.phase
    }

    pub fn has_started(&self) -> bool {
        !matches!(self.phase, RebuildPhase::NotStarted)
    }

    /// Fold one reading into the monitor
    ///
    /// Progress must not go backwards while running, and a rebuild that has
    /// completed does not restart under the same monitor.
    pub fn observe(&mut self, progress: OperationProgress) -> VerifyResult<RebuildPhase> {
        self.phase = match (self.phase, progress) {
            (RebuildPhase::NotStarted, OperationProgress::Idle) => RebuildPhase::NotStarted,
            (RebuildPhase::Running(_), OperationProgress::Idle) => RebuildPhase::Done,
            (RebuildPhase::Running(last), OperationProgress::Percent(p)) if p < last => {
                return Err(VerifyError::mismatch(
                    format!("{} rebuild progress", self.drive),
                    "previous read",
                    format!("{}%", last),
                    "current read",
                    format!("{}%", p),
                ));
            }
            (RebuildPhase::NotStarted | RebuildPhase::Running(_), OperationProgress::Percent(p)) => {
                if self.readings.last() != Some(&p) {
                    self.readings.push(p);
                }
                RebuildPhase::Running(p)
            }
            (RebuildPhase::Done, OperationProgress::Idle) => RebuildPhase::Done,
            (RebuildPhase::Done, OperationProgress::Percent(p)) => {
                return Err(VerifyError::mismatch(
                    format!("{} rebuild progress", self.drive),
                    "expected",
                    "no rebuild in progress",
                    "read",
                    format!("{}%", p),
                ));
            }
        };
        Ok(self.phase)
    }

    pub fn summary(&self) -> RebuildSummary {
        RebuildSummary {
            drive: self.drive,
            readings: self.readings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_before_start_is_not_completion() {
        let mut monitor = RebuildMonitor::new(DriveId(4));
        assert_eq!(
            monitor.observe(OperationProgress::Idle).unwrap(),
            RebuildPhase::NotStarted
        );
        assert!(!monitor.has_started());

        monitor.observe(OperationProgress::Percent(0)).unwrap();
        monitor.observe(OperationProgress::Percent(40)).unwrap();
        monitor.observe(OperationProgress::Percent(40)).unwrap();
        assert_eq!(
            monitor.observe(OperationProgress::Idle).unwrap(),
            RebuildPhase::Done
        );
        assert_eq!(monitor.summary().readings, vec![0, 40]);
    }

    #[test]
    fn test_progress_going_backwards_is_a_mismatch() {
        let mut monitor = RebuildMonitor::new(DriveId(2));
        monitor.observe(OperationProgress::Percent(60)).unwrap();
        let err = monitor.observe(OperationProgress::Percent(10)).unwrap_err();
        assert!(matches!(err, VerifyError::StateMismatch { .. }));
    }

    #[test]
    fn test_no_restart_after_done() {
        let mut monitor = RebuildMonitor::new(DriveId(2));
        monitor.observe(OperationProgress::Percent(99)).unwrap();
        monitor.observe(OperationProgress::Idle).unwrap();
        assert!(monitor.observe(OperationProgress::Percent(1)).is_err());
    }
}
