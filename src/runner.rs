// Scenario runner
//
// Captures pretest configuration, runs a scenario's init and numbered steps
// in order, stops at the first failure, runs teardown after a failure and
// records everything in a serializable report.

use crate::error::{ClassifiedFailure, FailureContext};
use crate::session::Session;
use crate::{is_interrupted, VerifyError, VerifyResult};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::time::Instant;
use uuid::Uuid;

/// A validation test case
///
/// Steps are numbered from 1. Accumulated state belongs in the [`Session`],
/// not in the scenario.
pub trait Scenario: Send + Sync {
    /// Stable identifier used on the command line
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Step titles in execution order
    fn steps(&self) -> &'static [&'static str];

    /// Whether the scenario drives a remote power switch
    fn needs_power(&self) -> bool {
        false
    }

    /// Check prerequisites before any step runs
    fn init<'a>(&'a self, _session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn step<'a>(&'a self, index: usize, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>>;

    /// Put the rig back after a failure
    fn teardown<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, VerifyResult<()>> {
        Box::pin(restore_pretest(session))
    }
}

/// Restore the captured pretest configuration on every controller
pub async fn restore_pretest(session: &Session) -> VerifyResult<()> {
    for harness in session.controllers() {
        let ctrl = harness.controller();
        match session.pretest(ctrl) {
            Some(snapshot) => {
                tracing::info!(ctrl, "restoring pretest configuration");
                harness.sdk().restore_pretest(snapshot)?;
            }
            None => tracing::warn!(ctrl, "no pretest configuration captured, nothing to restore"),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    Passed,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub title: String,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
    pub failure: Option<ClassifiedFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Passed,
    Failed,
    Interrupted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Passed => write!(f, "PASSED"),
            RunOutcome::Failed => write!(f, "FAILED"),
            RunOutcome::Interrupted => write!(f, "INTERRUPTED"),
        }
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub controller: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    /// Failure during pretest capture or init
    pub setup_failure: Option<ClassifiedFailure>,
    pub steps: Vec<StepReport>,
    /// Present when teardown ran; `None` inside means it succeeded
    pub teardown: Option<Option<ClassifiedFailure>>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }

    /// First failure recorded in the run
    pub fn failure(&self) -> Option<&ClassifiedFailure> {
        self.setup_failure
            .as_ref()
            .or_else(|| self.steps.iter().find_map(|s| s.failure.as_ref()))
    }

    pub fn write_json(&self, path: &Path) -> VerifyResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VerifyError::Parse(format!("report serialization failed: {}", e)))?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "run report written");
        Ok(())
    }
}

/// Drives a scenario through its lifecycle
#[derive(Debug, Default)]
pub struct ScenarioRunner;

impl ScenarioRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, scenario: &dyn Scenario, session: &mut Session) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let controller = session.harness().controller();
        let name = scenario.name();

        tracing::info!(scenario = name, run_id = %session.run_id, ctrl = controller, "scenario started");

        let mut steps: Vec<StepReport> = scenario
            .steps()
            .iter()
            .enumerate()
            .map(|(i, title)| StepReport {
                index: i + 1,
                title: title.to_string(),
                outcome: StepOutcome::NotRun,
                duration_ms: 0,
                failure: None,
            })
            .collect();

        let mut setup_failure = None;
        let mut failed_error: Option<VerifyError> = None;

        let setup = match capture_pretest(session) {
            Ok(()) => scenario.init(session).await,
            Err(e) => Err(e),
        };

        if let Err(err) = setup {
            tracing::error!(scenario = name, error = %err, "scenario setup failed");
            setup_failure = Some(ClassifiedFailure::new(
                &err,
                FailureContext::new(name, 0, controller),
            ));
            failed_error = Some(err);
        } else {
            for report in steps.iter_mut() {
                if is_interrupted() {
                    failed_error = Some(VerifyError::Interrupted);
                    report.outcome = StepOutcome::Failed;
                    report.failure = Some(ClassifiedFailure::new(
                        &VerifyError::Interrupted,
                        FailureContext::new(name, report.index, controller),
                    ));
                    break;
                }

                tracing::info!(scenario = name, step = report.index, title = %report.title, "step started");
                let step_clock = Instant::now();
                let result = scenario.step(report.index, session).await;
                report.duration_ms = step_clock.elapsed().as_millis() as u64;

                match result {
                    Ok(()) => {
                        report.outcome = StepOutcome::Passed;
                        tracing::info!(
                            scenario = name,
                            step = report.index,
                            took = %humantime::format_duration(step_clock.elapsed()),
                            "step passed"
                        );
                    }
                    Err(err) => {
                        tracing::error!(scenario = name, step = report.index, error = %err, "step failed");
                        report.outcome = StepOutcome::Failed;
                        report.failure = Some(ClassifiedFailure::new(
                            &err,
                            FailureContext::new(name, report.index, controller)
                                .with_metadata("title", report.title.clone()),
                        ));
                        failed_error = Some(err);
                        break;
                    }
                }
            }
        }

        let teardown = match failed_error {
            Some(_) => {
                session.clear_carried();
                tracing::warn!(scenario = name, "running teardown after failure");
                let outcome = scenario.teardown(session).await;
                Some(outcome.err().map(|err| {
                    tracing::error!(scenario = name, error = %err, "teardown failed");
                    ClassifiedFailure::new(&err, FailureContext::new(name, 0, controller))
                }))
            }
            None => None,
        };

        let outcome = match failed_error {
            None => RunOutcome::Passed,
            Some(VerifyError::Interrupted) => RunOutcome::Interrupted,
            Some(_) => RunOutcome::Failed,
        };

        tracing::info!(scenario = name, %outcome, "scenario finished");

        RunReport {
            run_id: session.run_id,
            scenario: name.to_string(),
            controller,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            outcome,
            setup_failure,
            steps,
            teardown,
        }
    }
}

fn capture_pretest(session: &mut Session) -> VerifyResult<()> {
    let snapshots = session
        .controllers()
        .map(|h| Ok((h.controller(), h.sdk().capture_pretest()?)))
        .collect::<VerifyResult<Vec<_>>>()?;

    for (ctrl, snapshot) in snapshots {
        tracing::debug!(ctrl, volumes = snapshot.volumes.len(), "pretest configuration captured");
        session.record_pretest(ctrl, snapshot);
    }
    Ok(())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
