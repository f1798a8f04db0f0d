/// Assertion helpers for run reports and controller state
use anyhow::Result;
use raid_verify::error::FailureClass;
use raid_verify::model::{DriveFilter, DriveState};
use raid_verify::runner::{RunOutcome, StepOutcome};
use raid_verify::sdk::ControllerAdapter;
use raid_verify::RunReport;

/// Assert that every step passed and no teardown was needed
pub fn assert_passed(report: &RunReport) -> Result<()> {
    anyhow::ensure!(
        report.passed(),
        "{} failed: {:?}",
        report.scenario,
        report.failure().map(|f| (f.context.step, f.class, f.message.clone()))
    );
    anyhow::ensure!(
        report.steps.iter().all(|s| s.outcome == StepOutcome::Passed),
        "{} passed with steps not run",
        report.scenario
    );
    anyhow::ensure!(report.teardown.is_none(), "teardown ran after a passing run");
    Ok(())
}

/// Assert the run stopped at `step` with `class`, later steps untouched
pub fn assert_failed_at(report: &RunReport, step: usize, class: FailureClass) -> Result<()> {
    anyhow::ensure!(
        report.outcome == RunOutcome::Failed,
        "expected failure, got {}",
        report.outcome
    );
    let failure = report
        .failure()
        .ok_or_else(|| anyhow::anyhow!("failed run recorded no failure"))?;
    anyhow::ensure!(
        failure.context.step == step && failure.class == class,
        "expected {} at step {}, got {} at step {}: {}",
        class,
        step,
        failure.class,
        failure.context.step,
        failure.message
    );
    for later in report.steps.iter().filter(|s| s.index > step) {
        anyhow::ensure!(
            later.outcome == StepOutcome::NotRun,
            "step {} ran after the failure",
            later.index
        );
    }
    Ok(())
}

/// Assert teardown ran and succeeded
pub fn assert_teardown_clean(report: &RunReport) -> Result<()> {
    match &report.teardown {
        Some(None) => Ok(()),
        Some(Some(failure)) => anyhow::bail!("teardown failed: {}", failure.message),
        None => anyhow::bail!("teardown did not run"),
    }
}

/// Assert the controller is back to an empty configuration
pub fn assert_unconfigured(sdk: &dyn ControllerAdapter) -> Result<()> {
    let volumes = sdk.volumes()?;
    anyhow::ensure!(volumes.is_empty(), "{} volume(s) left behind", volumes.len());

    let configured: Vec<_> = sdk
        .drives(&DriveFilter::any())?
        .into_iter()
        .filter(|d| d.state != DriveState::UnconfiguredGood)
        .map(|d| (d.id, d.state))
        .collect();
    anyhow::ensure!(configured.is_empty(), "drives still configured: {:?}", configured);
    Ok(())
}
