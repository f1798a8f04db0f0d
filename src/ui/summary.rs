// Run summaries and the scenario catalog, colored for the terminal

use crate::runner::{RunOutcome, RunReport, Scenario, StepOutcome};
use colored::Colorize;
use std::fmt::Write as _;
use std::time::Duration;

fn outcome_label(outcome: RunOutcome) -> colored::ColoredString {
    match outcome {
        RunOutcome::Passed => outcome.to_string().green().bold(),
        RunOutcome::Failed => outcome.to_string().red().bold(),
        RunOutcome::Interrupted => outcome.to_string().yellow().bold(),
    }
}

fn step_mark(outcome: StepOutcome) -> colored::ColoredString {
    match outcome {
        StepOutcome::Passed => "✓".green(),
        StepOutcome::Failed => "✗".red(),
        StepOutcome::NotRun => "-".dimmed(),
    }
}

/// Multi-line summary of a finished run
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let elapsed = humantime::format_duration(Duration::from_secs(report.duration_ms / 1000));

    let _ = writeln!(
        out,
        "\n{} {} on controller {}  {}  ({})",
        "Scenario".bold(),
        report.scenario.cyan(),
        report.controller,
        outcome_label(report.outcome),
        elapsed
    );
    let _ = writeln!(out, "  run id {}", report.run_id.to_string().dimmed());

    if let Some(failure) = &report.setup_failure {
        let _ = writeln!(out, "  {} setup: {} {}", "✗".red(), failure.class, failure.message);
    }

    for step in &report.steps {
        let _ = writeln!(
            out,
            "  {} {:>2}. {:<55} {:>6} ms",
            step_mark(step.outcome),
            step.index,
            step.title,
            step.duration_ms
        );
        if let Some(failure) = &step.failure {
            let _ = writeln!(out, "       {} {}", failure.class.to_string().red(), failure.message);
            let _ = writeln!(out, "       {}", failure.class.description().dimmed());
        }
    }

    match &report.teardown {
        Some(None) => {
            let _ = writeln!(out, "  teardown {}", "completed".green());
        }
        Some(Some(failure)) => {
            let _ = writeln!(out, "  teardown {}: {}", "failed".red(), failure.message);
        }
        None => {}
    }
    out
}

pub fn print_report(report: &RunReport) {
    print!("{}", render_report(report));
}

/// Scenario names, descriptions and steps
pub fn render_catalog(scenarios: &[Box<dyn Scenario>]) -> String {
    let mut out = String::new();
    for scenario in scenarios {
        let power = if scenario.needs_power() {
            " [power switch]".yellow().to_string()
        } else {
            String::new()
        };
        let _ = writeln!(out, "{}{}", scenario.name().cyan().bold(), power);
        let _ = writeln!(out, "  {}", scenario.description());
        for (i, title) in scenario.steps().iter().enumerate() {
            let _ = writeln!(out, "  {:>2}. {}", i + 1, title);
        }
        out.push('\n');
    }
    out
}

pub fn print_catalog(scenarios: &[Box<dyn Scenario>]) {
    print!("{}", render_catalog(scenarios));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassifiedFailure, FailureContext};
    use crate::runner::StepReport;
    use crate::VerifyError;
    use chrono::Utc;
    use uuid::Uuid;

    fn report(outcome: RunOutcome, failed_step: Option<usize>) -> RunReport {
        let steps = (1..=3)
            .map(|index| {
                let failed = Some(index) == failed_step;
                StepReport {
                    index,
                    title: format!("step {}", index),
                    outcome: match failed_step {
                        Some(f) if index == f => StepOutcome::Failed,
                        Some(f) if index > f => StepOutcome::NotRun,
                        _ => StepOutcome::Passed,
                    },
                    duration_ms: 10,
                    failure: failed.then(|| {
                        ClassifiedFailure::new(
                            &VerifyError::Precondition("not enough drives".to_string()),
                            FailureContext::new("demo", index, 0),
                        )
                    }),
                }
            })
            .collect();
        RunReport {
            run_id: Uuid::new_v4(),
            scenario: "demo".to_string(),
            controller: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 30,
            outcome,
            setup_failure: None,
            steps,
            teardown: failed_step.map(|_| None),
        }
    }

    #[test]
    fn test_passed_report_lists_every_step() {
        colored::control::set_override(false);
        let text = render_report(&report(RunOutcome::Passed, None));
        assert!(text.contains("demo on controller 0  PASSED"));
        assert_eq!(text.matches('✓').count(), 3);
        assert!(!text.contains("teardown"));
    }

    #[test]
    fn test_failed_report_shows_class_and_teardown() {
        colored::control::set_override(false);
        let text = render_report(&report(RunOutcome::Failed, Some(2)));
        assert!(text.contains("FAILED"));
        assert!(text.contains("PreconditionFailure precondition failed: not enough drives"));
        assert!(text.contains("teardown completed"));
        assert_eq!(text.matches('✗').count(), 1);
    }

    #[test]
    fn test_catalog_marks_power_scenarios() {
        colored::control::set_override(false);
        let text = render_catalog(&crate::scenarios::all());
        assert!(text.contains("event-verification [power switch]"));
        assert!(text.contains("boot-drive\n"));
        assert!(text.contains("   1. set CC rate, then restore factory defaults"));
    }
}
