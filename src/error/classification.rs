/// Failure classification for scenario reports
///
/// Every verification failure is fatal to the running scenario, but reports
/// and operators still need to know *which kind* of failure stopped it: the
/// stimulus could not be issued, an event never arrived, two read paths
/// disagreed, or the hardware did not meet the scenario's prerequisites.
use crate::VerifyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Taxonomy of verification failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// The operation itself could not be issued
    /// Examples: volume create rejected, drive command refused, flash failed
    StimulusFailure,

    /// An expected asynchronous event was never observed within its bound
    ExpectationTimeout,

    /// Two independent reads of the same fact disagree
    /// Examples: SDK BIOS version vs CLI BIOS version, CLI state vs expected
    StateMismatch,

    /// Insufficient hardware resources for the scenario
    /// Examples: too few unconfigured-good drives, no backplane drives
    PreconditionFailure,

    /// A collaborator read failed outright (SDK, CLI, power switch)
    Collaborator,

    /// Operator requested shutdown
    Interrupted,
}

impl FailureClass {
    /// Classify a verification error
    pub fn of(error: &VerifyError) -> Self {
        match error {
            VerifyError::StimulusFailed { .. } => FailureClass::StimulusFailure,
            VerifyError::ExpectationTimeout { .. } => FailureClass::ExpectationTimeout,
            VerifyError::StateMismatch { .. } | VerifyError::MissingProperty { .. } => {
                FailureClass::StateMismatch
            }
            VerifyError::Precondition(_) => FailureClass::PreconditionFailure,
            VerifyError::Collaborator(_)
            | VerifyError::Parse(_)
            | VerifyError::Config(_)
            | VerifyError::Io(_) => FailureClass::Collaborator,
            VerifyError::Interrupted => FailureClass::Interrupted,
        }
    }

    /// Get human-readable description of failure class
    pub fn description(&self) -> &'static str {
        match self {
            FailureClass::StimulusFailure => "Operation could not be issued to the controller",
            FailureClass::ExpectationTimeout => "Expected event was never observed",
            FailureClass::StateMismatch => "Independent read paths disagree",
            FailureClass::PreconditionFailure => "Hardware does not meet scenario requirements",
            FailureClass::Collaborator => "Controller, CLI or power switch call failed",
            FailureClass::Interrupted => "Scenario cancelled by user",
        }
    }

    /// Whether the failure points at the device under test rather than the rig
    pub fn implicates_controller(&self) -> bool {
        matches!(
            self,
            FailureClass::ExpectationTimeout | FailureClass::StateMismatch
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::StimulusFailure => write!(f, "StimulusFailure"),
            FailureClass::ExpectationTimeout => write!(f, "ExpectationTimeout"),
            FailureClass::StateMismatch => write!(f, "StateMismatch"),
            FailureClass::PreconditionFailure => write!(f, "PreconditionFailure"),
            FailureClass::Collaborator => write!(f, "Collaborator"),
            FailureClass::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Where and when a failure occurred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Scenario identifier (e.g., "pd-operation-progress")
    pub scenario: String,

    /// Step number, 0 for init and teardown
    pub step: usize,

    /// Controller index the scenario was driving
    pub controller: u32,

    /// Timestamp when the failure was recorded
    pub timestamp: DateTime<Utc>,

    /// Additional metadata (raid level, drive, volume, ...)
    pub metadata: BTreeMap<String, String>,
}

impl FailureContext {
    pub fn new(scenario: impl Into<String>, step: usize, controller: u32) -> Self {
        Self {
            scenario: scenario.into(),
            step,
            controller,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata to the context
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A classified failure as it appears in a run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    pub class: FailureClass,
    pub message: String,
    pub context: FailureContext,
}

impl ClassifiedFailure {
    pub fn new(error: &VerifyError, context: FailureContext) -> Self {
        Self {
            class: FailureClass::of(error),
            message: error.to_string(),
            context,
        }
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} step {} on controller {}: {}",
            self.class,
            self.context.scenario,
            self.context.step,
            self.context.controller,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_taxonomy_mapping() {
        let timeout = VerifyError::ExpectationTimeout {
            expectation: "ld-created".to_string(),
            waited: Duration::from_secs(120),
        };
        assert_eq!(FailureClass::of(&timeout), FailureClass::ExpectationTimeout);

        let mismatch = VerifyError::mismatch("bios_version", "sdk", "a", "cli", "b");
        assert_eq!(FailureClass::of(&mismatch), FailureClass::StateMismatch);

        let missing = VerifyError::MissingProperty {
            reader: "cli",
            key: "vendor_id".to_string(),
        };
        assert_eq!(FailureClass::of(&missing), FailureClass::StateMismatch);

        let pre = VerifyError::Precondition("3 drives short".to_string());
        assert_eq!(FailureClass::of(&pre), FailureClass::PreconditionFailure);

        assert_eq!(
            FailureClass::of(&VerifyError::Interrupted),
            FailureClass::Interrupted
        );
    }

    #[test]
    fn test_controller_implicated_only_by_observations() {
        assert!(FailureClass::StateMismatch.implicates_controller());
        assert!(FailureClass::ExpectationTimeout.implicates_controller());
        assert!(!FailureClass::PreconditionFailure.implicates_controller());
        assert!(!FailureClass::Collaborator.implicates_controller());
    }

    #[test]
    fn test_classified_failure_display() {
        let err = VerifyError::StimulusFailed {
            operation: "create_volume".to_string(),
            reason: "not enough drives".to_string(),
        };
        let ctx = FailureContext::new("pd-operation-progress", 1, 0).with_metadata("raid", "1");
        let failure = ClassifiedFailure::new(&err, ctx);

        let text = failure.to_string();
        assert!(text.contains("StimulusFailure"));
        assert!(text.contains("step 1"));
        assert_eq!(failure.context.metadata["raid"], "1");
    }

    #[test]
    fn test_failure_class_serializes_kebab_case() {
        let json = serde_json::to_string(&FailureClass::ExpectationTimeout).unwrap();
        assert_eq!(json, "\"expectation-timeout\"");
    }
}
