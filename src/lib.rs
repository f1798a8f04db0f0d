// Allow uppercase acronyms for industry-standard terms like GHS, FGI, AEN
#![allow(clippy::upper_case_acronyms)]

pub mod config;
pub mod error;
pub mod harness;
pub mod model;
pub mod runner;
pub mod scenarios;
pub mod sdk;
pub mod session;
pub mod sim;
pub mod ui;

// Re-export the pieces every scenario touches
pub use config::{HarnessConfig, TimingConfig};
pub use harness::{Harness, PendingExpectation};
pub use runner::{RunReport, Scenario, ScenarioRunner};
pub use session::Session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

// Global flag for handling Ctrl+C interrupts
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set the interrupt flag (called by signal handler)
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Check if an interrupt has been received
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Reset the interrupt flag (primarily for testing)
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Everything that can stop a verification scenario.
///
/// Every variant is fatal to the running scenario; see
/// [`error::FailureClass`] for how variants group into the failure taxonomy.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("stimulus '{operation}' could not be issued: {reason}")]
    StimulusFailed { operation: String, reason: String },

    #[error("{expectation} was not observed within {}", humantime::format_duration(*.waited))]
    ExpectationTimeout {
        expectation: String,
        waited: Duration,
    },

    #[error("{field} mismatch: {left_path} reports {left:?}, {right_path} reports {right:?}")]
    StateMismatch {
        field: String,
        left_path: String,
        left: String,
        right_path: String,
        right: String,
    },

    #[error("{reader} returned no value for '{key}'")]
    MissingProperty { reader: &'static str, key: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("controller call failed: {0}")]
    Collaborator(String),

    #[error("invalid value: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted by user")]
    Interrupted,
}

impl VerifyError {
    /// Shorthand for a two-path disagreement on `field`.
    pub fn mismatch(
        field: impl Into<String>,
        left_path: impl Into<String>,
        left: impl Into<String>,
        right_path: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        VerifyError::StateMismatch {
            field: field.into(),
            left_path: left_path.into(),
            left: left.into(),
            right_path: right_path.into(),
            right: right.into(),
        }
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;

#[cfg(test)]
mod lib_tests;
