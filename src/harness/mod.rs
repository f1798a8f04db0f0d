/// Expectation-verification harness
///
/// ```text
///   register ──► arm ──► stimulus ──► settle ──► assert_resolved
///      │                                              │
///      └── PendingExpectation (event stream)          ▼
///                                    cross_check (SDK vs CLI)
/// ```
///
/// Every check is a hard stop. Only reads of values expected to change
/// (progress, versions, pending flags) are repeated, and always within a
/// bound.
pub mod cross_check;
pub mod expectation;
pub mod progress;
pub mod verifier;

pub use cross_check::{check_capacity, cross_check, hex_to_decimal, Normalization, Reading};
pub use expectation::{Expectation, PendingExpectation};
pub use progress::{LogProgress, ProgressSink, RebuildMonitor, RebuildPhase, RebuildSummary};
pub use verifier::Harness;
