/// Failure handling for verification scenarios
///
/// Verification failures are never retried; this module only decides how a
/// failure is *reported* and how long a read may be *repeated* before the
/// absence of a value becomes a failure.
///
/// ```text
/// ┌──────────────────────────────┐
/// │  Runner (per-step reporting) │
/// └──────────────┬───────────────┘
///                │
///      ┌─────────┴──────────┐
///      ↓                    ↓
/// ┌──────────────┐   ┌──────────────┐
/// │Classification│   │    Poll      │
/// │ (taxonomy)   │   │ (read loops) │
/// └──────────────┘   └──────────────┘
/// ```
pub mod classification;
pub mod poll;

pub use classification::{ClassifiedFailure, FailureClass, FailureContext};
pub use poll::{poll_until, FixedAttempts, PollStrategy, UntilCeiling};
