/// Polling strategies for progress and occupancy reads
///
/// Verification never retries a *judgement*: a mismatch or a missing event is
/// final. What does repeat is the *read* of a value that is expected to change
/// (rebuild progress, FGI state, an event handle's pending flag). This module
/// bounds those loops, either by a fixed number of attempts standing in for a
/// wall-clock deadline, or by a ceiling on a sentinel-terminated loop.
use crate::{is_interrupted, VerifyError, VerifyResult};
use std::time::Duration;
use tokio::time::Instant;

/// Poll strategy trait
pub trait PollStrategy: Send + Sync {
    /// Determine if another read should be attempted
    fn should_poll(&self, attempt: u32, elapsed: Duration) -> bool;

    /// Delay before the next read
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Upper bound on time spent, used in timeout reports
    fn budget(&self) -> Duration;
}

/// Fixed number of reads at a fixed interval
///
/// `FixedAttempts::new(5s, 24)` reproduces the "two minutes, checked every five
/// seconds" budget used for event arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedAttempts {
    /// Delay between reads
    interval: Duration,

    /// Total number of reads
    max_attempts: u32,
}

impl FixedAttempts {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl PollStrategy for FixedAttempts {
    fn should_poll(&self, attempt: u32, _elapsed: Duration) -> bool {
        attempt < self.max_attempts
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        self.interval
    }

    fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Reads at a fixed interval until the value appears or a ceiling elapses
///
/// Used for sentinel-terminated loops (rebuild, FGI) where the number of
/// reads is not known up front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UntilCeiling {
    interval: Duration,
    ceiling: Duration,
}

impl UntilCeiling {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { interval, ceiling }
    }
}

impl PollStrategy for UntilCeiling {
    fn should_poll(&self, _attempt: u32, elapsed: Duration) -> bool {
        elapsed < self.ceiling
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        self.interval
    }

    fn budget(&self) -> Duration {
        self.ceiling
    }
}

/// Read until `read` yields a value, sleeping between reads per `strategy`
///
/// Read errors propagate immediately. Exhausting the strategy yields
/// [`VerifyError::ExpectationTimeout`] naming `what`.
pub async fn poll_until<T, F>(strategy: &dyn PollStrategy, what: &str, mut read: F) -> VerifyResult<T>
where
    F: FnMut() -> VerifyResult<Option<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        if is_interrupted() {
            return Err(VerifyError::Interrupted);
        }

        if let Some(value) = read()? {
            tracing::debug!(what, attempt, "poll satisfied");
            return Ok(value);
        }

        attempt += 1;
        let elapsed = start.elapsed();
        if !strategy.should_poll(attempt, elapsed) {
            return Err(VerifyError::ExpectationTimeout {
                expectation: what.to_string(),
                waited: elapsed.max(strategy.budget()),
            });
        }

        tokio::time::sleep(strategy.next_delay(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use serial_test::serial;

    #[test]
    fn test_fixed_attempts_budget() {
        let strategy = FixedAttempts::new(Duration::from_secs(5), 24);
        assert_eq!(strategy.budget(), Duration::from_secs(120));
        assert!(strategy.should_poll(23, Duration::ZERO));
        assert!(!strategy.should_poll(24, Duration::ZERO));
    }

    #[test]
    fn test_fixed_attempts_never_zero() {
        let strategy = FixedAttempts::new(Duration::from_secs(1), 0);
        assert_eq!(strategy.max_attempts(), 1);
    }

    #[test]
    fn test_until_ceiling() {
        let strategy = UntilCeiling::new(Duration::from_secs(10), Duration::from_secs(60));
        assert!(strategy.should_poll(1000, Duration::from_secs(59)));
        assert!(!strategy.should_poll(1, Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_poll_until_counts_reads() {
        crate::reset_interrupted();
        let strategy = FixedAttempts::new(Duration::from_secs(5), 24);
        let mut reads = 0;

        let value = poll_until(&strategy, "third read", || {
            reads += 1;
            Ok((reads == 3).then_some(reads))
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_poll_until_exhausts_budget() {
        crate::reset_interrupted();
        let strategy = FixedAttempts::new(Duration::from_secs(5), 24);
        let mut reads = 0;

        let err = poll_until(&strategy, "never", || {
            reads += 1;
            Ok(None::<()>)
        })
        .await
        .unwrap_err();

        assert_eq!(reads, 24);
        assert_eq!(FailureClass::of(&err), FailureClass::ExpectationTimeout);
        assert!(err.to_string().contains("never"));
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_poll_until_propagates_read_error() {
        crate::reset_interrupted();
        let strategy = FixedAttempts::new(Duration::from_secs(1), 10);

        let err = poll_until(&strategy, "broken", || {
            Err::<Option<()>, _>(VerifyError::Collaborator("sdk gone".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, VerifyError::Collaborator(_)));
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_poll_until_honours_interrupt() {
        crate::set_interrupted();
        let strategy = FixedAttempts::new(Duration::from_secs(1), 10);

        let err = poll_until(&strategy, "interrupted", || Ok(None::<()>))
            .await
            .unwrap_err();
        crate::reset_interrupted();

        assert!(matches!(err, VerifyError::Interrupted));
    }
}
