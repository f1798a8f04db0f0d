// Registered event expectations
//
// An expectation subscribes to the controller's event stream at the moment it
// is registered. Events sent before that are invisible to it; events sent
// after it are buffered in the subscription until the expectation is checked.

use crate::model::{ControllerEvent, EventKind, EventScope};
use crate::{VerifyError, VerifyResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// What is being waited for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Expectation {
    pub kind: EventKind,
    pub scope: EventScope,
    pub registered_at: DateTime<Utc>,
}

impl Expectation {
    pub fn new(kind: EventKind, scope: EventScope) -> Self {
        Self {
            kind,
            scope,
            registered_at: Utc::now(),
        }
    }

    pub fn is_satisfied_by(&self, event: &ControllerEvent) -> bool {
        event.kind == self.kind && self.scope.admits(event)
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AEN {}{}", self.kind, self.scope)
    }
}

/// Handle to a registered expectation
///
/// Pending until the first matching event is seen, then resolved for good.
pub struct PendingExpectation {
    expectation: Expectation,
    events: broadcast::Receiver<ControllerEvent>,
    resolved: Option<ControllerEvent>,
    closed: bool,
}

impl PendingExpectation {
    pub(crate) fn new(expectation: Expectation, events: broadcast::Receiver<ControllerEvent>) -> Self {
        Self {
            expectation,
            events,
            resolved: None,
            closed: false,
        }
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// The event that resolved this expectation, if any
    pub fn resolved_by(&self) -> Option<&ControllerEvent> {
        self.resolved.as_ref()
    }

    /// Whether no matching event has been seen since registration
    ///
    /// Never blocks: drains whatever the stream has buffered.
    pub fn is_pending(&mut self) -> bool {
        if self.resolved.is_some() {
            return false;
        }

        while !self.closed {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.observe(event) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Closed) => self.closed = true,
            }
        }

        true
    }

    /// Wait up to `window` for the expectation to resolve
    ///
    /// Returns `ExpectationTimeout` if it is still pending afterwards.
    pub async fn wait(&mut self, window: Duration) -> VerifyResult<&ControllerEvent> {
        if self.is_pending() && !self.closed {
            let Self {
                expectation,
                events,
                resolved,
                closed,
            } = &mut *self;

            let outcome = tokio::time::timeout(window, async {
                loop {
                    match events.recv().await {
                        Ok(event) if expectation.is_satisfied_by(&event) => return Some(event),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(expectation = %expectation, skipped, "event stream lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            })
            .await;

            match outcome {
                Ok(Some(event)) => {
                    tracing::info!(expectation = %expectation, event = %event, "expected event found");
                    *resolved = Some(event);
                }
                Ok(None) => *closed = true,
                Err(_) => {}
            }
        }

        match self.resolved {
            Some(ref event) => Ok(event),
            None => Err(self.timeout(window)),
        }
    }

    /// Error describing this expectation as timed out after `waited`
    pub fn timeout(&self, waited: Duration) -> VerifyError {
        VerifyError::ExpectationTimeout {
            expectation: self.expectation.to_string(),
            waited,
        }
    }

    fn observe(&mut self, event: ControllerEvent) -> bool {
        if !self.expectation.is_satisfied_by(&event) {
            return false;
        }
        tracing::info!(expectation = %self.expectation, event = %event, "expected event found");
        self.resolved = Some(event);
        true
    }

    fn lagged(&self, skipped: u64) {
        tracing::warn!(expectation = %self.expectation, skipped, "event stream lagged");
    }
}

impl fmt::Debug for PendingExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExpectation")
            .field("expectation", &self.expectation)
            .field("resolved", &self.resolved)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DriveId, VolumeId};

    fn event(seq: u64, kind: EventKind, drive: Option<u16>) -> ControllerEvent {
        ControllerEvent {
            seq,
            kind,
            drive: drive.map(DriveId),
            volume: None,
            timestamp: Utc::now(),
            description: String::new(),
        }
    }

    #[test]
    fn test_pending_until_matching_event() {
        let (tx, rx) = broadcast::channel(16);
        let mut pending =
            PendingExpectation::new(Expectation::new(EventKind::LdCreated, EventScope::Any), rx);

        assert!(pending.is_pending());
        tx.send(event(1, EventKind::PdStateChange, Some(1))).unwrap();
        assert!(pending.is_pending());
        tx.send(event(2, EventKind::LdCreated, None)).unwrap();
        assert!(!pending.is_pending());
        assert_eq!(pending.resolved_by().map(|e| e.seq), Some(2));

        // Stays resolved
        tx.send(event(3, EventKind::LdCreated, None)).unwrap();
        assert!(!pending.is_pending());
        assert_eq!(pending.resolved_by().map(|e| e.seq), Some(2));
    }

    #[test]
    fn test_events_before_registration_are_ignored() {
        let (tx, _keep) = broadcast::channel(16);
        tx.send(event(1, EventKind::LdCreated, None)).unwrap();

        let mut pending = PendingExpectation::new(
            Expectation::new(EventKind::LdCreated, EventScope::Any),
            tx.subscribe(),
        );
        assert!(pending.is_pending());
    }

    #[test]
    fn test_scope_filters_other_drives() {
        let (tx, rx) = broadcast::channel(16);
        let mut pending = PendingExpectation::new(
            Expectation::new(EventKind::PdRebuildStart, EventScope::Drive(DriveId(4))),
            rx,
        );

        tx.send(event(1, EventKind::PdRebuildStart, Some(5))).unwrap();
        assert!(pending.is_pending());
        tx.send(event(2, EventKind::PdRebuildStart, Some(4))).unwrap();
        assert!(!pending.is_pending());
    }

    #[test]
    fn test_lagged_stream_still_resolves() {
        let (tx, rx) = broadcast::channel(2);
        let mut pending =
            PendingExpectation::new(Expectation::new(EventKind::LdOptimal, EventScope::Any), rx);

        for seq in 0..5 {
            tx.send(event(seq, EventKind::PdInserted, None)).unwrap();
        }
        tx.send(event(9, EventKind::LdOptimal, None)).unwrap();

        assert!(!pending.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_later_event() {
        let (tx, rx) = broadcast::channel(16);
        let mut pending = PendingExpectation::new(
            Expectation::new(EventKind::LdDegraded, EventScope::Volume(VolumeId(0))),
            rx,
        );

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let mut ev = event(7, EventKind::LdDegraded, None);
            ev.volume = Some(VolumeId(0));
            let _ = tx.send(ev);
        });

        let event = pending.wait(Duration::from_secs(120)).await.unwrap();
        assert_eq!(event.seq, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_tx, rx) = broadcast::channel::<ControllerEvent>(16);
        let mut pending =
            PendingExpectation::new(Expectation::new(EventKind::ConfigCleared, EventScope::Any), rx);

        let err = pending.wait(Duration::from_secs(600)).await.unwrap_err();
        match err {
            VerifyError::ExpectationTimeout { expectation, waited } => {
                assert!(expectation.contains("config-cleared"));
                assert_eq!(waited, Duration::from_secs(600));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_times_out_immediately() {
        let (tx, rx) = broadcast::channel::<ControllerEvent>(16);
        drop(tx);
        let mut pending =
            PendingExpectation::new(Expectation::new(EventKind::LdCreated, EventScope::Any), rx);

        let start = tokio::time::Instant::now();
        assert!(pending.wait(Duration::from_secs(60)).await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
