// Controller asynchronous event notifications (AENs)

use super::drive::DriveId;
use super::volume::VolumeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kinds a scenario can wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    PdInserted,
    PdRemoved,
    PdStateChange,
    PdRebuildStart,
    PdRebuildStartAuto,
    PdRebuildDone,
    GlobalSpareCreated,
    LdCreated,
    LdInitSuccessful,
    LdOptimal,
    LdDegraded,
    LdDeleted,
    ConfigCleared,
    FirmwareFlashed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PdInserted => "pd-inserted",
            EventKind::PdRemoved => "pd-removed",
            EventKind::PdStateChange => "pd-state-change",
            EventKind::PdRebuildStart => "pd-rebuild-start",
            EventKind::PdRebuildStartAuto => "pd-rebuild-start-auto",
            EventKind::PdRebuildDone => "pd-rebuild-done",
            EventKind::GlobalSpareCreated => "global-spare-created",
            EventKind::LdCreated => "ld-created",
            EventKind::LdInitSuccessful => "ld-init-successful",
            EventKind::LdOptimal => "ld-optimal",
            EventKind::LdDegraded => "ld-degraded",
            EventKind::LdDeleted => "ld-deleted",
            EventKind::ConfigCleared => "config-cleared",
            EventKind::FirmwareFlashed => "firmware-flashed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One event as delivered by the controller's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerEvent {
    /// Controller-wide sequence number
    pub seq: u64,
    pub kind: EventKind,
    pub drive: Option<DriveId>,
    pub volume: Option<VolumeId>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.kind)?;
        if let Some(drive) = self.drive {
            write!(f, " {}", drive)?;
        }
        if let Some(volume) = self.volume {
            write!(f, " {}", volume)?;
        }
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}

/// Which events of a kind satisfy an expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventScope {
    Any,
    Drive(DriveId),
    Volume(VolumeId),
}

impl EventScope {
    pub fn admits(&self, event: &ControllerEvent) -> bool {
        match self {
            EventScope::Any => true,
            EventScope::Drive(id) => event.drive == Some(*id),
            EventScope::Volume(id) => event.volume == Some(*id),
        }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventScope::Any => Ok(()),
            EventScope::Drive(id) => write!(f, " on {}", id),
            EventScope::Volume(id) => write!(f, " on {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, drive: Option<u16>, volume: Option<u16>) -> ControllerEvent {
        ControllerEvent {
            seq: 1,
            kind,
            drive: drive.map(DriveId),
            volume: volume.map(VolumeId),
            timestamp: Utc::now(),
            description: String::new(),
        }
    }

    #[test]
    fn test_scope_admits() {
        let rebuild = event(EventKind::PdRebuildStartAuto, Some(5), None);
        assert!(EventScope::Any.admits(&rebuild));
        assert!(EventScope::Drive(DriveId(5)).admits(&rebuild));
        assert!(!EventScope::Drive(DriveId(6)).admits(&rebuild));
        assert!(!EventScope::Volume(VolumeId(0)).admits(&rebuild));
    }

    #[test]
    fn test_event_display() {
        let ev = event(EventKind::LdDegraded, None, Some(2));
        assert_eq!(ev.to_string(), "#1 ld-degraded VD2");
        assert_eq!(EventScope::Drive(DriveId(3)).to_string(), " on PD3");
    }

    #[test]
    fn test_kind_serializes_by_name() {
        let json = serde_json::to_string(&EventKind::PdRebuildStartAuto).unwrap();
        assert_eq!(json, format!("\"{}\"", EventKind::PdRebuildStartAuto.name()));
    }
}
