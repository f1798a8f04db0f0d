// Logical volume (virtual drive) handling
//
// RAID level, state lifecycle and cache policy of controller-managed volumes

use super::drive::DriveId;
use super::event::{ControllerEvent, EventKind};
use crate::{VerifyError, VerifyResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller-assigned logical volume identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub u16);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VD{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
    Raid1E, // Integrated-offload mirroring over an odd drive count
}

impl RaidLevel {
    /// Map the numeric level used on the command line (11 selects RAID-1E)
    pub fn from_number(level: u8) -> VerifyResult<Self> {
        match level {
            0 => Ok(RaidLevel::Raid0),
            1 => Ok(RaidLevel::Raid1),
            5 => Ok(RaidLevel::Raid5),
            6 => Ok(RaidLevel::Raid6),
            10 => Ok(RaidLevel::Raid10),
            11 => Ok(RaidLevel::Raid1E),
            other => Err(VerifyError::Parse(format!("unsupported RAID level {}", other))),
        }
    }

    /// Minimum member count
    pub fn min_drives(&self) -> usize {
        match self {
            RaidLevel::Raid0 => 1,
            RaidLevel::Raid1 => 2,
            RaidLevel::Raid5 => 3,
            RaidLevel::Raid6 => 4,
            RaidLevel::Raid10 => 4,
            RaidLevel::Raid1E => 3,
        }
    }

    /// Whether the volume survives the loss of one member
    pub fn is_redundant(&self) -> bool {
        !matches!(self, RaidLevel::Raid0)
    }

    /// RAID label printed by the CLI
    pub fn cli_code(&self) -> &'static str {
        match self {
            RaidLevel::Raid0 => "RAID0",
            RaidLevel::Raid1 => "RAID1",
            RaidLevel::Raid5 => "RAID5",
            RaidLevel::Raid6 => "RAID6",
            RaidLevel::Raid10 => "RAID10",
            RaidLevel::Raid1E => "RAID1E",
        }
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_code())
    }
}

/// Operational state of a logical volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Initializing,
    Optimal,
    Degraded,
    Rebuilding,
    Offline,
    Deleted,
}

impl VolumeState {
    /// State code reported by the CLI path
    ///
    /// The CLI does not distinguish transient states: an initializing volume
    /// reads optimal and a rebuilding one reads degraded.
    pub fn cli_code(&self) -> &'static str {
        match self {
            VolumeState::Creating | VolumeState::Initializing | VolumeState::Optimal => "OPTL",
            VolumeState::Degraded | VolumeState::Rebuilding => "DGRD",
            VolumeState::Offline => "OfLn",
            VolumeState::Deleted => "-",
        }
    }

    /// Legal single-step transitions
    pub fn can_transition_to(&self, next: VolumeState, init_requested: bool) -> bool {
        use VolumeState::*;
        if next == Deleted {
            return *self != Deleted;
        }
        match (self, next) {
            (Creating, Initializing) => true,
            (Creating, Optimal) => !init_requested,
            (Initializing, Optimal) => true,
            (Optimal, Degraded) | (Optimal, Offline) => true,
            (Degraded, Rebuilding) | (Degraded, Offline) | (Degraded, Optimal) => true,
            (Rebuilding, Optimal) | (Rebuilding, Degraded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolumeState::Creating => "creating",
            VolumeState::Initializing => "initializing",
            VolumeState::Optimal => "optimal",
            VolumeState::Degraded => "degraded",
            VolumeState::Rebuilding => "rebuilding",
            VolumeState::Offline => "offline",
            VolumeState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Observed state history of one volume, rejecting illegal transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTracker {
    volume: VolumeId,
    init_requested: bool,
    history: Vec<VolumeState>,
}

impl LifecycleTracker {
    /// Start tracking a volume that was just requested
    pub fn new(volume: VolumeId, init_requested: bool) -> Self {
        Self {
            volume,
            init_requested,
            history: vec![VolumeState::Creating],
        }
    }

    pub fn current(&self) -> VolumeState {
        *self.history.last().unwrap_or(&VolumeState::Creating)
    }

    pub fn history(&self) -> &[VolumeState] {
        &self.history
    }

    /// Record an observed state; repeats of the current state are ignored
    pub fn observe(&mut self, state: VolumeState) -> VerifyResult<()> {
        let current = self.current();
        if state == current {
            return Ok(());
        }
        if !current.can_transition_to(state, self.init_requested) {
            return Err(VerifyError::mismatch(
                format!("{} lifecycle", self.volume),
                "expected successor of",
                current.to_string(),
                "observed",
                state.to_string(),
            ));
        }
        tracing::debug!(volume = %self.volume, from = %current, to = %state, "volume state transition");
        self.history.push(state);
        Ok(())
    }

    /// Take an init-complete event for this volume as proof that
    /// initialization ran, even if no read caught the volume initializing
    ///
    /// Returns whether the event applied to this volume.
    pub fn confirm_init(&mut self, event: &ControllerEvent) -> bool {
        if event.kind != EventKind::LdInitSuccessful || event.volume != Some(self.volume) {
            return false;
        }
        if self.current() == VolumeState::Creating {
            tracing::debug!(volume = %self.volume, "initialization finished between reads");
            self.history.push(VolumeState::Initializing);
        }
        true
    }

    /// Whether initialization was observed before the volume went optimal
    pub fn initialized_before_optimal(&self) -> bool {
        let init = self.history.iter().position(|s| *s == VolumeState::Initializing);
        let optimal = self.history.iter().position(|s| *s == VolumeState::Optimal);
        matches!((init, optimal), (Some(i), Some(o)) if i < o)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    WriteBack,
    WriteThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPolicy {
    ReadAhead,
    NoReadAhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoPolicy {
    Direct,
    Cached,
}

/// Cache policy of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub write: WritePolicy,
    pub read: ReadPolicy,
    pub io: IoPolicy,
}

impl CachePolicy {
    pub fn new(write: WritePolicy, read: ReadPolicy, io: IoPolicy) -> Self {
        Self { write, read, io }
    }

    /// CLI rendering, e.g. "WB,RA,Direct"
    pub fn cli_code(&self) -> String {
        let write = match self.write {
            WritePolicy::WriteBack => "WB",
            WritePolicy::WriteThrough => "WT",
        };
        let read = match self.read {
            ReadPolicy::ReadAhead => "RA",
            ReadPolicy::NoReadAhead => "NoRA",
        };
        let io = match self.io {
            IoPolicy::Direct => "Direct",
            IoPolicy::Cached => "Cached",
        };
        format!("{},{},{}", write, read, io)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(WritePolicy::WriteBack, ReadPolicy::ReadAhead, IoPolicy::Direct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMode {
    None,
    Fast,
}

/// Request to create one or more volumes on a drive group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub raid: RaidLevel,
    pub size_bytes: u64,
    /// Explicit drive group; `None` lets the controller pick unconfigured-good drives
    pub drives: Option<Vec<DriveId>>,
    pub init: InitMode,
    pub cache: CachePolicy,
    /// Number of volumes to carve from the same drive group
    pub count: u8,
}

impl VolumeSpec {
    pub fn new(raid: RaidLevel, size_bytes: u64) -> Self {
        Self {
            raid,
            size_bytes,
            drives: None,
            init: InitMode::None,
            cache: CachePolicy::default(),
            count: 1,
        }
    }

    pub fn on_drives(mut self, drives: Vec<DriveId>) -> Self {
        self.drives = Some(drives);
        self
    }

    pub fn fast_init(mut self) -> Self {
        self.init = InitMode::Fast;
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn count(mut self, count: u8) -> Self {
        self.count = count.max(1);
        self
    }
}

/// Logical volume as reported by the SDK path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub id: VolumeId,
    pub raid: RaidLevel,
    pub size_bytes: u64,
    pub members: Vec<DriveId>,
    pub state: VolumeState,
    pub cache: CachePolicy,
}

impl LogicalVolume {
    /// Whether foreground initialization is still running
    pub fn fgi_running(&self) -> bool {
        self.state == VolumeState::Initializing
    }

    /// Position of `drive` within the member list, as addressed by the CLI
    pub fn member_index(&self, drive: DriveId) -> Option<usize> {
        self.members.iter().position(|d| *d == drive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raid_level_numbers() {
        assert_eq!(RaidLevel::from_number(1).unwrap(), RaidLevel::Raid1);
        assert_eq!(RaidLevel::from_number(11).unwrap(), RaidLevel::Raid1E);
        assert!(RaidLevel::from_number(7).is_err());
        assert_eq!(RaidLevel::Raid1E.min_drives(), 3);
        assert!(!RaidLevel::Raid0.is_redundant());
    }

    #[test]
    fn test_lifecycle_with_init() {
        let mut tracker = LifecycleTracker::new(VolumeId(0), true);
        tracker.observe(VolumeState::Initializing).unwrap();
        tracker.observe(VolumeState::Initializing).unwrap();
        tracker.observe(VolumeState::Optimal).unwrap();
        tracker.observe(VolumeState::Degraded).unwrap();
        tracker.observe(VolumeState::Rebuilding).unwrap();
        tracker.observe(VolumeState::Optimal).unwrap();
        tracker.observe(VolumeState::Deleted).unwrap();

        assert!(tracker.initialized_before_optimal());
        assert_eq!(tracker.history().len(), 7);
    }

    #[test]
    fn test_lifecycle_rejects_skipped_init() {
        let mut tracker = LifecycleTracker::new(VolumeId(3), true);
        let err = tracker.observe(VolumeState::Optimal).unwrap_err();
        assert!(matches!(err, VerifyError::StateMismatch { .. }));
        assert!(!tracker.initialized_before_optimal());
    }

    fn init_done(volume: u16) -> ControllerEvent {
        ControllerEvent {
            seq: 7,
            kind: EventKind::LdInitSuccessful,
            drive: None,
            volume: Some(VolumeId(volume)),
            timestamp: chrono::Utc::now(),
            description: String::new(),
        }
    }

    #[test]
    fn test_init_event_covers_unsampled_initialization() {
        let mut tracker = LifecycleTracker::new(VolumeId(3), true);
        assert!(tracker.confirm_init(&init_done(3)));
        tracker.observe(VolumeState::Optimal).unwrap();

        assert!(tracker.initialized_before_optimal());
        assert_eq!(
            tracker.history(),
            &[VolumeState::Creating, VolumeState::Initializing, VolumeState::Optimal]
        );
    }

    #[test]
    fn test_init_event_for_other_volume_is_ignored() {
        let mut tracker = LifecycleTracker::new(VolumeId(3), true);
        assert!(!tracker.confirm_init(&init_done(4)));
        assert!(tracker.observe(VolumeState::Optimal).is_err());
    }

    #[test]
    fn test_init_event_after_sampled_initialization_adds_nothing() {
        let mut tracker = LifecycleTracker::new(VolumeId(3), true);
        tracker.observe(VolumeState::Initializing).unwrap();
        assert!(tracker.confirm_init(&init_done(3)));
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn test_lifecycle_without_init_may_go_straight_to_optimal() {
        let mut tracker = LifecycleTracker::new(VolumeId(1), false);
        tracker.observe(VolumeState::Optimal).unwrap();
        assert_eq!(tracker.current(), VolumeState::Optimal);
    }

    #[test]
    fn test_nothing_follows_deleted() {
        let mut tracker = LifecycleTracker::new(VolumeId(1), false);
        tracker.observe(VolumeState::Deleted).unwrap();
        assert!(tracker.observe(VolumeState::Optimal).is_err());
        assert!(!VolumeState::Deleted.can_transition_to(VolumeState::Deleted, false));
    }

    #[test]
    fn test_cli_codes_collapse_transient_states() {
        assert_eq!(VolumeState::Initializing.cli_code(), "OPTL");
        assert_eq!(VolumeState::Rebuilding.cli_code(), "DGRD");
        assert_eq!(
            CachePolicy::new(WritePolicy::WriteThrough, ReadPolicy::NoReadAhead, IoPolicy::Cached)
                .cli_code(),
            "WT,NoRA,Cached"
        );
    }

    #[test]
    fn test_member_index() {
        let volume = LogicalVolume {
            id: VolumeId(0),
            raid: RaidLevel::Raid1,
            size_bytes: 0,
            members: vec![DriveId(4), DriveId(9)],
            state: VolumeState::Optimal,
            cache: CachePolicy::default(),
        };
        assert_eq!(volume.member_index(DriveId(9)), Some(1));
        assert_eq!(volume.member_index(DriveId(1)), None);
        assert!(!volume.fgi_running());
    }
}
