// Physical drive records
//
// Identity, location and state of a physical drive as seen by the SDK, plus
// the codes the CLI path uses for the same facts.

use crate::{VerifyError, VerifyResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Controller-assigned physical drive identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriveId(pub u16);

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PD{}", self.0)
    }
}

/// Enclosure/slot address, written "252:3" on the CLI path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnclosureSlot {
    pub enclosure: u16,
    pub slot: u16,
}

impl EnclosureSlot {
    pub fn new(enclosure: u16, slot: u16) -> Self {
        Self { enclosure, slot }
    }
}

impl fmt::Display for EnclosureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.enclosure, self.slot)
    }
}

lazy_static! {
    static ref LOCATION_RE: Regex =
        Regex::new(r"^\s*(\d+)\s*:\s*(\d+)\s*$").expect("location regex is valid");
}

impl FromStr for EnclosureSlot {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = LOCATION_RE
            .captures(s)
            .ok_or_else(|| VerifyError::Parse(format!("'{}' is not an enclosure:slot pair", s)))?;
        let enclosure = caps[1]
            .parse()
            .map_err(|_| VerifyError::Parse(format!("enclosure id out of range in '{}'", s)))?;
        let slot = caps[2]
            .parse()
            .map_err(|_| VerifyError::Parse(format!("slot out of range in '{}'", s)))?;
        Ok(Self { enclosure, slot })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    HDD,
    SSD,
}

impl MediaType {
    /// Upper-case code used by the CLI
    pub fn cli_code(&self) -> &'static str {
        match self {
            MediaType::HDD => "HDD",
            MediaType::SSD => "SSD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interface {
    SAS,
    SATA,
}

impl Interface {
    pub fn cli_code(&self) -> &'static str {
        match self {
            Interface::SAS => "SAS",
            Interface::SATA => "SATA",
        }
    }
}

/// Operational state of a physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveState {
    UnconfiguredGood,
    Online,
    Offline,
    Rebuilding,
    HotSpare,
    /// Configured member that is no longer reachable (pulled)
    Missing,
}

impl DriveState {
    /// State code reported by the CLI path
    pub fn cli_code(&self) -> &'static str {
        match self {
            DriveState::UnconfiguredGood => "UGood",
            DriveState::Online => "Onln",
            DriveState::Offline => "Offln",
            DriveState::Rebuilding => "Rbld",
            DriveState::HotSpare => "GHS",
            DriveState::Missing => "Msng",
        }
    }

    pub fn from_cli_code(code: &str) -> VerifyResult<Self> {
        let state = match code.trim() {
            "UGood" => DriveState::UnconfiguredGood,
            "Onln" => DriveState::Online,
            "Offln" => DriveState::Offline,
            "Rbld" => DriveState::Rebuilding,
            "GHS" => DriveState::HotSpare,
            "Msng" => DriveState::Missing,
            other => {
                return Err(VerifyError::Parse(format!(
                    "unknown drive state code '{}'",
                    other
                )))
            }
        };
        Ok(state)
    }

    /// Whether a drive in this state belongs to a volume
    pub fn is_configured(&self) -> bool {
        matches!(
            self,
            DriveState::Online | DriveState::Offline | DriveState::Rebuilding | DriveState::Missing
        )
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveState::UnconfiguredGood => "unconfigured-good",
            DriveState::Online => "online",
            DriveState::Offline => "offline",
            DriveState::Rebuilding => "rebuilding",
            DriveState::HotSpare => "hot-spare",
            DriveState::Missing => "missing",
        };
        f.write_str(name)
    }
}

/// Progress of a long-running drive or volume operation
///
/// `Idle` replaces the bare `-1` sentinel: it says only that no operation is
/// running *now*, and callers decide whether that means "not started" or
/// "finished" from what they observed earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationProgress {
    Idle,
    Percent(u8),
}

impl OperationProgress {
    pub fn percent(&self) -> Option<u8> {
        match self {
            OperationProgress::Idle => None,
            OperationProgress::Percent(p) => Some(*p),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, OperationProgress::Percent(_))
    }

    /// Parse the CLI rendering, where "-1" means idle
    pub fn from_cli(text: &str) -> VerifyResult<Self> {
        let value: i32 = text
            .trim()
            .parse()
            .map_err(|_| VerifyError::Parse(format!("progress '{}' is not a number", text)))?;
        match value {
            -1 => Ok(OperationProgress::Idle),
            0..=100 => Ok(OperationProgress::Percent(value as u8)),
            _ => Err(VerifyError::Parse(format!("progress {} out of range", value))),
        }
    }

    pub fn to_cli(&self) -> String {
        match self {
            OperationProgress::Idle => "-1".to_string(),
            OperationProgress::Percent(p) => p.to_string(),
        }
    }
}

/// Physical drive as reported by the SDK path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveRecord {
    pub id: DriveId,
    pub location: EnclosureSlot,
    pub size_bytes: u64,
    pub media: MediaType,
    pub interface: Interface,
    pub media_error_count: u32,
    pub firmware_revision: String,
    /// Logical sector size in bytes
    pub sector_size: u32,
    /// Unique id in "<prefix>:<sas address>" form
    pub unique_id: String,
    pub state: DriveState,
    pub is_foreign: bool,
}

impl DriveRecord {
    /// SAS address portion of the unique id
    pub fn sas_address(&self) -> &str {
        self.unique_id.rsplit(':').next().unwrap_or(&self.unique_id)
    }
}

/// Selection criteria for drive queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveFilter {
    pub state: Option<DriveState>,
    pub media: Option<MediaType>,
    pub interface: Option<Interface>,
    pub enclosure: Option<u16>,
    /// `Some(false)` excludes foreign drives, `Some(true)` keeps only them
    pub foreign: Option<bool>,
    pub sector_size: Option<u32>,
}

impl DriveFilter {
    pub fn any() -> Self {
        Self::default()
    }

    /// Unconfigured-good, non-foreign drives
    pub fn unconfigured_good() -> Self {
        Self {
            state: Some(DriveState::UnconfiguredGood),
            foreign: Some(false),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: MediaType) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn in_enclosure(mut self, enclosure: u16) -> Self {
        self.enclosure = Some(enclosure);
        self
    }

    pub fn with_sector_size(mut self, bytes: u32) -> Self {
        self.sector_size = Some(bytes);
        self
    }

    pub fn matches(&self, drive: &DriveRecord) -> bool {
        self.state.map_or(true, |s| s == drive.state)
            && self.media.map_or(true, |m| m == drive.media)
            && self.interface.map_or(true, |i| i == drive.interface)
            && self.enclosure.map_or(true, |e| e == drive.location.enclosure)
            && self.foreign.map_or(true, |f| f == drive.is_foreign)
            && self.sector_size.map_or(true, |s| s == drive.sector_size)
    }
}

/// Commands that change a drive's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveCommand {
    MakeOffline,
    MakeOnline,
    StartRebuild,
    MakeGlobalHotSpare,
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveCommand::MakeOffline => "make offline",
            DriveCommand::MakeOnline => "make online",
            DriveCommand::StartRebuild => "start rebuild",
            DriveCommand::MakeGlobalHotSpare => "make global hot spare",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn drive(state: DriveState) -> DriveRecord {
        DriveRecord {
            id: DriveId(4),
            location: EnclosureSlot::new(252, 4),
            size_bytes: 1_000_000_000_000,
            media: MediaType::HDD,
            interface: Interface::SAS,
            media_error_count: 0,
            firmware_revision: "A003".to_string(),
            sector_size: 512,
            unique_id: "sas:5000C500A1B2C3D4".to_string(),
            state,
            is_foreign: false,
        }
    }

    #[test_case("252:3", 252, 3 ; "plain")]
    #[test_case(" 8 : 11 ", 8, 11 ; "spaced")]
    fn test_location_parse(text: &str, enclosure: u16, slot: u16) {
        let loc: EnclosureSlot = text.parse().unwrap();
        assert_eq!(loc, EnclosureSlot::new(enclosure, slot));
    }

    #[test]
    fn test_location_roundtrips_through_display() {
        let loc = EnclosureSlot::new(252, 7);
        assert_eq!(loc.to_string().parse::<EnclosureSlot>().unwrap(), loc);
        assert!("252-7".parse::<EnclosureSlot>().is_err());
    }

    #[test]
    fn test_drive_state_codes() {
        for state in [
            DriveState::UnconfiguredGood,
            DriveState::Online,
            DriveState::Offline,
            DriveState::Rebuilding,
            DriveState::HotSpare,
            DriveState::Missing,
        ] {
            assert_eq!(DriveState::from_cli_code(state.cli_code()).unwrap(), state);
        }
        assert!(DriveState::from_cli_code("JBOD").is_err());
    }

    #[test]
    fn test_progress_sentinel() {
        assert_eq!(OperationProgress::from_cli("-1").unwrap(), OperationProgress::Idle);
        assert_eq!(
            OperationProgress::from_cli("42").unwrap(),
            OperationProgress::Percent(42)
        );
        assert!(OperationProgress::from_cli("101").is_err());
        assert!(!OperationProgress::Idle.is_running());
        assert_eq!(OperationProgress::Percent(7).to_cli(), "7");
    }

    #[test]
    fn test_sas_address_from_unique_id() {
        assert_eq!(drive(DriveState::Online).sas_address(), "5000C500A1B2C3D4");
    }

    #[test]
    fn test_filter_matches() {
        let ugood = drive(DriveState::UnconfiguredGood);
        assert!(DriveFilter::unconfigured_good().matches(&ugood));
        assert!(DriveFilter::unconfigured_good()
            .with_media(MediaType::HDD)
            .with_interface(Interface::SAS)
            .matches(&ugood));
        assert!(!DriveFilter::unconfigured_good()
            .with_media(MediaType::SSD)
            .matches(&ugood));
        assert!(!DriveFilter::any().in_enclosure(8).matches(&ugood));

        let mut foreign = ugood.clone();
        foreign.is_foreign = true;
        assert!(!DriveFilter::unconfigured_good().matches(&foreign));
        assert!(!DriveFilter::unconfigured_good().matches(&drive(DriveState::Online)));
    }

    #[test]
    fn test_filter_by_sector_size() {
        let mut native = drive(DriveState::UnconfiguredGood);
        native.sector_size = 4096;
        let filter = DriveFilter::unconfigured_good().with_sector_size(512);

        assert!(filter.matches(&drive(DriveState::UnconfiguredGood)));
        assert!(!filter.matches(&native));
        assert!(DriveFilter::unconfigured_good().matches(&native));
    }
}
