// Controller-level properties as read through the SDK and CLI paths

use super::drive::DriveId;
use super::volume::LogicalVolume;
use crate::{VerifyError, VerifyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Background task rates (percent of controller bandwidth)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRates {
    pub bgi: u8,
    pub cc: u8,
    pub patrol_read: u8,
    pub rebuild: u8,
    pub reconstruction: u8,
}

impl ControllerRates {
    /// (SDK field name, CLI key, value) triples in comparison order
    pub fn cli_pairs(&self) -> [(&'static str, &'static str, u8); 5] {
        [
            ("bgiRate", "bgi_rate_current", self.bgi),
            ("ccRate", "check_consistency_rate_current", self.cc),
            ("patrolReadRate", "pr_rate_current", self.patrol_read),
            ("rebuildRate", "rebuild_rate_current", self.rebuild),
            ("reconRate", "reconstruction_rate_current", self.reconstruction),
        ]
    }
}

impl Default for ControllerRates {
    fn default() -> Self {
        Self {
            bgi: 30,
            cc: 30,
            patrol_read: 30,
            rebuild: 30,
            reconstruction: 30,
        }
    }
}

/// Controller properties read through the SDK
///
/// PCI identifiers are decimal strings on this path; the CLI reports them in
/// hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkControllerInfo {
    pub firmware_version: String,
    pub bios_version: String,
    pub product_name: String,
    pub pci_vendor_id: String,
    pub pci_subvendor_id: String,
    pub pci_subdevice_id: String,
    pub alarm_enabled: bool,
    pub memory_size_mb: u32,
    pub rates: ControllerRates,
    pub disable_auto_rebuild: bool,
    pub restore_hot_spare_on_insertion: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
}

/// Drive and volume health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerHealth {
    pub pd_optimal: u32,
    pub pd_pred_fail: u32,
    pub pd_failed: u32,
    pub ld_optimal: u32,
    pub ld_critical: u32,
    pub ld_offline: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityGroup {
    Cluster,
    RaidLevels,
    AdapterOperations,
    PdMixSupport,
}

impl CapabilityGroup {
    pub fn all() -> [CapabilityGroup; 4] {
        [
            CapabilityGroup::Cluster,
            CapabilityGroup::RaidLevels,
            CapabilityGroup::AdapterOperations,
            CapabilityGroup::PdMixSupport,
        ]
    }
}

impl fmt::Display for CapabilityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityGroup::Cluster => "cluster",
            CapabilityGroup::RaidLevels => "raidLevels",
            CapabilityGroup::AdapterOperations => "adapterOperations",
            CapabilityGroup::PdMixSupport => "pdMixSupport",
        };
        f.write_str(name)
    }
}

/// Drive enclosure attached to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub id: u16,
    /// Server backplane rather than an external expander enclosure
    pub backplane: bool,
    pub slot_count: u16,
}

/// SDK-side controller settings a scenario may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerSetting {
    DisableAutoRebuild(bool),
    RestoreHotSpareOnInsertion(bool),
    /// Emergency-spare and fail-history properties back to test defaults
    TestDefaults,
}

/// Key/value property map read through the CLI path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliProperties(BTreeMap<String, String>);

impl CliProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value for `key`, missing keys are a verification failure
    pub fn get(&self, key: &str) -> VerifyResult<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| VerifyError::MissingProperty {
                reader: "cli",
                key: key.to_string(),
            })
    }

    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for CliProperties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Point-in-time controller read through both paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub sdk: SdkControllerInfo,
    pub driver: DriverInfo,
    pub cli: CliProperties,
    pub taken_at: DateTime<Utc>,
}

/// Configuration captured before a scenario and restored on failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PretestSnapshot {
    pub volumes: Vec<LogicalVolume>,
    pub hot_spares: Vec<DriveId>,
    pub settings: SdkControllerInfo,
    pub taken_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_properties_missing_key() {
        let props = CliProperties::new().with("bios_version", "7.02.00.0");
        assert_eq!(props.get("bios_version").unwrap(), "7.02.00.0");

        let err = props.get("vendor_id").unwrap_err();
        assert!(matches!(err, VerifyError::MissingProperty { reader: "cli", .. }));
        assert!(props.get_opt("vendor_id").is_none());
    }

    #[test]
    fn test_rate_pairs_cover_all_rates() {
        let rates = ControllerRates {
            bgi: 1,
            cc: 2,
            patrol_read: 3,
            rebuild: 4,
            reconstruction: 5,
        };
        let values: Vec<u8> = rates.cli_pairs().iter().map(|(_, _, v)| *v).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }
}
