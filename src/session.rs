/// Per-run scenario context
///
/// Everything a scenario accumulates between steps (volumes it created,
/// drives it singled out, expectations deliberately kept open for a later
/// step) lives here and is handed to every step explicitly.
use crate::harness::{Harness, PendingExpectation};
use crate::model::{DriveId, PretestSnapshot, VolumeId};
use crate::sdk::PowerSwitch;
use crate::{VerifyError, VerifyResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Run-time inputs a scenario may need
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// Firmware image to flash
    pub firmware_image: Option<PathBuf>,
}

pub struct Session {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub params: SessionParams,
    harness: Harness,
    peers: Vec<Harness>,
    power: Option<Arc<dyn PowerSwitch>>,
    pretest: BTreeMap<u32, PretestSnapshot>,
    volumes: BTreeMap<u32, Vec<VolumeId>>,
    drives: BTreeMap<String, DriveId>,
    modules: Vec<u16>,
    carried: BTreeMap<String, PendingExpectation>,
}

impl Session {
    pub fn new(harness: Harness) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            params: SessionParams::default(),
            harness,
            peers: Vec::new(),
            power: None,
            pretest: BTreeMap::new(),
            volumes: BTreeMap::new(),
            drives: BTreeMap::new(),
            modules: Vec::new(),
            carried: BTreeMap::new(),
        }
    }

    /// Additional controllers the scenario runs against
    pub fn with_peers(mut self, peers: Vec<Harness>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_power(mut self, power: Arc<dyn PowerSwitch>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn with_params(mut self, params: SessionParams) -> Self {
        self.params = params;
        self
    }

    /// Harness of the controller selected for the run
    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Selected controller first, then peers
    pub fn controllers(&self) -> impl Iterator<Item = &Harness> {
        std::iter::once(&self.harness).chain(self.peers.iter())
    }

    pub fn power(&self) -> VerifyResult<&dyn PowerSwitch> {
        self.power
            .as_deref()
            .ok_or_else(|| VerifyError::Precondition("no power switch attached".to_string()))
    }

    pub fn has_power(&self) -> bool {
        self.power.is_some()
    }

    pub fn record_pretest(&mut self, ctrl: u32, snapshot: PretestSnapshot) {
        self.pretest.insert(ctrl, snapshot);
    }

    pub fn pretest(&self, ctrl: u32) -> Option<&PretestSnapshot> {
        self.pretest.get(&ctrl)
    }

    pub fn track_volumes(&mut self, ctrl: u32, ids: impl IntoIterator<Item = VolumeId>) {
        self.volumes.entry(ctrl).or_default().extend(ids);
    }

    pub fn volumes(&self, ctrl: u32) -> &[VolumeId] {
        self.volumes.get(&ctrl).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stop tracking every volume on `ctrl`, returning them
    pub fn take_volumes(&mut self, ctrl: u32) -> Vec<VolumeId> {
        self.volumes.remove(&ctrl).unwrap_or_default()
    }

    /// Remember a drive under a scenario-chosen role
    pub fn set_drive(&mut self, role: &str, drive: DriveId) {
        self.drives.insert(role.to_string(), drive);
    }

    pub fn drive(&self, role: &str) -> VerifyResult<DriveId> {
        self.drives
            .get(role)
            .copied()
            .ok_or_else(|| VerifyError::Precondition(format!("no drive recorded as '{}'", role)))
    }

    /// Drive-carrier modules in the order the scenario uses them
    pub fn set_modules(&mut self, modules: Vec<u16>) {
        self.modules = modules;
    }

    pub fn modules(&self) -> &[u16] {
        &self.modules
    }

    pub fn module(&self, index: usize) -> VerifyResult<u16> {
        self.modules.get(index).copied().ok_or_else(|| {
            VerifyError::Precondition(format!(
                "power module #{} not available ({} drive carriers)",
                index,
                self.modules.len()
            ))
        })
    }

    /// Keep an expectation open for a later step
    pub fn carry(&mut self, name: &str, pending: PendingExpectation) {
        self.carried.insert(name.to_string(), pending);
    }

    /// Take back an expectation carried by an earlier step
    pub fn take_carried(&mut self, name: &str) -> VerifyResult<PendingExpectation> {
        self.carried.remove(name).ok_or_else(|| {
            VerifyError::Precondition(format!("no expectation '{}' carried from an earlier step", name))
        })
    }

    /// Drop expectations left open, e.g. after a failed step
    pub fn clear_carried(&mut self) {
        self.carried.clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("run_id", &self.run_id)
            .field("controller", &self.harness.controller())
            .field("peers", &self.peers.len())
            .field("volumes", &self.volumes)
            .field("drives", &self.drives)
            .field("carried", &self.carried.keys().collect::<Vec<_>>())
            .finish()
    }
}
