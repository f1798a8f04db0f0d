// Simulated controller state machine
//
// All mutation happens under the controller's lock. Every state change is
// applied before the event announcing it is sent, so a reader woken by an
// event always sees the new state.

use super::builder::{ControllerSpec, SimProfile};
use crate::model::units::{human_bytes, MIB};
use crate::model::{
    CapabilityGroup, CliProperties, ControllerEvent, ControllerHealth, ControllerRates,
    ControllerSetting, DriveCommand, DriveFilter, DriveId, DriveRecord, DriveState, DriverInfo,
    Enclosure, EnclosureSlot, EventKind, InitMode, Interface, LogicalVolume, OperationProgress,
    PretestSnapshot, RaidLevel, SdkControllerInfo, VolumeId, VolumeSpec, VolumeState,
};
use crate::{VerifyError, VerifyResult};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const DEFAULT_CACHE_FLUSH: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub(crate) struct SimDrive {
    pub record: DriveRecord,
    pub present: bool,
    pub rebuild_started: Option<Instant>,
}

#[derive(Debug, Clone)]
pub(crate) struct SimVolume {
    pub volume: LogicalVolume,
    pub init_started: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct SimState {
    pub ctrl: u32,
    pub profile: SimProfile,
    pub info: SdkControllerInfo,
    pub driver: DriverInfo,
    pub enclosures: Vec<Enclosure>,
    pub sas_address: String,
    pub drives: BTreeMap<DriveId, SimDrive>,
    pub volumes: BTreeMap<VolumeId, SimVolume>,
    pub boot_drive: Option<VolumeId>,
    pub ocr: bool,
    pub cache_flush: Duration,
    pending_flash: Option<(String, Instant)>,
    restarting_until: Option<Instant>,
    seq: u64,
    events: broadcast::Sender<ControllerEvent>,
}

fn percent_of(elapsed: Duration, total: Duration) -> u8 {
    if total.is_zero() {
        return 99;
    }
    let ratio = elapsed.as_secs_f64() / total.as_secs_f64();
    (ratio * 100.0).clamp(0.0, 99.0) as u8
}

/// Capacity a drive group offers to its volumes
fn usable_bytes(raid: RaidLevel, members: u64, smallest: u64) -> u64 {
    match raid {
        RaidLevel::Raid0 => members * smallest,
        RaidLevel::Raid1 => smallest,
        RaidLevel::Raid5 => members.saturating_sub(1) * smallest,
        RaidLevel::Raid6 => members.saturating_sub(2) * smallest,
        RaidLevel::Raid10 | RaidLevel::Raid1E => members * smallest / 2,
    }
}

/// Members a volume can lose and stay online
fn fault_tolerance(raid: RaidLevel) -> usize {
    match raid {
        RaidLevel::Raid0 => 0,
        RaidLevel::Raid6 => 2,
        _ => 1,
    }
}

fn check_group(raid: RaidLevel, members: usize) -> VerifyResult<()> {
    if members < raid.min_drives() {
        return Err(VerifyError::Collaborator(format!(
            "{} needs at least {} drives, got {}",
            raid,
            raid.min_drives(),
            members
        )));
    }
    match raid {
        RaidLevel::Raid1 if members != 2 => Err(VerifyError::Collaborator(format!(
            "RAID1 needs exactly 2 drives, got {}",
            members
        ))),
        RaidLevel::Raid10 if members % 2 != 0 => Err(VerifyError::Collaborator(format!(
            "RAID10 needs an even drive count, got {}",
            members
        ))),
        _ => Ok(()),
    }
}

fn hex_id(decimal: &str) -> VerifyResult<String> {
    let value: u64 = decimal
        .trim()
        .parse()
        .map_err(|_| VerifyError::Parse(format!("PCI id '{}' is not decimal", decimal)))?;
    Ok(format!("0x{:04X}", value))
}

impl SimState {
    pub fn new(
        ctrl: u32,
        spec: ControllerSpec,
        profile: SimProfile,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        let drives = spec
            .drives
            .into_iter()
            .enumerate()
            .map(|(index, (location, drive))| {
                let id = DriveId(index as u16);
                let address = format!("5000C5009{:03X}{:04X}", ctrl, index);
                let record = DriveRecord {
                    id,
                    location,
                    size_bytes: drive.size_bytes,
                    media: drive.media,
                    interface: drive.interface,
                    media_error_count: 0,
                    firmware_revision: drive.firmware_revision,
                    sector_size: drive.sector_size,
                    unique_id: format!("pd{}:{}", index, address),
                    state: DriveState::UnconfiguredGood,
                    is_foreign: drive.foreign,
                };
                (
                    id,
                    SimDrive {
                        record,
                        present: true,
                        rebuild_started: None,
                    },
                )
            })
            .collect();

        Self {
            ctrl,
            profile,
            info: spec.info,
            driver: spec.driver,
            enclosures: spec.enclosures,
            sas_address: spec.sas_address,
            drives,
            volumes: BTreeMap::new(),
            boot_drive: None,
            ocr: spec.ocr,
            cache_flush: DEFAULT_CACHE_FLUSH,
            pending_flash: None,
            restarting_until: None,
            seq: 0,
            events,
        }
    }

    fn emit(
        &mut self,
        kind: EventKind,
        drive: Option<DriveId>,
        volume: Option<VolumeId>,
        description: impl Into<String>,
    ) {
        self.seq += 1;
        let event = ControllerEvent {
            seq: self.seq,
            kind,
            drive,
            volume,
            timestamp: Utc::now(),
            description: description.into(),
        };
        tracing::debug!(ctrl = self.ctrl, event = %event, "controller event");
        // An event nobody listens for is simply lost
        let _ = self.events.send(event);
    }

    /// Apply time-driven progress up to `now`
    pub fn advance(&mut self, now: Instant) {
        if self.restarting_until.map_or(false, |until| until <= now) {
            self.restarting_until = None;
            tracing::info!(ctrl = self.ctrl, "controller back after restart");
        }

        if self.pending_flash.as_ref().map_or(false, |(_, at)| *at <= now) {
            if let Some((version, _)) = self.pending_flash.take() {
                let previous = std::mem::replace(&mut self.info.firmware_version, version.clone());
                self.emit(
                    EventKind::FirmwareFlashed,
                    None,
                    None,
                    format!("{} -> {}", previous, version),
                );
            }
        }

        let fgi = self.profile.fgi;
        let initialized: Vec<VolumeId> = self
            .volumes
            .values()
            .filter(|v| v.init_started.map_or(false, |started| started + fgi <= now))
            .map(|v| v.volume.id)
            .collect();
        for id in initialized {
            if let Some(sim) = self.volumes.get_mut(&id) {
                sim.init_started = None;
                sim.volume.state = VolumeState::Optimal;
            }
            self.emit(EventKind::LdInitSuccessful, None, Some(id), "fast initialization complete");
            self.emit(EventKind::LdOptimal, None, Some(id), "");
        }

        let rebuild = self.profile.rebuild;
        let rebuilt: Vec<DriveId> = self
            .drives
            .values()
            .filter(|d| d.rebuild_started.map_or(false, |started| started + rebuild <= now))
            .map(|d| d.record.id)
            .collect();
        for id in rebuilt {
            self.finish_rebuild(id);
        }
    }

    pub fn ensure_available(&self) -> VerifyResult<()> {
        if self.restarting_until.is_some() {
            return Err(VerifyError::Collaborator(format!(
                "controller {} is restarting",
                self.ctrl
            )));
        }
        Ok(())
    }

    fn known_drive(&self, id: DriveId) -> VerifyResult<&SimDrive> {
        self.drives
            .get(&id)
            .ok_or_else(|| VerifyError::Collaborator(format!("no drive {} on controller {}", id, self.ctrl)))
    }

    pub fn present_drive(&self, id: DriveId) -> VerifyResult<&SimDrive> {
        let drive = self.known_drive(id)?;
        if !drive.present {
            return Err(VerifyError::Collaborator(format!("{} is not present", id)));
        }
        Ok(drive)
    }

    pub fn drive_at(&self, location: EnclosureSlot) -> VerifyResult<&SimDrive> {
        self.drives
            .values()
            .find(|d| d.present && d.record.location == location)
            .ok_or_else(|| VerifyError::Collaborator(format!("no drive present at {}", location)))
    }

    pub fn volume(&self, id: VolumeId) -> VerifyResult<&SimVolume> {
        self.volumes
            .get(&id)
            .ok_or_else(|| VerifyError::Collaborator(format!("no volume {} on controller {}", id, self.ctrl)))
    }

    pub fn list_drives(&self, filter: &DriveFilter) -> Vec<DriveRecord> {
        self.drives
            .values()
            .filter(|d| d.present && filter.matches(&d.record))
            .map(|d| d.record.clone())
            .collect()
    }

    fn volumes_with(&self, drive: DriveId) -> Vec<VolumeId> {
        self.volumes
            .values()
            .filter(|v| v.volume.members.contains(&drive))
            .map(|v| v.volume.id)
            .collect()
    }

    fn set_drive_state(&mut self, id: DriveId, next: DriveState) {
        let previous = match self.drives.get_mut(&id) {
            Some(drive) => std::mem::replace(&mut drive.record.state, next),
            None => return,
        };
        if previous != next {
            self.emit(
                EventKind::PdStateChange,
                Some(id),
                None,
                format!("{} -> {}", previous, next),
            );
        }
    }

    /// State the volume's members put it in
    fn evaluate(&self, id: VolumeId) -> Option<(VolumeState, VolumeState)> {
        let sim = self.volumes.get(&id)?;
        let mut failed = 0;
        let mut rebuilding = 0;
        for member in &sim.volume.members {
            match self.drives.get(member).map(|d| d.record.state) {
                Some(DriveState::Rebuilding) => rebuilding += 1,
                Some(DriveState::Online) => {}
                _ => failed += 1,
            }
        }

        let current = sim.volume.state;
        let next = if failed > fault_tolerance(sim.volume.raid) {
            VolumeState::Offline
        } else if failed > 0 {
            VolumeState::Degraded
        } else if rebuilding > 0 {
            VolumeState::Rebuilding
        } else if current == VolumeState::Initializing {
            VolumeState::Initializing
        } else {
            VolumeState::Optimal
        };
        Some((current, next))
    }

    fn reassess(&mut self, id: VolumeId) {
        let Some((current, next)) = self.evaluate(id) else {
            return;
        };
        if current == next {
            return;
        }
        if let Some(sim) = self.volumes.get_mut(&id) {
            sim.volume.state = next;
            if next != VolumeState::Initializing {
                sim.init_started = None;
            }
        }
        tracing::debug!(ctrl = self.ctrl, volume = %id, from = %current, to = %next, "volume state changed");
        match next {
            VolumeState::Degraded => self.emit(EventKind::LdDegraded, None, Some(id), ""),
            VolumeState::Optimal => self.emit(EventKind::LdOptimal, None, Some(id), ""),
            _ => {}
        }
    }

    fn reassess_volumes_with(&mut self, drive: DriveId) {
        for id in self.volumes_with(drive) {
            self.reassess(id);
        }
    }

    fn lowest_free_volume_id(&self) -> VerifyResult<VolumeId> {
        (0..=u16::MAX)
            .map(VolumeId)
            .find(|id| !self.volumes.contains_key(id))
            .ok_or_else(|| VerifyError::Collaborator("no free volume id".to_string()))
    }

    fn pick_drives(&self, spec: &VolumeSpec) -> VerifyResult<Vec<DriveId>> {
        match &spec.drives {
            Some(drives) => {
                let unique: BTreeSet<&DriveId> = drives.iter().collect();
                if unique.len() != drives.len() {
                    return Err(VerifyError::Collaborator(
                        "drive group lists a drive twice".to_string(),
                    ));
                }
                for id in drives {
                    let drive = self.present_drive(*id)?;
                    if drive.record.state != DriveState::UnconfiguredGood || drive.record.is_foreign {
                        return Err(VerifyError::Collaborator(format!(
                            "{} is {} and cannot join a volume",
                            id, drive.record.state
                        )));
                    }
                }
                Ok(drives.clone())
            }
            None => {
                let picked: Vec<DriveId> = self
                    .list_drives(&DriveFilter::unconfigured_good())
                    .into_iter()
                    .take(spec.raid.min_drives())
                    .map(|d| d.id)
                    .collect();
                Ok(picked)
            }
        }
    }

    pub fn create_volumes(&mut self, spec: &VolumeSpec, now: Instant) -> VerifyResult<Vec<VolumeId>> {
        let members = self.pick_drives(spec)?;
        check_group(spec.raid, members.len())?;

        let smallest = members
            .iter()
            .filter_map(|id| self.drives.get(id))
            .map(|d| d.record.size_bytes)
            .min()
            .unwrap_or(0);
        let usable = usable_bytes(spec.raid, members.len() as u64, smallest);
        let requested = spec.size_bytes.saturating_mul(u64::from(spec.count));
        if spec.size_bytes == 0 || requested > usable {
            return Err(VerifyError::Collaborator(format!(
                "requested {} x {} but the drive group offers {}",
                spec.count,
                human_bytes(spec.size_bytes),
                human_bytes(usable)
            )));
        }

        for id in &members {
            self.set_drive_state(*id, DriveState::Online);
        }

        let mut created = Vec::with_capacity(usize::from(spec.count));
        for _ in 0..spec.count {
            let id = self.lowest_free_volume_id()?;
            let (state, init_started) = match spec.init {
                InitMode::Fast => (VolumeState::Initializing, Some(now)),
                InitMode::None => (VolumeState::Optimal, None),
            };
            self.volumes.insert(
                id,
                SimVolume {
                    volume: LogicalVolume {
                        id,
                        raid: spec.raid,
                        size_bytes: spec.size_bytes,
                        members: members.clone(),
                        state,
                        cache: spec.cache,
                    },
                    init_started,
                },
            );
            self.emit(
                EventKind::LdCreated,
                None,
                Some(id),
                format!("{} {}", spec.raid, human_bytes(spec.size_bytes)),
            );
            if state == VolumeState::Optimal {
                self.emit(EventKind::LdOptimal, None, Some(id), "");
            }
            created.push(id);
        }

        tracing::info!(ctrl = self.ctrl, volumes = ?created, members = ?members, "volumes created");
        Ok(created)
    }

    /// Return drives no longer used by any volume to unconfigured-good
    fn release_members(&mut self, members: &[DriveId]) {
        for id in members {
            if !self.volumes_with(*id).is_empty() {
                continue;
            }
            let present = match self.drives.get_mut(id) {
                Some(drive) => {
                    drive.rebuild_started = None;
                    drive.present
                }
                None => continue,
            };
            if present {
                self.set_drive_state(*id, DriveState::UnconfiguredGood);
            } else if let Some(drive) = self.drives.get_mut(id) {
                drive.record.state = DriveState::UnconfiguredGood;
            }
        }
    }

    pub fn delete_volume(&mut self, id: VolumeId) -> VerifyResult<()> {
        let removed = self
            .volumes
            .remove(&id)
            .ok_or_else(|| VerifyError::Collaborator(format!("no volume {} on controller {}", id, self.ctrl)))?;
        if self.boot_drive == Some(id) {
            self.boot_drive = None;
        }
        self.emit(EventKind::LdDeleted, None, Some(id), "");
        self.release_members(&removed.volume.members);
        Ok(())
    }

    pub fn clear_config(&mut self) -> VerifyResult<()> {
        let ids: Vec<VolumeId> = self.volumes.keys().copied().collect();
        for id in ids {
            self.delete_volume(id)?;
        }

        let spares: Vec<(DriveId, bool)> = self
            .drives
            .values()
            .filter(|d| d.record.state == DriveState::HotSpare)
            .map(|d| (d.record.id, d.present))
            .collect();
        for (id, present) in spares {
            if present {
                self.set_drive_state(id, DriveState::UnconfiguredGood);
            } else if let Some(drive) = self.drives.get_mut(&id) {
                drive.record.state = DriveState::UnconfiguredGood;
            }
        }

        self.emit(EventKind::ConfigCleared, None, None, "");
        Ok(())
    }

    fn start_rebuild(&mut self, id: DriveId, now: Instant, kind: EventKind) {
        if let Some(drive) = self.drives.get_mut(&id) {
            drive.rebuild_started = Some(now);
        }
        self.set_drive_state(id, DriveState::Rebuilding);
        let volume = self.volumes_with(id).first().copied();
        self.emit(kind, Some(id), volume, "");
        self.reassess_volumes_with(id);
    }

    fn finish_rebuild(&mut self, id: DriveId) {
        if let Some(drive) = self.drives.get_mut(&id) {
            drive.rebuild_started = None;
        }
        let volume = self.volumes_with(id).first().copied();
        self.emit(EventKind::PdRebuildDone, Some(id), volume, "");
        self.set_drive_state(id, DriveState::Online);
        self.reassess_volumes_with(id);
    }

    pub fn drive_command(&mut self, id: DriveId, command: DriveCommand, now: Instant) -> VerifyResult<()> {
        let drive = self.present_drive(id)?;
        let state = drive.record.state;
        let foreign = drive.record.is_foreign;
        let refuse = || {
            Err(VerifyError::Collaborator(format!(
                "cannot {} {} while it is {}",
                command, id, state
            )))
        };

        match command {
            DriveCommand::MakeOffline => {
                if state != DriveState::Online {
                    return refuse();
                }
                self.set_drive_state(id, DriveState::Offline);
                self.reassess_volumes_with(id);
            }
            DriveCommand::MakeOnline => {
                if state != DriveState::Offline {
                    return refuse();
                }
                self.set_drive_state(id, DriveState::Online);
                self.reassess_volumes_with(id);
            }
            DriveCommand::StartRebuild => {
                if state != DriveState::Offline || self.volumes_with(id).is_empty() {
                    return refuse();
                }
                self.start_rebuild(id, now, EventKind::PdRebuildStart);
            }
            DriveCommand::MakeGlobalHotSpare => {
                if state != DriveState::UnconfiguredGood || foreign {
                    return refuse();
                }
                self.set_drive_state(id, DriveState::HotSpare);
                self.emit(EventKind::GlobalSpareCreated, Some(id), None, "");
            }
        }
        Ok(())
    }

    pub fn rebuild_progress(&self, id: DriveId, now: Instant) -> VerifyResult<OperationProgress> {
        let drive = self.known_drive(id)?;
        Ok(match drive.rebuild_started {
            Some(started) => OperationProgress::Percent(percent_of(
                now.saturating_duration_since(started),
                self.profile.rebuild,
            )),
            None => OperationProgress::Idle,
        })
    }

    pub fn init_progress(&self, id: VolumeId, now: Instant) -> VerifyResult<OperationProgress> {
        let volume = self.volume(id)?;
        Ok(match volume.init_started {
            Some(started) => OperationProgress::Percent(percent_of(
                now.saturating_duration_since(started),
                self.profile.fgi,
            )),
            None => OperationProgress::Idle,
        })
    }

    /// Drive carrier powered down
    pub fn pull(&mut self, id: DriveId) -> VerifyResult<()> {
        let drive = self
            .drives
            .get_mut(&id)
            .ok_or_else(|| VerifyError::Collaborator(format!("no drive {}", id)))?;
        if !drive.present {
            return Ok(());
        }
        drive.present = false;
        drive.rebuild_started = None;
        let state = drive.record.state;
        let location = drive.record.location;

        self.emit(EventKind::PdRemoved, Some(id), None, format!("removed from {}", location));
        if state.is_configured() {
            self.set_drive_state(id, DriveState::Missing);
            self.reassess_volumes_with(id);
        } else if state == DriveState::HotSpare {
            self.emit(EventKind::PdStateChange, Some(id), None, "hot-spare -> missing");
        }
        Ok(())
    }

    /// Drive carrier powered up
    pub fn insert(&mut self, id: DriveId, now: Instant) -> VerifyResult<()> {
        let drive = self
            .drives
            .get_mut(&id)
            .ok_or_else(|| VerifyError::Collaborator(format!("no drive {}", id)))?;
        if drive.present {
            return Ok(());
        }
        drive.present = true;
        let state = drive.record.state;
        let location = drive.record.location;

        self.emit(EventKind::PdInserted, Some(id), None, format!("inserted in {}", location));
        match state {
            DriveState::Missing => {
                if self.volumes_with(id).is_empty() {
                    self.set_drive_state(id, DriveState::UnconfiguredGood);
                } else if self.info.disable_auto_rebuild {
                    self.set_drive_state(id, DriveState::Offline);
                } else {
                    self.start_rebuild(id, now, EventKind::PdRebuildStartAuto);
                }
            }
            DriveState::HotSpare => {
                if self.info.restore_hot_spare_on_insertion {
                    self.emit(EventKind::PdStateChange, Some(id), None, "missing -> hot-spare");
                    self.emit(EventKind::GlobalSpareCreated, Some(id), None, "restored on insertion");
                } else {
                    self.set_drive_state(id, DriveState::UnconfiguredGood);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn health(&self) -> ControllerHealth {
        let mut health = ControllerHealth::default();
        for drive in self.drives.values() {
            match (drive.present, drive.record.state) {
                (true, DriveState::Offline) | (false, DriveState::Missing) => health.pd_failed += 1,
                (true, _) => health.pd_optimal += 1,
                (false, _) => {}
            }
        }
        for sim in self.volumes.values() {
            match sim.volume.state {
                VolumeState::Degraded | VolumeState::Rebuilding => health.ld_critical += 1,
                VolumeState::Offline => health.ld_offline += 1,
                _ => health.ld_optimal += 1,
            }
        }
        health
    }

    pub fn capabilities(&self, group: CapabilityGroup) -> BTreeMap<String, String> {
        let pairs: &[(&str, &str)] = match group {
            CapabilityGroup::Cluster => &[("clusterAllowed", "false"), ("clusterActive", "false")],
            CapabilityGroup::RaidLevels => &[
                ("raid0", "true"),
                ("raid1", "true"),
                ("raid5", "true"),
                ("raid6", "true"),
                ("raid10", "true"),
                ("raid1E", "true"),
            ],
            CapabilityGroup::AdapterOperations => &[
                ("rebuildRate", "true"),
                ("ccRate", "true"),
                ("bgiRate", "true"),
                ("reconRate", "true"),
                ("patrolReadRate", "true"),
                ("flashFirmware", "true"),
            ],
            CapabilityGroup::PdMixSupport => &[
                ("allowMixInEncl", "true"),
                ("allowMixInLD", "false"),
                ("allowSSDMixInLD", "false"),
            ],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn apply_setting(&mut self, setting: ControllerSetting) {
        match setting {
            ControllerSetting::DisableAutoRebuild(disabled) => self.info.disable_auto_rebuild = disabled,
            ControllerSetting::RestoreHotSpareOnInsertion(restore) => {
                self.info.restore_hot_spare_on_insertion = restore
            }
            ControllerSetting::TestDefaults => {
                tracing::debug!(ctrl = self.ctrl, "test defaults applied");
            }
        }
    }

    pub fn flash(&mut self, image: &Path, now: Instant) -> VerifyResult<()> {
        if self.pending_flash.is_some() {
            return Err(VerifyError::Collaborator("a firmware flash is already in progress".to_string()));
        }
        let version = image
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                VerifyError::Collaborator(format!("'{}' is not a firmware image", image.display()))
            })?;
        tracing::info!(ctrl = self.ctrl, image = %image.display(), "firmware flash started");
        self.pending_flash = Some((version.to_string(), now + self.profile.flash));
        Ok(())
    }

    pub fn restart(&mut self, now: Instant) {
        tracing::info!(ctrl = self.ctrl, "controller restarting");
        self.restarting_until = Some(now + self.profile.restart);
    }

    pub fn factory_defaults(&mut self, restart: bool, now: Instant) {
        self.info.rates = ControllerRates::default();
        self.info.disable_auto_rebuild = false;
        self.info.restore_hot_spare_on_insertion = false;
        self.ocr = true;
        self.cache_flush = DEFAULT_CACHE_FLUSH;
        if restart {
            self.restart(now);
        }
    }

    pub fn capture_pretest(&self) -> PretestSnapshot {
        PretestSnapshot {
            volumes: self.volumes.values().map(|v| v.volume.clone()).collect(),
            hot_spares: self
                .drives
                .values()
                .filter(|d| d.record.state == DriveState::HotSpare)
                .map(|d| d.record.id)
                .collect(),
            settings: self.info.clone(),
            taken_at: Utc::now(),
        }
    }

    pub fn restore_pretest(&mut self, snapshot: &PretestSnapshot) -> VerifyResult<()> {
        let keep: BTreeSet<VolumeId> = snapshot.volumes.iter().map(|v| v.id).collect();
        let extra: Vec<VolumeId> = self.volumes.keys().filter(|id| !keep.contains(id)).copied().collect();
        for id in extra {
            self.delete_volume(id)?;
        }

        for volume in &snapshot.volumes {
            if self.volumes.contains_key(&volume.id) {
                continue;
            }
            let available = volume.members.iter().all(|id| {
                self.drives
                    .get(id)
                    .map_or(false, |d| d.present && d.record.state == DriveState::UnconfiguredGood)
            });
            if !available {
                tracing::warn!(ctrl = self.ctrl, volume = %volume.id, "pretest volume cannot be recreated, members unavailable");
                continue;
            }
            for id in &volume.members {
                self.set_drive_state(*id, DriveState::Online);
            }
            let mut restored = volume.clone();
            restored.state = VolumeState::Optimal;
            self.volumes.insert(
                volume.id,
                SimVolume {
                    volume: restored,
                    init_started: None,
                },
            );
            self.emit(EventKind::LdCreated, None, Some(volume.id), "restored");
        }

        let spares: BTreeSet<DriveId> = snapshot.hot_spares.iter().copied().collect();
        let current: Vec<(DriveId, DriveState, bool)> = self
            .drives
            .values()
            .map(|d| (d.record.id, d.record.state, d.present))
            .collect();
        for (id, state, present) in current {
            if !present {
                continue;
            }
            match (state, spares.contains(&id)) {
                (DriveState::HotSpare, false) => self.set_drive_state(id, DriveState::UnconfiguredGood),
                (DriveState::UnconfiguredGood, true) => self.set_drive_state(id, DriveState::HotSpare),
                _ => {}
            }
        }

        // Flashed firmware stays
        let firmware = std::mem::take(&mut self.info.firmware_version);
        self.info = snapshot.settings.clone();
        self.info.firmware_version = firmware;
        tracing::info!(ctrl = self.ctrl, volumes = self.volumes.len(), "pretest configuration restored");
        Ok(())
    }

    pub fn controller_properties(&self) -> VerifyResult<CliProperties> {
        let mut props = CliProperties::new()
            .with("model", self.info.product_name.clone())
            .with("firmware_version", self.info.firmware_version.clone())
            .with("bios_version", self.info.bios_version.clone())
            .with("driver_name", self.driver.name.clone())
            .with("driver_version", format!(" {} ", self.driver.version))
            .with("vendor_id", hex_id(&self.info.pci_vendor_id)?)
            .with("subvendor_id", hex_id(&self.info.pci_subvendor_id)?)
            .with("subdevice_id", hex_id(&self.info.pci_subdevice_id)?)
            .with("sas_address", self.sas_address.clone())
            .with("max_data_transfer_size", "1 MB")
            .with("alarm", if self.info.alarm_enabled { "On" } else { "Off" })
            .with("memory_size", format!("{}MB", self.info.memory_size_mb));
        for (_, key, value) in self.info.rates.cli_pairs() {
            props.insert(key, value.to_string());
        }
        Ok(props)
    }

    pub fn drive_properties(&self, location: EnclosureSlot) -> VerifyResult<CliProperties> {
        let drive = &self.drive_at(location)?.record;
        let address = format!("0x{}", drive.sas_address().to_lowercase());
        let (port0, port1) = match drive.interface {
            Interface::SAS => (address, "0x0".to_string()),
            Interface::SATA => ("0x0".to_string(), address),
        };
        Ok(CliProperties::new()
            .with("drive_id", drive.id.0.to_string())
            .with("state", drive.state.cli_code())
            .with("size", (drive.size_bytes / MIB).to_string())
            .with("media_type", drive.media.cli_code())
            .with("interface", drive.interface.cli_code())
            .with("media_error_count", drive.media_error_count.to_string())
            .with("firmware_revision", drive.firmware_revision.clone())
            .with("sector_size", format!("{}B", drive.sector_size))
            .with("sas_address_0", port0)
            .with("sas_address_1", port1))
    }

    pub fn volume_properties(&self, id: VolumeId) -> VerifyResult<CliProperties> {
        let volume = &self.volume(id)?.volume;
        Ok(CliProperties::new()
            .with("name", format!("vd{}", id.0))
            .with("state", volume.state.cli_code())
            .with("raid", volume.raid.cli_code())
            .with("cache", volume.cache.cli_code())
            .with("size", (volume.size_bytes / MIB).to_string())
            .with("members", volume.members.len().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::units::GIB;

    fn state() -> (SimState, broadcast::Receiver<ControllerEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let state = SimState::new(0, ControllerSpec::standard(0), SimProfile::default(), tx);
        (state, rx)
    }

    fn kinds(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn test_usable_capacity() {
        assert_eq!(usable_bytes(RaidLevel::Raid1, 2, 100), 100);
        assert_eq!(usable_bytes(RaidLevel::Raid5, 3, 100), 200);
        assert_eq!(usable_bytes(RaidLevel::Raid1E, 3, 100), 150);
        assert!(check_group(RaidLevel::Raid1, 3).is_err());
        assert!(check_group(RaidLevel::Raid10, 5).is_err());
        assert!(check_group(RaidLevel::Raid1E, 4).is_ok());
    }

    #[test]
    fn test_fast_init_volume_goes_optimal_after_fgi() {
        let (mut state, mut rx) = state();
        let start = Instant::now();
        let ids = state
            .create_volumes(&VolumeSpec::new(RaidLevel::Raid1, 20 * GIB).fast_init(), start)
            .unwrap();

        assert_eq!(ids, vec![VolumeId(0)]);
        assert_eq!(state.volume(ids[0]).unwrap().volume.state, VolumeState::Initializing);
        assert_eq!(
            kinds(&mut rx),
            vec![EventKind::PdStateChange, EventKind::PdStateChange, EventKind::LdCreated]
        );

        state.advance(start + Duration::from_secs(5));
        assert!(state.init_progress(ids[0], start + Duration::from_secs(5)).unwrap().is_running());

        state.advance(start + state.profile.fgi);
        assert_eq!(state.volume(ids[0]).unwrap().volume.state, VolumeState::Optimal);
        assert_eq!(kinds(&mut rx), vec![EventKind::LdInitSuccessful, EventKind::LdOptimal]);
    }

    #[test]
    fn test_oversized_volume_rejected() {
        let (mut state, _rx) = state();
        let err = state
            .create_volumes(&VolumeSpec::new(RaidLevel::Raid1, 5000 * GIB), Instant::now())
            .unwrap_err();
        assert!(matches!(err, VerifyError::Collaborator(_)));
        assert!(state.volumes.is_empty());
    }

    #[test]
    fn test_pull_and_reinsert_member_rebuilds() {
        let (mut state, mut rx) = state();
        let start = Instant::now();
        let ids = state
            .create_volumes(
                &VolumeSpec::new(RaidLevel::Raid1, 20 * GIB).on_drives(vec![DriveId(0), DriveId(1)]),
                start,
            )
            .unwrap();
        kinds(&mut rx);

        state.pull(DriveId(1)).unwrap();
        assert_eq!(state.volume(ids[0]).unwrap().volume.state, VolumeState::Degraded);
        assert_eq!(
            kinds(&mut rx),
            vec![EventKind::PdRemoved, EventKind::PdStateChange, EventKind::LdDegraded]
        );
        assert!(state.present_drive(DriveId(1)).is_err());

        state.insert(DriveId(1), start).unwrap();
        assert_eq!(state.volume(ids[0]).unwrap().volume.state, VolumeState::Rebuilding);
        assert_eq!(
            kinds(&mut rx),
            vec![
                EventKind::PdInserted,
                EventKind::PdStateChange,
                EventKind::PdRebuildStartAuto
            ]
        );

        let halfway = start + state.profile.rebuild / 2;
        assert_eq!(
            state.rebuild_progress(DriveId(1), halfway).unwrap(),
            OperationProgress::Percent(50)
        );

        state.advance(start + state.profile.rebuild);
        assert_eq!(state.rebuild_progress(DriveId(1), halfway).unwrap(), OperationProgress::Idle);
        assert_eq!(state.volume(ids[0]).unwrap().volume.state, VolumeState::Optimal);
        assert_eq!(
            kinds(&mut rx),
            vec![EventKind::PdRebuildDone, EventKind::PdStateChange, EventKind::LdOptimal]
        );
    }

    #[test]
    fn test_reinsert_with_auto_rebuild_disabled_leaves_drive_offline() {
        let (mut state, _rx) = state();
        state.apply_setting(ControllerSetting::DisableAutoRebuild(true));
        state
            .create_volumes(&VolumeSpec::new(RaidLevel::Raid1, GIB), Instant::now())
            .unwrap();

        state.pull(DriveId(0)).unwrap();
        state.insert(DriveId(0), Instant::now()).unwrap();

        assert_eq!(state.drives[&DriveId(0)].record.state, DriveState::Offline);
        assert_eq!(state.volumes[&VolumeId(0)].volume.state, VolumeState::Degraded);
    }

    #[test]
    fn test_hot_spare_restored_on_insertion() {
        let (mut state, mut rx) = state();
        let now = Instant::now();
        state.apply_setting(ControllerSetting::RestoreHotSpareOnInsertion(true));
        state.drive_command(DriveId(5), DriveCommand::MakeGlobalHotSpare, now).unwrap();
        kinds(&mut rx);

        state.pull(DriveId(5)).unwrap();
        state.insert(DriveId(5), now).unwrap();

        assert_eq!(state.drives[&DriveId(5)].record.state, DriveState::HotSpare);
        assert!(kinds(&mut rx).contains(&EventKind::GlobalSpareCreated));
    }

    #[test]
    fn test_clear_config_drops_volumes_and_spares() {
        let (mut state, mut rx) = state();
        let now = Instant::now();
        state.create_volumes(&VolumeSpec::new(RaidLevel::Raid0, GIB).count(2), now).unwrap();
        state.drive_command(DriveId(9), DriveCommand::MakeGlobalHotSpare, now).unwrap();
        kinds(&mut rx);

        state.clear_config().unwrap();

        assert!(state.volumes.is_empty());
        assert!(state
            .drives
            .values()
            .all(|d| d.record.state == DriveState::UnconfiguredGood));
        assert_eq!(kinds(&mut rx).last(), Some(&EventKind::ConfigCleared));
    }

    #[test]
    fn test_restore_pretest_removes_new_configuration() {
        let (mut state, _rx) = state();
        let now = Instant::now();
        let snapshot = state.capture_pretest();

        state.create_volumes(&VolumeSpec::new(RaidLevel::Raid5, GIB), now).unwrap();
        state.apply_setting(ControllerSetting::DisableAutoRebuild(true));
        state.restore_pretest(&snapshot).unwrap();

        assert!(state.volumes.is_empty());
        assert!(!state.info.disable_auto_rebuild);
    }

    #[test]
    fn test_restart_blocks_until_elapsed() {
        let (mut state, _rx) = state();
        let now = Instant::now();
        state.restart(now);
        assert!(state.ensure_available().is_err());
        state.advance(now + state.profile.restart);
        assert!(state.ensure_available().is_ok());
    }

    #[test]
    fn test_cli_properties_render_hex_and_addresses() {
        let (state, _rx) = state();
        let props = state.controller_properties().unwrap();
        assert_eq!(props.get("vendor_id").unwrap(), "0x1000");
        assert_eq!(props.get("check_consistency_rate_current").unwrap(), "30");

        let drive = state.drive_properties(EnclosureSlot::new(8, 0)).unwrap();
        assert_eq!(drive.get("state").unwrap(), "UGood");
        assert_eq!(drive.get("size").unwrap(), "1024000");
        assert!(drive.get("sas_address_0").unwrap().starts_with("0x5000c5009"));
        assert!(state.drive_properties(EnclosureSlot::new(8, 40)).is_err());
    }
}
