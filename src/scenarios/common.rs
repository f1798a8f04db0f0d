// Steps shared by several scenarios

use crate::harness::{cross_check, Harness, Normalization, Reading};
use crate::model::{ControllerSnapshot, DriveFilter, DriveRecord, EventKind, EventScope, VolumeId};
use crate::session::Session;
use crate::{PendingExpectation, VerifyError, VerifyResult};

/// Log every controller property the CLI reports
pub fn log_cli_properties(snapshot: &ControllerSnapshot) {
    for (key, value) in snapshot.cli.iter() {
        tracing::info!(key = %key, value = %value, "controller property");
    }
}

/// Cross-check BIOS version, PCI ids and product name between SDK and CLI
pub fn verify_identity(harness: &Harness) -> VerifyResult<ControllerSnapshot> {
    let snapshot = harness.snapshot_controller()?;
    let sdk = &snapshot.sdk;
    let cli = &snapshot.cli;

    cross_check(
        "bios version",
        Reading::sdk(&sdk.bios_version).normalized(Normalization::CaseInsensitive),
        Reading::cli(cli.get("bios_version")?).normalized(Normalization::CaseInsensitive),
    )?;

    let ids = [
        ("vendor id", &sdk.pci_vendor_id, "vendor_id"),
        ("subvendor id", &sdk.pci_subvendor_id, "subvendor_id"),
        ("subdevice id", &sdk.pci_subdevice_id, "subdevice_id"),
    ];
    for (field, decimal, key) in ids {
        cross_check(
            field,
            Reading::sdk(decimal).normalized(Normalization::Trimmed),
            Reading::cli(cli.get(key)?).normalized(Normalization::HexToDecimal),
        )?;
    }

    cross_check(
        "model",
        Reading::sdk(&sdk.product_name).normalized(Normalization::CaseInsensitive),
        Reading::cli(cli.get("model")?).normalized(Normalization::CaseInsensitive),
    )?;

    Ok(snapshot)
}

/// Cross-check driver version and name
pub fn verify_driver(snapshot: &ControllerSnapshot) -> VerifyResult<()> {
    cross_check(
        "driver version",
        Reading::sdk(&snapshot.driver.version).normalized(Normalization::Trimmed),
        Reading::cli(snapshot.cli.get("driver_version")?).normalized(Normalization::Trimmed),
    )?;
    cross_check(
        "driver name",
        Reading::sdk(&snapshot.driver.name).normalized(Normalization::CaseInsensitive),
        Reading::cli(snapshot.cli.get("driver_name")?).normalized(Normalization::CaseInsensitive),
    )?;
    Ok(())
}

/// Cross-check every background task rate
pub fn verify_rates(snapshot: &ControllerSnapshot) -> VerifyResult<()> {
    for (name, key, value) in snapshot.sdk.rates.cli_pairs() {
        cross_check(
            name,
            Reading::sdk(value.to_string()),
            Reading::cli(snapshot.cli.get(key)?).normalized(Normalization::Trimmed),
        )?;
    }
    Ok(())
}

/// Switch `modules` one after another, `power_step` apart
pub async fn switch_modules(session: &Session, modules: &[u16], up: bool) -> VerifyResult<()> {
    let harness = session.harness();
    let power = session.power()?;
    let action = if up { "power up" } else { "power down" };

    for (i, module) in modules.iter().enumerate() {
        if i > 0 {
            harness.pause(harness.timing().power_step()).await?;
        }
        tracing::info!(module, action, "switching drive carrier");
        power
            .set_power(*module, up)
            .map_err(|err| VerifyError::StimulusFailed {
                operation: format!("{} module {}", action, module),
                reason: err.to_string(),
            })?;
    }
    Ok(())
}

/// Switch one module and give the controller time to notice
pub async fn switch_module(session: &Session, module: u16, up: bool) -> VerifyResult<()> {
    switch_modules(session, &[module], up).await?;
    session.harness().pause(session.harness().timing().power_settle()).await
}

/// Find the drive behind `module` by pulling it and seeing which drive leaves
///
/// The module is powered back up before returning. Exactly one drive
/// matching `filter` must disappear.
pub async fn locate_module_drive(
    session: &Session,
    module: u16,
    filter: &DriveFilter,
) -> VerifyResult<DriveRecord> {
    let harness = session.harness();
    let before = harness.sdk().drives(filter)?;

    switch_module(session, module, false).await?;
    let during = harness.sdk().drives(filter)?;
    switch_module(session, module, true).await?;

    let mut gone: Vec<DriveRecord> = before
        .into_iter()
        .filter(|d| !during.iter().any(|o| o.id == d.id))
        .collect();

    match gone.len() {
        1 => {
            let drive = gone.remove(0);
            tracing::info!(module, drive = %drive.id, location = %drive.location, "drive located behind module");
            Ok(drive)
        }
        n => Err(VerifyError::Precondition(format!(
            "power module {} should carry exactly one matching drive, {} disappeared",
            module, n
        ))),
    }
}

/// Expectations registered before creating a volume
pub struct CreationWatch {
    pub created: PendingExpectation,
    pub optimal: PendingExpectation,
    pub init: PendingExpectation,
    pub state: PendingExpectation,
}

impl CreationWatch {
    pub fn register(harness: &Harness) -> Self {
        Self {
            created: harness.register(EventKind::LdCreated, EventScope::Any),
            optimal: harness.register(EventKind::LdOptimal, EventScope::Any),
            init: harness.register(EventKind::LdInitSuccessful, EventScope::Any),
            state: harness.register(EventKind::PdStateChange, EventScope::Any),
        }
    }
}

/// Delete `volumes`, requiring a deletion event for each
pub async fn delete_volumes(harness: &Harness, volumes: &[VolumeId]) -> VerifyResult<()> {
    for volume in volumes {
        let mut deleted = harness.register(EventKind::LdDeleted, EventScope::Volume(*volume));
        harness.perform_stimulus(&format!("delete {}", volume), |sdk| sdk.delete_volume(*volume))?;
        harness.assert_resolved(&mut deleted).await?;
        tracing::info!(ctrl = harness.controller(), %volume, "volume deleted");
    }
    Ok(())
}
