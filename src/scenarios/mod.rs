// Scenario catalog
//
// Each scenario is a numbered sequence of steps run by `ScenarioRunner`.
// Steps share state only through the `Session`.

pub mod boot_drive;
pub mod common;
pub mod controller_info;
pub mod event_verification;
pub mod pd_progress;

pub use boot_drive::BootDrive;
pub use controller_info::ControllerInfo;
pub use event_verification::EventVerification;
pub use pd_progress::PdOperationProgress;

use crate::runner::Scenario;
use crate::{VerifyError, VerifyResult};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Every scenario, in catalog order
pub fn all() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(ControllerInfo),
        Box::new(PdOperationProgress),
        Box::new(BootDrive),
        Box::new(EventVerification),
    ]
}

pub fn by_name(name: &str) -> Option<Box<dyn Scenario>> {
    all().into_iter().find(|s| s.name() == name)
}

fn no_such_step<'a>(scenario: &'static str, index: usize) -> BoxFuture<'a, VerifyResult<()>> {
    async move {
        Err(VerifyError::Precondition(format!(
            "scenario {} has no step {}",
            scenario, index
        )))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let names: Vec<&str> = all().iter().map(|s| s.name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(by_name("event-verification").unwrap().steps().len(), 10);
        assert!(by_name("wipe").is_none());
    }

    #[test]
    fn test_only_event_verification_needs_power() {
        let powered: Vec<&str> = all()
            .iter()
            .filter(|s| s.needs_power())
            .map(|s| s.name())
            .collect();
        assert_eq!(powered, vec!["event-verification"]);
    }
}
