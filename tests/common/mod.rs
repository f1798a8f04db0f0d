//! Common test utilities for integration tests
//!
//! - Simulated rigs and sessions with compressed timing
//! - A mockall power switch for rigs that should not touch drives
//! - Report assertion helpers
#![allow(dead_code)]

pub mod assertions;
pub mod builders;

use mockall::mock;
use raid_verify::sdk::{PowerModule, PowerSwitch};
use raid_verify::VerifyResult;

mock! {
    pub Power {}

    impl PowerSwitch for Power {
        fn modules(&self) -> VerifyResult<Vec<PowerModule>>;
        fn set_power(&self, module: u16, up: bool) -> VerifyResult<()>;
        fn close(&self) -> VerifyResult<()>;
    }
}
