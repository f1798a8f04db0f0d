/// Harness configuration
///
/// Loaded from an optional TOML file layered under `RAID_VERIFY_*`
/// environment variables, e.g. `RAID_VERIFY_TIMING__SETTLE_SECS=5`.
/// Every field has a default, so an empty or absent file is valid.
use crate::VerifyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "RAID_VERIFY";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
    /// Where JSON run reports are written when no explicit path is given
    pub report_dir: Option<PathBuf>,
}

/// Wait windows and polling budgets, in seconds
///
/// Defaults are the windows hardware needs; [`TimingConfig::compressed`]
/// shrinks them for simulated controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between registering expectations and issuing the stimulus
    pub arm_delay_secs: u64,
    /// Pause after a stimulus before expectations are first checked
    pub settle_secs: u64,
    pub event_poll_interval_secs: u64,
    /// Reads of an expectation before it times out (24 x 5s = 2 min)
    pub event_poll_attempts: u32,
    /// Budget for slow events such as configuration clear (120 x 5s = 10 min)
    pub long_event_poll_attempts: u32,
    pub init_poll_interval_secs: u64,
    pub rebuild_poll_interval_secs: u64,
    /// Ceiling on a single rebuild
    pub rebuild_timeout_secs: u64,
    pub flash_settle_secs: u64,
    pub controller_restart_settle_secs: u64,
    /// Gap between consecutive power-module switches
    pub power_step_secs: u64,
    /// Pause after a batch of power switches
    pub power_settle_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            arm_delay_secs: 10,
            settle_secs: 15,
            event_poll_interval_secs: 5,
            event_poll_attempts: 24,
            long_event_poll_attempts: 120,
            init_poll_interval_secs: 5,
            rebuild_poll_interval_secs: 10,
            rebuild_timeout_secs: 4 * 60 * 60,
            flash_settle_secs: 240,
            controller_restart_settle_secs: 250,
            power_step_secs: 1,
            power_settle_secs: 30,
        }
    }
}

impl TimingConfig {
    /// Windows sized for the simulated controller
    pub fn compressed() -> Self {
        Self {
            arm_delay_secs: 1,
            settle_secs: 1,
            event_poll_interval_secs: 1,
            event_poll_attempts: 24,
            long_event_poll_attempts: 120,
            init_poll_interval_secs: 1,
            rebuild_poll_interval_secs: 1,
            rebuild_timeout_secs: 600,
            flash_settle_secs: 5,
            controller_restart_settle_secs: 5,
            power_step_secs: 0,
            power_settle_secs: 2,
        }
    }

    pub fn arm_delay(&self) -> Duration {
        Duration::from_secs(self.arm_delay_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_secs(self.event_poll_interval_secs)
    }

    /// Standard window for an expectation to resolve
    pub fn event_window(&self) -> Duration {
        self.event_poll_interval() * self.event_poll_attempts
    }

    pub fn long_event_window(&self) -> Duration {
        self.event_poll_interval() * self.long_event_poll_attempts
    }

    pub fn init_poll_interval(&self) -> Duration {
        Duration::from_secs(self.init_poll_interval_secs)
    }

    pub fn rebuild_poll_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_poll_interval_secs)
    }

    pub fn rebuild_timeout(&self) -> Duration {
        Duration::from_secs(self.rebuild_timeout_secs)
    }

    pub fn flash_settle(&self) -> Duration {
        Duration::from_secs(self.flash_settle_secs)
    }

    pub fn controller_restart_settle(&self) -> Duration {
        Duration::from_secs(self.controller_restart_settle_secs)
    }

    pub fn power_step(&self) -> Duration {
        Duration::from_secs(self.power_step_secs)
    }

    pub fn power_settle(&self) -> Duration {
        Duration::from_secs(self.power_settle_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl From<::config::ConfigError> for VerifyError {
    fn from(err: ::config::ConfigError) -> Self {
        VerifyError::Config(err.to_string())
    }
}

/// Per-user configuration file location, if a home directory is known
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "raid-verify", "raid-verify")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl HarnessConfig {
    /// Load configuration from `path` (or the default location) and the
    /// environment
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self, VerifyError> {
        let mut builder = ::config::Config::builder();

        let file = path.map(Path::to_path_buf).or_else(default_config_path);
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "reading configuration file");
            builder = builder.add_source(::config::File::from(file).required(path.is_some()));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "report_dir = \"/tmp/reports\"\n\n[timing]\nsettle_secs = 3\nevent_poll_attempts = 6\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = HarnessConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.timing.settle(), Duration::from_secs(3));
        assert_eq!(config.timing.event_window(), Duration::from_secs(30));
        assert_eq!(config.timing.flash_settle(), Duration::from_secs(240));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.report_dir, Some(PathBuf::from("/tmp/reports")));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[timing]\nsettle_secs = 3").unwrap();

        std::env::set_var("RAID_VERIFY_TIMING__SETTLE_SECS", "7");
        let config = HarnessConfig::load(Some(file.path()));
        std::env::remove_var("RAID_VERIFY_TIMING__SETTLE_SECS");

        assert_eq!(config.unwrap().timing.settle_secs, 7);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        let err = HarnessConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, VerifyError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[timing]\nsettle_secs = \"soon\"").unwrap();

        assert!(HarnessConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_default_windows() {
        let timing = TimingConfig::default();
        assert_eq!(timing.event_window(), Duration::from_secs(120));
        assert_eq!(timing.long_event_window(), Duration::from_secs(600));
        assert!(TimingConfig::compressed().event_window() < timing.event_window());
    }
}
