use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use raid_verify::config::LoggingConfig;
use raid_verify::scenarios;
use raid_verify::sdk::PowerSwitch;
use raid_verify::session::SessionParams;
use raid_verify::sim::SimRig;
use raid_verify::ui;
use raid_verify::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "raid-verify")]
#[command(about = "Event-driven verification scenarios for RAID controllers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: per-user config directory)
    #[arg(long, global = true, env = "RAID_VERIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "raid_verify::harness=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Report rebuild progress through the log instead of progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available scenarios and their steps
    List,

    /// Run a scenario against simulated controllers
    Simulate {
        /// Scenario name (see `list`)
        scenario: String,

        /// Controller the scenario is driven against
        #[arg(long, default_value_t = 0)]
        ctrl: u32,

        /// Number of simulated controllers
        #[arg(long, default_value_t = 1)]
        controllers: u32,

        /// Controllers to leave out of multi-controller scenarios
        #[arg(long = "block-ctrl", value_delimiter = ',')]
        block_ctrl: Vec<u32>,

        /// Firmware image to flash
        #[arg(long, default_value = "4.680.01-8250.rom")]
        firmware: PathBuf,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Use the configured hardware timing instead of compressed windows
        #[arg(long)]
        real_timing: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = HarnessConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let log_guard = init_logging(&config.logging, cli.log_level.as_deref(), cli.json_logs)?;

    setup_signal_handlers()?;

    let passed = match cli.command {
        Commands::List => {
            ui::print_catalog(&scenarios::all());
            true
        }
        Commands::ShowConfig => {
            let text = serde_json::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{}", text);
            true
        }
        Commands::Simulate {
            scenario,
            ctrl,
            controllers,
            block_ctrl,
            firmware,
            report,
            real_timing,
        } => {
            let options = SimulateOptions {
                scenario,
                ctrl,
                controllers,
                block_ctrl,
                firmware,
                report,
                real_timing,
                progress_bars: !cli.no_progress,
            };
            simulate(options, &config).await?
        }
    };

    Ok(finish(passed, log_guard))
}

/// Flush the file log, then hand the run status to the process
fn finish(passed: bool, log_guard: Option<WorkerGuard>) -> ExitCode {
    drop(log_guard);
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

struct SimulateOptions {
    scenario: String,
    ctrl: u32,
    controllers: u32,
    block_ctrl: Vec<u32>,
    firmware: PathBuf,
    report: Option<PathBuf>,
    real_timing: bool,
    progress_bars: bool,
}

async fn simulate(options: SimulateOptions, config: &HarnessConfig) -> Result<bool> {
    let scenario = scenarios::by_name(&options.scenario).with_context(|| {
        format!(
            "unknown scenario '{}', run `raid-verify list` for the catalog",
            options.scenario
        )
    })?;
    if options.block_ctrl.contains(&options.ctrl) {
        bail!("controller {} is both selected and blocked", options.ctrl);
    }

    let timing = if options.real_timing {
        config.timing.clone()
    } else {
        TimingConfig::compressed()
    };
    let progress = ui::progress_sink(options.progress_bars);

    let rig = SimRig::builder().controllers(options.controllers.max(1)).build();
    let harness = rig
        .harness(options.ctrl, timing.clone())
        .with_context(|| {
            format!(
                "controller {} not present ({} simulated)",
                options.ctrl, options.controllers
            )
        })?
        .with_progress(Arc::clone(&progress));
    let peers: Vec<Harness> = rig
        .controllers
        .iter()
        .map(|c| c.id())
        .filter(|id| *id != options.ctrl && !options.block_ctrl.contains(id))
        .filter_map(|id| rig.harness(id, timing.clone()))
        .map(|h| h.with_progress(Arc::clone(&progress)))
        .collect();

    let mut session = Session::new(harness)
        .with_peers(peers)
        .with_params(SessionParams {
            firmware_image: Some(options.firmware),
        });
    // The simulated switch carries drives of controller 0 only
    if let (Some(power), 0) = (&rig.power, options.ctrl) {
        session = session.with_power(Arc::clone(power) as Arc<dyn PowerSwitch>);
    }

    println!(
        "{} {} on simulated controller {} (run {})",
        "Running".bold(),
        scenario.name().cyan(),
        options.ctrl,
        session.run_id
    );

    let report = ScenarioRunner::new().run(scenario.as_ref(), &mut session).await;
    ui::print_report(&report);

    let report_path = options.report.or_else(|| {
        config
            .report_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{}.json", report.scenario, report.run_id)))
    });
    if let Some(path) = report_path {
        report
            .write_json(&path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    Ok(report.passed())
}

fn init_logging(
    config: &LoggingConfig,
    level: Option<&str>,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .context("invalid log level in configuration")?,
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file {} has no file name", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json || config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("failed to install log subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .context("failed to install log subscriber")?;
    }

    Ok(guard)
}

// Signal handler for graceful shutdown
fn setup_signal_handlers() -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGINT {
                eprintln!("\n{} stopping at the next wait, teardown will run", "Interrupt received:".yellow().bold());
                raid_verify::set_interrupted();
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_run_flushes_file_log_before_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raid-verify.log");
        let config = LoggingConfig {
            file: Some(path.clone()),
            ..LoggingConfig::default()
        };

        let guard = init_logging(&config, Some("info"), false).unwrap();
        assert!(guard.is_some(), "file logging keeps a flush guard");
        tracing::error!("scenario event-verification failed at step 3");

        assert_eq!(finish(false, guard), ExitCode::FAILURE);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("scenario event-verification failed at step 3"));
    }

    #[test]
    fn test_passed_run_exits_cleanly() {
        assert_eq!(finish(true, None), ExitCode::SUCCESS);
    }
}
