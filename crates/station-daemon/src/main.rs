//! Station daemon entry point.
//!
//! Wires the GPIO driver, edge classifier, and clock measurement thread
//! into a complete daemon with signal handling and diagnostics.

mod calibration;
mod diagnostics;
mod publisher;
mod signals;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use station_common::config::{GpioDriverKind, SimConfig, StationConfig};
use station_common::error::StationError;
use station_common::metrics::EventMetrics;
use station_common::state::{StateMachine, StationState};
use station_gpio::{EdgeClassifier, GpioDriver, PinMap, SimulatedGpioDriver};
use station_timing::calibrate::ProgramEpoch;
use station_timing::cell::ClockModelCell;
use station_timing::realtime::init_realtime;

use crate::calibration::CalibrationThread;
use crate::diagnostics::DiagnosticsCollector;
use crate::publisher::{LogPublisher, MetricsSink};
use crate::signals::SignalHandler;

/// Supervision loop poll spacing.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ring capacity behind the windowed event-rate metrics.
const RATE_RING_CAPACITY: usize = 1024;

/// Station daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "station-daemon",
    about = "Detector station daemon - GPIO event timestamping and clock discipline",
    version,
    long_about = None
)]
struct Args {
    /// Path to a station configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Force the simulated GPIO backend (no hardware).
    #[arg(long, short = 's')]
    simulated: bool,

    /// Stop after this long (e.g. "30s", "10m"); default runs until signalled.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Print the resolved configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,

    /// Override the simulated trigger pulse spacing (e.g. "100ms").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    sim_pulse_interval: Option<Duration>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level, args.log_json);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Station daemon failed");
            // Absent hardware gets its own exit code so a supervisor can
            // tell "detector unreachable" from every other failure.
            match e.downcast_ref::<StationError>() {
                Some(StationError::HardwareUnavailable(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(args: &Args) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting station daemon");

    let mut config = load_config(args)?;

    // Command-line overrides
    if args.simulated {
        config.gpio.driver = GpioDriverKind::Simulated;
    }
    if let Some(interval) = args.sim_pulse_interval {
        config
            .gpio
            .sim
            .get_or_insert_with(SimConfig::default)
            .pulse_interval = interval;
    }

    config
        .validate()
        .context("Configuration failed validation")?;

    if args.print_config {
        let toml = config.to_toml().context("Failed to render configuration")?;
        println!("{toml}");
        return Ok(());
    }

    info!(
        station_id = %config.station_id,
        driver = ?config.gpio.driver,
        trigger = config.gpio.sampling_trigger.as_str(),
        "Configuration loaded"
    );

    let signal_handler =
        SignalHandler::install().context("Failed to install signal handlers")?;

    run_daemon(&config, &signal_handler, args.duration)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str, json: bool) {
    let filter = format!(
        "station_daemon={level},station_gpio={level},station_timing={level},station_common={level}"
    );
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `MUON_STATION_CONFIG` environment variable
/// 3. `/etc/muon-station/station.toml` (system path)
/// 4. `station.toml` (working directory)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<StationConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return StationConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var("MUON_STATION_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from MUON_STATION_CONFIG");
            return StationConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from MUON_STATION_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "MUON_STATION_CONFIG set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from("/etc/muon-station/station.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return StationConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    // 4. Working directory
    let local_path = PathBuf::from("station.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from working directory");
        return StationConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(StationConfig::default())
}

/// Create the configured GPIO backend.
fn create_gpio_driver(config: &StationConfig) -> Result<Box<dyn GpioDriver>> {
    match config.gpio.driver {
        GpioDriverKind::Simulated => {
            info!("Using simulated GPIO driver");
            Ok(Box::new(SimulatedGpioDriver::new(&config.gpio)))
        }
        GpioDriverKind::Pigpiod => create_pigpiod_driver(config),
    }
}

#[cfg(feature = "pigpiod")]
fn create_pigpiod_driver(config: &StationConfig) -> Result<Box<dyn GpioDriver>> {
    let settings = config.gpio.pigpiod.clone().unwrap_or_default();
    info!(address = %settings.address, "Using pigpiod GPIO driver");
    Ok(Box::new(station_gpio::pigpiod::PigpiodGpioDriver::new(
        &config.gpio,
    )))
}

#[cfg(not(feature = "pigpiod"))]
fn create_pigpiod_driver(_config: &StationConfig) -> Result<Box<dyn GpioDriver>> {
    // A station configured for hardware must never fall back to taking
    // fake data.
    anyhow::bail!(
        "configuration selects the pigpiod driver but this build does not include it \
         (rebuild with --features pigpiod)"
    )
}

/// Why the supervision loop ended.
enum Outcome {
    /// Signal or run-duration limit.
    Shutdown,
    /// The GPIO plane went non-operational.
    Fault(String),
}

/// Bring the station up, supervise it, and tear it down in order.
fn run_daemon(
    config: &StationConfig,
    signal_handler: &SignalHandler,
    duration: Option<Duration>,
) -> Result<()> {
    let mut machine = StateMachine::new();
    machine.transition(StationState::Starting)?;

    // Real-time setup is best-effort: missing privileges degrade to a
    // warning, not a dead station.
    match init_realtime(&config.realtime) {
        Ok(status) => info!(
            memory_locked = status.memory_locked,
            policy = ?status.scheduler_policy,
            priority = ?status.scheduler_priority,
            "Real-time environment initialized"
        ),
        Err(e) => warn!(error = %e, "Real-time setup failed, continuing without"),
    }

    let epoch = ProgramEpoch::now().context("Failed to read the system clock")?;
    let cell = Arc::new(ClockModelCell::new());
    let pin_map = PinMap::from_assignments(&config.gpio.pins);

    let mut driver = create_gpio_driver(config)?;
    driver
        .initialize(&pin_map)
        .context("GPIO initialization failed")?;
    info!(pins = pin_map.len(), "GPIO driver initialized");

    let metrics = Arc::new(Mutex::new(EventMetrics::new(
        config.diagnostics.rate_window,
        RATE_RING_CAPACITY,
    )));

    let mut classifier = EdgeClassifier::new(config, pin_map, Arc::clone(&cell), epoch);
    classifier.register_sink(Box::new(LogPublisher::new()));
    classifier.register_sink(Box::new(MetricsSink::new(Arc::clone(&metrics))));

    let liveness = classifier.liveness_token();
    let inhibit = classifier.inhibit_flag();
    let classifier_stats = classifier.stats();

    let tick_source = driver
        .tick_source()
        .context("Failed to obtain a tick source")?;
    let mut cal_thread =
        CalibrationThread::spawn(&config.clock, Arc::clone(&cell), epoch, tick_source)
            .context("Failed to spawn the calibration thread")?;

    driver
        .attach(Box::new(classifier))
        .context("Failed to attach the edge handler")?;

    machine.transition(StationState::Running)?;
    info!(state = %machine.state(), "Station running");

    let diagnostics = DiagnosticsCollector::new(
        Arc::clone(&metrics),
        classifier_stats,
        Arc::clone(&cell),
        cal_thread.cycles(),
        cal_thread.failures(),
    );

    let outcome = supervise(
        config,
        &mut machine,
        signal_handler,
        driver.as_ref(),
        &diagnostics,
        inhibit.as_ref(),
        duration,
    );

    match outcome {
        Outcome::Shutdown => {
            info!("Shutting down...");
            machine.transition(StationState::Stopping)?;

            // Teardown order: silence the classifier first, then edge
            // delivery, then the measurement thread.
            liveness.store(false, Ordering::Release);
            if let Err(e) = driver.stop() {
                warn!(error = %e, "GPIO driver stop failed");
            }
            cal_thread.stop();

            machine.transition(StationState::Stopped)?;

            let report = diagnostics.report(machine.state());
            let total_events: u64 = report.events.kinds.iter().map(|k| k.total).sum();
            info!(
                final_state = %machine.state(),
                transitions = machine.transition_count(),
                edges = report.classifier.edges_seen,
                events = total_events,
                cal_cycles = report.calibration_cycles,
                signals = signal_handler.state().signal_count(),
                uptime_secs = report.uptime_secs,
                "Station shutdown complete"
            );
            Ok(())
        }
        Outcome::Fault(reason) => {
            error!(reason = %reason, "Station fault");
            machine.enter_fault();

            liveness.store(false, Ordering::Release);
            if let Err(e) = driver.stop() {
                warn!(error = %e, "GPIO driver stop failed");
            }
            cal_thread.stop();

            diagnostics.dump(machine.state());
            anyhow::bail!("station faulted: {reason}")
        }
    }
}

/// Poll signals, the run-duration limit, and driver health until one of
/// them ends the run.
fn supervise(
    config: &StationConfig,
    machine: &mut StateMachine,
    signal_handler: &SignalHandler,
    driver: &dyn GpioDriver,
    diagnostics: &DiagnosticsCollector,
    inhibit: &AtomicBool,
    duration: Option<Duration>,
) -> Outcome {
    let started = Instant::now();
    let mut last_summary = Instant::now();

    loop {
        let signals = signal_handler.poll();

        if signals.shutdown {
            info!("Shutdown signal received, leaving supervision loop");
            return Outcome::Shutdown;
        }

        if signals.toggle_inhibit {
            toggle_inhibit(machine, inhibit);
        }

        if signals.dump_diagnostics {
            diagnostics.dump(machine.state());
        }

        if let Some(limit) = duration {
            if started.elapsed() >= limit {
                info!(after = %humantime::format_duration(limit), "Run duration reached");
                return Outcome::Shutdown;
            }
        }

        if !driver.is_operational() {
            return Outcome::Fault("GPIO driver went non-operational".into());
        }

        if config.diagnostics.enabled && last_summary.elapsed() >= config.diagnostics.log_interval
        {
            diagnostics.log_summary(machine.state());
            last_summary = Instant::now();
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGUSR1 toggles the inhibit veto: Running <-> Inhibited.
fn toggle_inhibit(machine: &mut StateMachine, inhibit: &AtomicBool) {
    let target = match machine.state() {
        StationState::Running => StationState::Inhibited,
        StationState::Inhibited => StationState::Running,
        other => {
            warn!(state = %other, "Inhibit toggle ignored in this state");
            return;
        }
    };
    match machine.transition(target) {
        Ok(()) => {
            let inhibited = target == StationState::Inhibited;
            inhibit.store(inhibited, Ordering::Release);
            info!(inhibited, "Inhibit veto toggled");
        }
        Err(e) => warn!(error = %e, "Inhibit toggle rejected"),
    }
}
