//! Soak (long-duration stability) tests.
//!
//! Run the full simulated pipeline for an extended period: pulse
//! stream through the classifier, calibration loop disciplining the
//! drifting virtual counter, metrics accumulating in the shared ring.
//! Verify that every edge stays accounted for, the fitted model
//! converges on the configured drift, and memory stays flat.
//!
//! # Acceptance Criteria
//!
//! - Every delivered edge is classified: counters reconcile exactly
//! - No pileup drops, gating, or sanity rejections in a clean stream
//! - Fitted slope matches the configured counter drift
//! - Memory growth bounded (memory-stability variant)
//!
//! The smoke variant runs in two seconds and is always on; the longer
//! variants are `#[ignore]`d for deployment qualification runs.

#![allow(dead_code)] // Qualification configs beyond the default test pass

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use station_common::events::EventKind;
use station_common::metrics::EventMetrics;
use station_gpio::{EdgeClassifier, GpioDriver, PinMap, SimulatedGpioDriver};
use station_timing::calibrate::{ClockCalibrator, ProgramEpoch};
use station_timing::cell::ClockModelCell;

use super::common::{get_memory_usage, pulsing_station_config, CountingSink};

/// Configuration for one soak run.
#[derive(Debug, Clone)]
pub struct SoakConfig {
    /// Total run time.
    pub duration: Duration,
    /// Simulated trigger pulse spacing.
    pub pulse_interval: Duration,
    /// Clock measurement spacing.
    pub measurement_interval: Duration,
    /// Progress reporting spacing.
    pub log_interval: Duration,
    /// Simulated counter drift in ppm (positive runs fast).
    pub drift_ppm: f64,
    /// Allowed deviation of the fitted slope from the configured drift.
    pub slope_tolerance: f64,
    /// Maximum allowed RSS growth in bytes, if bounded.
    pub max_memory_growth: Option<u64>,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            pulse_interval: Duration::from_millis(5),
            measurement_interval: Duration::from_millis(50),
            log_interval: Duration::from_secs(5),
            drift_ppm: 200.0,
            slope_tolerance: 1e-4,
            max_memory_growth: None,
        }
    }
}

impl SoakConfig {
    /// Two-second smoke run for the default test pass. The slope bound
    /// is loose: over two seconds a single preempted measurement can
    /// still tilt the fit.
    pub fn smoke() -> Self {
        Self {
            duration: Duration::from_secs(2),
            log_interval: Duration::from_secs(1),
            slope_tolerance: 1e-3,
            ..Default::default()
        }
    }

    /// One-minute run.
    pub fn short() -> Self {
        Self {
            duration: Duration::from_secs(60),
            log_interval: Duration::from_secs(10),
            slope_tolerance: 5e-5,
            ..Default::default()
        }
    }

    /// One-hour qualification run.
    pub fn long() -> Self {
        Self {
            duration: Duration::from_secs(3600),
            pulse_interval: Duration::from_millis(10),
            log_interval: Duration::from_secs(60),
            slope_tolerance: 2e-5,
            ..Default::default()
        }
    }

    /// Memory-bounded variant of the short run.
    pub fn memory_stability() -> Self {
        Self {
            duration: Duration::from_secs(120),
            log_interval: Duration::from_secs(20),
            slope_tolerance: 5e-5,
            max_memory_growth: Some(16 * 1024 * 1024),
            ..Default::default()
        }
    }
}

/// Collected results of a soak run.
#[derive(Debug)]
pub struct SoakOutcome {
    /// Actual run time.
    pub duration: Duration,
    /// Edges delivered to the classifier.
    pub edges_seen: u64,
    /// Sampling triggers emitted.
    pub triggers_emitted: u64,
    /// Inter-event intervals emitted.
    pub intervals_emitted: u64,
    /// Time pulses emitted and rejected.
    pub timepulses_emitted: u64,
    pub timepulses_rejected: u64,
    /// Calibration measurements taken.
    pub calibration_cycles: u64,
    /// Final fitted slope.
    pub final_slope: f64,
    /// RSS growth over the run in bytes.
    pub memory_growth: u64,
    /// Whether all acceptance criteria held.
    pub passed: bool,
}

/// Run the full simulated pipeline for `config.duration` and evaluate
/// the acceptance criteria.
pub fn run_soak(config: &SoakConfig) -> SoakOutcome {
    let mut station = pulsing_station_config(config.pulse_interval, config.drift_ppm);
    // Keep the dead-time gate under the pulse spacing so nothing gates.
    station.sampling.deadtime = config.pulse_interval / 2;

    let pins = PinMap::from_assignments(&station.gpio.pins);
    let cell = Arc::new(ClockModelCell::new());

    let mut driver = SimulatedGpioDriver::new(&station.gpio);
    driver.initialize(&pins).unwrap();

    let epoch = ProgramEpoch::now().unwrap();
    let mut classifier = EdgeClassifier::new(&station, pins, Arc::clone(&cell), epoch);
    let metrics = Arc::new(Mutex::new(EventMetrics::new(
        station.diagnostics.rate_window,
        8192,
    )));
    classifier.register_sink(Box::new(CountingSink::new(Arc::clone(&metrics))));
    let stats = classifier.stats();

    driver.attach(Box::new(classifier)).unwrap();

    let mut cal = ClockCalibrator::new(&station.clock, Arc::clone(&cell), epoch);
    let source = driver.tick_source().unwrap();

    let start_memory = get_memory_usage();
    let start = Instant::now();
    let mut next_log = config.log_interval;

    println!(
        "Soak run: {:?} at {:?} pulse spacing, {} ppm drift",
        config.duration, config.pulse_interval, config.drift_ppm
    );

    while start.elapsed() < config.duration {
        cal.measure_once(source.as_ref()).unwrap();
        thread::sleep(config.measurement_interval);

        if start.elapsed() >= next_log {
            let s = stats.snapshot();
            let pct = 100.0 * start.elapsed().as_secs_f64() / config.duration.as_secs_f64();
            println!(
                "[{pct:5.1}%] edges={} triggers={} intervals={} pps={}/{} cal_cycles={} rss={} KiB",
                s.edges_seen,
                s.triggers_emitted,
                s.intervals_emitted,
                s.timepulses_emitted,
                s.timepulses_rejected,
                cal.cycles(),
                get_memory_usage() / 1024,
            );
            next_log += config.log_interval;
        }
    }

    driver.stop().unwrap();

    let elapsed = start.elapsed();
    let memory_growth = get_memory_usage().saturating_sub(start_memory);
    let s = stats.snapshot();
    let snap = cell.snapshot();

    // Wall time falls behind a fast counter: offset-per-tick slope is
    // -drift / (1e6 + drift).
    let expected_slope = -config.drift_ppm / (1e6 + config.drift_ppm);

    let mut failures: Vec<String> = Vec::new();

    let expected_triggers = (config.duration.as_millis()
        / config.pulse_interval.as_millis().max(1)) as u64;
    if s.triggers_emitted < expected_triggers / 2 {
        failures.push(format!(
            "pulse stream stalled: {} triggers, expected about {expected_triggers}",
            s.triggers_emitted
        ));
    }

    if s.pileup_dropped != 0
        || s.unmapped != 0
        || s.edges_inhibited != 0
        || s.triggers_gated != 0
        || s.timepulses_rejected != 0
    {
        failures.push(format!(
            "clean stream was filtered: pileup={} unmapped={} inhibited={} gated={} rejected={}",
            s.pileup_dropped, s.unmapped, s.edges_inhibited, s.triggers_gated, s.timepulses_rejected
        ));
    }

    // Exact accounting: every edge is a trigger or a time pulse, and
    // every trigger after the first carries an interval.
    let pps_edges = s.timepulses_emitted + s.timepulses_rejected;
    let trigger_edges = s.triggers_emitted + s.triggers_gated;
    if s.edges_seen != trigger_edges + pps_edges {
        failures.push(format!(
            "edge accounting broken: {} seen, {} triggers + {} time pulses",
            s.edges_seen, trigger_edges, pps_edges
        ));
    }
    if trigger_edges > 0 && s.intervals_emitted != trigger_edges - 1 {
        failures.push(format!(
            "interval accounting broken: {} intervals from {} trigger edges",
            s.intervals_emitted, trigger_edges
        ));
    }

    let expected_pps = config.duration.as_secs().saturating_sub(1);
    if s.timepulses_emitted < expected_pps {
        failures.push(format!(
            "PPS stream under-delivered: {} emitted, expected at least {expected_pps}",
            s.timepulses_emitted
        ));
    }

    {
        let m = metrics.lock().unwrap();
        if m.total(EventKind::SamplingTrigger) != s.triggers_emitted
            || m.total(EventKind::EventInterval) != s.intervals_emitted
            || m.total(EventKind::TimePulse) != s.timepulses_emitted
            || m.total(EventKind::Generic) != s.generics_emitted
        {
            failures.push(String::from("metrics ring disagrees with classifier counters"));
        }
    }

    let expected_cycles = (config.duration.as_millis()
        / config.measurement_interval.as_millis().max(1)) as u64;
    if cal.cycles() < expected_cycles / 2 {
        failures.push(format!(
            "calibration stalled: {} cycles, expected about {expected_cycles}",
            cal.cycles()
        ));
    }

    if (snap.model.slope - expected_slope).abs() > config.slope_tolerance {
        failures.push(format!(
            "fitted slope {:+.3e} off expected {expected_slope:+.3e} by more than {:.0e}",
            snap.model.slope, config.slope_tolerance
        ));
    }

    if let Some(max_growth) = config.max_memory_growth {
        if memory_growth > max_growth {
            failures.push(format!(
                "memory grew {} KiB, bound {} KiB",
                memory_growth / 1024,
                max_growth / 1024
            ));
        }
    }

    let passed = failures.is_empty();

    println!("\n=== Soak Summary ===");
    println!("Duration:            {elapsed:?}");
    println!("Edges seen:          {}", s.edges_seen);
    println!("Triggers emitted:    {}", s.triggers_emitted);
    println!("Intervals emitted:   {}", s.intervals_emitted);
    println!(
        "Time pulses:         {} emitted, {} rejected",
        s.timepulses_emitted, s.timepulses_rejected
    );
    println!("Calibration cycles:  {}", cal.cycles());
    println!(
        "Fitted slope:        {:+.3e} (expected {expected_slope:+.3e})",
        snap.model.slope
    );
    println!("Memory growth:       {} KiB", memory_growth / 1024);
    println!("Result:              {}", if passed { "PASS" } else { "FAIL" });
    for failure in &failures {
        println!("  - {failure}");
    }

    SoakOutcome {
        duration: elapsed,
        edges_seen: s.edges_seen,
        triggers_emitted: s.triggers_emitted,
        intervals_emitted: s.intervals_emitted,
        timepulses_emitted: s.timepulses_emitted,
        timepulses_rejected: s.timepulses_rejected,
        calibration_cycles: cal.cycles(),
        final_slope: snap.model.slope,
        memory_growth,
        passed,
    }
}

#[test]
fn test_soak_smoke() {
    let outcome = run_soak(&SoakConfig::smoke());
    assert!(outcome.passed, "soak smoke run failed: {outcome:#?}");
}

#[test]
#[ignore = "Soak test - takes 1 minute"]
fn test_soak_short() {
    let outcome = run_soak(&SoakConfig::short());
    assert!(outcome.passed, "short soak run failed: {outcome:#?}");
}

#[test]
#[ignore = "Soak test - takes 1 hour"]
fn test_soak_long() {
    let outcome = run_soak(&SoakConfig::long());
    assert!(outcome.passed, "long soak run failed: {outcome:#?}");
}

#[test]
#[ignore = "Soak test - takes 2 minutes"]
fn test_soak_memory_stability() {
    let outcome = run_soak(&SoakConfig::memory_stability());
    assert!(outcome.passed, "memory stability run failed: {outcome:#?}");
}
