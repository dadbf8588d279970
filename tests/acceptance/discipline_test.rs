//! Clock discipline acceptance tests.
//!
//! Exercise the calibration chain the way the daemon runs it: samples
//! into the regression buffer, fitted models through the seqlock cell,
//! and synthesized time-pulse timestamps checked against the system
//! clock. The synthetic tests drive `record_sample` with constructed
//! tick/wall pairs; the live tests measure the simulated driver's
//! virtual counter for real.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use station_common::config::ClockConfig;
use station_common::events::SignalEvent;
use station_gpio::dispatch::CollectingSink;
use station_gpio::{
    EdgeClassifier, EdgeEvent, EdgeHandler, EdgePolarity, GpioDriver, PinMap, SimulatedGpioDriver,
};
use station_timing::calibrate::{wall_clock_now, ClockCalibrator, ProgramEpoch};
use station_timing::cell::ClockModelCell;
use station_timing::regression::ClockModel;
use station_timing::synth::synthesize;

use super::common::quiet_station_config;

const BOUND: Duration = Duration::from_secs(3600);

fn pulse_edge(gpio: u8, raw_tick: u32) -> EdgeEvent {
    EdgeEvent {
        gpio,
        polarity: EdgePolarity::Rising,
        raw_tick,
    }
}

fn pulse_offsets(events: &[SignalEvent]) -> Vec<i32> {
    events
        .iter()
        .filter_map(|event| match event {
            SignalEvent::TimePulseOffset(us) => Some(*us),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Synthetic Calibration Tests
// ============================================================================

#[test]
fn test_flat_offset_fit_feeds_synthesis() {
    let cell = Arc::new(ClockModelCell::new());
    let config = ClockConfig {
        buffer_size: 64,
        ..ClockConfig::default()
    };
    let mut cal = ClockCalibrator::new(&config, Arc::clone(&cell), ProgramEpoch::from_millis(0));

    // Counter and wall clock run at the same rate, 250 µs apart.
    for k in 0..20u32 {
        let tick = k * 100_000;
        cal.record_sample(tick, i64::from(tick) + 250);
    }

    let snap = cell.snapshot();
    assert_eq!(snap.model.slope, 0.0);
    assert!((snap.model.intercept - 250.0).abs() < 1e-9);

    // A pulse two seconds in lands 250 µs past the second boundary.
    let ts = synthesize(2_000_000, &snap, 0, 2, BOUND).unwrap();
    assert_eq!(ts.unix_seconds, 2);
    assert_eq!(ts.nanoseconds, 250_000);
    assert!((ts.offset_us - 250.0).abs() < 1.0);
}

#[test]
fn test_dilated_tick_rate_recovers_drift() {
    let cell = Arc::new(ClockModelCell::new());
    let config = ClockConfig {
        buffer_size: 64,
        ..ClockConfig::default()
    };
    let mut cal = ClockCalibrator::new(&config, Arc::clone(&cell), ProgramEpoch::from_millis(0));

    // Wall clock gains 100 µs per 100 ms of ticks (the counter runs
    // 1000 ppm slow), with alternating ±4 µs measurement noise.
    for k in 0..30i64 {
        let tick = (k * 100_000) as u32;
        let noise = if k % 2 == 0 { 4 } else { -4 };
        cal.record_sample(tick, k * 100_100 + noise);
    }

    let snap = cell.snapshot();
    assert!(
        (snap.model.slope - 1.0e-3).abs() < 1e-5,
        "slope {} should recover the 1000 ppm dilation",
        snap.model.slope
    );

    // The next pulse in the series synthesizes onto the dilated
    // timeline: tick 3.1 s maps to wall 3.1031 s.
    let ts = synthesize(3_100_000, &snap, 0, 3, BOUND).unwrap();
    assert_eq!(ts.unix_seconds, 3);
    assert!(
        (ts.offset_us - 103_100.0).abs() < 50.0,
        "offset {} µs",
        ts.offset_us
    );
}

#[test]
fn test_runaway_model_recovers_after_recalibration() {
    let cell = Arc::new(ClockModelCell::new());
    cell.publish(
        ClockModel {
            slope: 1.0e9,
            intercept: 0.0,
        },
        0,
    );
    assert_eq!(synthesize(1_000_000, &cell.snapshot(), 0, 1, BOUND), None);

    // Fresh samples through the calibrator replace the wild fit and
    // synthesis starts emitting again.
    let config = ClockConfig {
        buffer_size: 32,
        ..ClockConfig::default()
    };
    let mut cal = ClockCalibrator::new(&config, Arc::clone(&cell), ProgramEpoch::from_millis(0));
    for k in 0..5u32 {
        let tick = k * 100_000;
        cal.record_sample(tick, i64::from(tick) + 250);
    }
    assert_eq!(cal.sample_count(), 5);

    let ts = synthesize(500_000, &cell.snapshot(), 0, 0, BOUND);
    assert!(ts.is_some(), "recalibration should clear the runaway model");
}

// ============================================================================
// Live Clock Discipline Tests
// ============================================================================

#[test]
fn test_calibration_tracks_live_sim_clock() {
    let config = quiet_station_config();
    let pins = PinMap::from_assignments(&config.gpio.pins);
    let mut driver = SimulatedGpioDriver::new(&config.gpio);
    driver.initialize(&pins).unwrap();

    let epoch = ProgramEpoch::now().unwrap();
    let cell = Arc::new(ClockModelCell::new());
    let mut cal = ClockCalibrator::new(&config.clock, Arc::clone(&cell), epoch);
    let source = driver.tick_source().unwrap();

    for _ in 0..12 {
        cal.measure_once(source.as_ref()).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(cal.cycles(), 12);
    assert_eq!(cal.sample_count(), 12);

    // The drift-free virtual counter fits a near-identity model whose
    // intercept is the (small) gap between epoch capture and counter
    // start.
    let snap = cell.snapshot();
    assert!(snap.model.slope.abs() < 0.05, "slope {}", snap.model.slope);
    assert!(
        snap.model.intercept.abs() < 100_000.0,
        "intercept {} µs",
        snap.model.intercept
    );
    assert!(snap.reference_tick > 0);

    // A time pulse through the classifier consumes this model live.
    let mut classifier = EdgeClassifier::new(&config, pins, Arc::clone(&cell), epoch);
    let sink = CollectingSink::new();
    classifier.register_sink(Box::new(sink.clone()));

    let raw = driver.current_tick().unwrap();
    classifier.handle_edge(pulse_edge(18, raw)).unwrap();

    let offsets = pulse_offsets(&sink.events());
    assert_eq!(offsets.len(), 1);
    assert!(
        offsets[0].unsigned_abs() < 1_000_000,
        "pulse offset {} µs",
        offsets[0]
    );

    driver.stop().unwrap();
}

#[test]
fn test_model_corrects_drifting_counter() {
    // Counter runs 10 % fast: raw ticks accumulate ~1 ms of error every
    // 10 ms of wall time. The fitted model must absorb it so that
    // synthesized pulse times stay on the wall clock.
    let mut config = quiet_station_config();
    if let Some(sim) = config.gpio.sim.as_mut() {
        sim.tick_drift_ppm = 100_000.0;
    }

    let pins = PinMap::from_assignments(&config.gpio.pins);
    let mut driver = SimulatedGpioDriver::new(&config.gpio);
    driver.initialize(&pins).unwrap();

    let epoch = ProgramEpoch::now().unwrap();
    let cell = Arc::new(ClockModelCell::new());
    let mut cal = ClockCalibrator::new(&config.clock, Arc::clone(&cell), epoch);
    let source = driver.tick_source().unwrap();

    for _ in 0..30 {
        cal.measure_once(source.as_ref()).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    // Fast ticks mean the wall clock falls behind the counter: the
    // offset-per-tick slope comes out near -1/11.
    let snap = cell.snapshot();
    assert!(
        snap.model.slope < -0.05 && snap.model.slope > -0.15,
        "slope {} should reflect a 10 % fast counter",
        snap.model.slope
    );

    let mut classifier = EdgeClassifier::new(&config, pins, Arc::clone(&cell), epoch);
    let sink = CollectingSink::new();
    classifier.register_sink(Box::new(sink.clone()));

    let raw = driver.current_tick().unwrap();
    classifier.handle_edge(pulse_edge(18, raw)).unwrap();

    // Uncorrected, 150 ms of run time would leave ~15 ms of raw error;
    // the corrected offset only carries fit noise and the gap between
    // the tick capture and the wall-clock read.
    let offsets = pulse_offsets(&sink.events());
    assert_eq!(offsets.len(), 1);
    assert!(
        offsets[0].unsigned_abs() < 20_000,
        "corrected pulse offset {} µs",
        offsets[0]
    );

    driver.stop().unwrap();
}

#[test]
fn test_time_pulse_survives_counter_wrap() {
    let config = quiet_station_config();
    let pins = PinMap::from_assignments(&config.gpio.pins);
    let cell = Arc::new(ClockModelCell::new());

    // Anchor the epoch so a pulse near the top of the 32-bit counter
    // lands on the current wall clock.
    let (sec, nsec) = wall_clock_now().unwrap();
    let now_ms = sec * 1000 + nsec / 1_000_000;
    let first_raw = u32::MAX - 1_000;
    let epoch = ProgramEpoch::from_millis(now_ms - i64::from(first_raw) / 1_000);

    let mut classifier = EdgeClassifier::new(&config, pins, cell, epoch);
    let sink = CollectingSink::new();
    classifier.register_sink(Box::new(sink.clone()));
    let stats = classifier.stats();

    classifier.handle_edge(pulse_edge(18, first_raw)).unwrap();

    // The counter wraps between the two pulses. Without 64-bit
    // extension the second timestamp would land ~4295 s in the past
    // and fail the sanity bound.
    classifier.handle_edge(pulse_edge(18, 5_000)).unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.edges_seen, 2);
    assert_eq!(snapshot.timepulses_emitted, 2);
    assert_eq!(snapshot.timepulses_rejected, 0);

    let offsets = pulse_offsets(&sink.events());
    assert_eq!(offsets.len(), 2);
    for us in offsets {
        assert!(us.unsigned_abs() < 4_000_000, "pulse offset {us} µs");
    }
}
