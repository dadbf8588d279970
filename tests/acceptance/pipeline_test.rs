//! Edge pipeline acceptance tests.
//!
//! Run the simulated driver against the classifier exactly as the
//! daemon wires them: pulse stream in, classified events and metrics
//! out, with the inhibit flag and liveness token exercised along the
//! teardown path. Also covers configuration file loading, which the
//! daemon does before any of the above.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use station_common::config::{ConfigError, StationConfig};
use station_common::events::{EventKind, SignalEvent};
use station_common::metrics::EventMetrics;
use station_gpio::dispatch::CollectingSink;
use station_gpio::{EdgeClassifier, EdgePolarity, GpioDriver, PinMap, SimulatedGpioDriver};
use station_timing::calibrate::ProgramEpoch;
use station_timing::cell::ClockModelCell;
use tempfile::NamedTempFile;

use super::common::{
    pulsing_station_config, quiet_station_config, wait_until, CountingSink,
};

// ============================================================================
// Pipeline Tests
// ============================================================================

#[test]
fn test_sim_pulse_stream_classified_end_to_end() {
    let mut config = pulsing_station_config(Duration::from_millis(10), 0.0);
    config.sampling.deadtime = Duration::from_millis(2);

    let pins = PinMap::from_assignments(&config.gpio.pins);
    let cell = Arc::new(ClockModelCell::new());
    let epoch = ProgramEpoch::now().unwrap();

    let mut classifier = EdgeClassifier::new(&config, pins.clone(), cell, epoch);
    let events = CollectingSink::new();
    let metrics = Arc::new(Mutex::new(EventMetrics::new(
        config.diagnostics.rate_window,
        4096,
    )));
    classifier.register_sink(Box::new(events.clone()));
    classifier.register_sink(Box::new(CountingSink::new(Arc::clone(&metrics))));
    let stats = classifier.stats();

    let mut driver = SimulatedGpioDriver::new(&config.gpio);
    driver.initialize(&pins).unwrap();
    driver.attach(Box::new(classifier)).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            stats.snapshot().triggers_emitted >= 10
        }),
        "pulse stream should classify at least 10 triggers"
    );

    // A time pulse through the same running pipeline.
    driver.inject_edge(18, EdgePolarity::Rising);
    assert!(wait_until(Duration::from_secs(1), || {
        let s = stats.snapshot();
        s.timepulses_emitted + s.timepulses_rejected >= 1
    }));

    driver.stop().unwrap();
    let s = stats.snapshot();

    // Nothing in a clean 10 ms stream gets filtered.
    assert_eq!(s.pileup_dropped, 0);
    assert_eq!(s.unmapped, 0);
    assert_eq!(s.edges_inhibited, 0);
    assert_eq!(s.triggers_gated, 0);
    assert!(s.timepulses_emitted >= 1);

    // Every trigger edge after the first also emitted an interval; the
    // remaining edges are time pulses (the injected one, plus the
    // simulator's own PPS if the run crossed a second boundary).
    let pps_edges = s.timepulses_emitted + s.timepulses_rejected;
    assert_eq!(s.triggers_emitted, s.edges_seen - pps_edges);
    assert_eq!(s.intervals_emitted, s.edges_seen - pps_edges - 1);

    // Sink contents and shared metrics agree with the counters.
    let collected = events.events();
    let triggers = collected
        .iter()
        .filter(|e| matches!(e, SignalEvent::SamplingTrigger))
        .count() as u64;
    assert_eq!(triggers, s.triggers_emitted);

    let intervals: Vec<u64> = collected
        .iter()
        .filter_map(|e| match e {
            SignalEvent::EventInterval(ns) => Some(*ns),
            _ => None,
        })
        .collect();
    assert_eq!(intervals.len() as u64, s.intervals_emitted);
    for ns in &intervals {
        // Sleep-paced pulses are never closer than the nominal spacing.
        assert!(*ns >= 9_000_000, "interval {ns} ns under 10 ms pulse spacing");
    }

    let metrics = metrics.lock().unwrap();
    assert_eq!(metrics.total(EventKind::SamplingTrigger), s.triggers_emitted);
    assert_eq!(metrics.total(EventKind::EventInterval), s.intervals_emitted);
    assert_eq!(metrics.total(EventKind::TimePulse), s.timepulses_emitted);
    assert_eq!(metrics.total(EventKind::Generic), s.generics_emitted);
}

#[test]
fn test_inhibit_veto_pauses_classification() {
    let mut config = quiet_station_config();
    config.sampling.deadtime = Duration::ZERO;

    let pins = PinMap::from_assignments(&config.gpio.pins);
    let cell = Arc::new(ClockModelCell::new());
    let epoch = ProgramEpoch::now().unwrap();

    let mut classifier = EdgeClassifier::new(&config, pins.clone(), cell, epoch);
    let events = CollectingSink::new();
    classifier.register_sink(Box::new(events.clone()));
    let stats = classifier.stats();
    let inhibit = classifier.inhibit_flag();

    let mut driver = SimulatedGpioDriver::new(&config.gpio);
    driver.initialize(&pins).unwrap();
    driver.attach(Box::new(classifier)).unwrap();

    driver.inject_edge_at(6, EdgePolarity::Rising, 10_000);
    inhibit.store(true, Ordering::Relaxed);
    driver.inject_edge_at(6, EdgePolarity::Rising, 20_000);
    inhibit.store(false, Ordering::Relaxed);
    driver.inject_edge_at(6, EdgePolarity::Rising, 30_000);
    driver.stop().unwrap();

    // The vetoed edge leaves no trace in the event stream and does not
    // advance the interval tracker: the post-veto interval spans from
    // the pre-veto trigger.
    assert_eq!(
        events.events(),
        vec![
            SignalEvent::SamplingTrigger,
            SignalEvent::GenericSignal(6),
            SignalEvent::SamplingTrigger,
            SignalEvent::EventInterval(20_000_000),
            SignalEvent::GenericSignal(6),
        ]
    );

    let s = stats.snapshot();
    assert_eq!(s.edges_seen, 3);
    assert_eq!(s.edges_inhibited, 1);
    assert_eq!(s.triggers_emitted, 2);
    assert_eq!(s.intervals_emitted, 1);
}

#[test]
fn test_liveness_clears_before_teardown() {
    let config = quiet_station_config();
    let pins = PinMap::from_assignments(&config.gpio.pins);
    let cell = Arc::new(ClockModelCell::new());
    let epoch = ProgramEpoch::now().unwrap();

    let mut classifier = EdgeClassifier::new(&config, pins.clone(), cell, epoch);
    let events = CollectingSink::new();
    classifier.register_sink(Box::new(events.clone()));
    let stats = classifier.stats();
    let alive = classifier.liveness_token();

    let mut driver = SimulatedGpioDriver::new(&config.gpio);
    driver.initialize(&pins).unwrap();
    driver.attach(Box::new(classifier)).unwrap();

    driver.inject_edge_at(6, EdgePolarity::Rising, 10_000);
    assert_eq!(stats.snapshot().edges_seen, 1);
    assert_eq!(events.len(), 2); // trigger + generic

    // Teardown order: clear liveness first, stop the driver second.
    // Edges delivered in between are ignored without faulting.
    alive.store(false, Ordering::Release);
    driver.inject_edge_at(6, EdgePolarity::Rising, 20_000);

    assert_eq!(stats.snapshot().edges_seen, 1);
    assert_eq!(events.len(), 2);
    assert!(driver.is_operational());

    driver.stop().unwrap();
    assert!(!driver.is_operational());
}

// ============================================================================
// Configuration File Tests
// ============================================================================

#[test]
fn test_config_round_trips_through_file() {
    let mut config = StationConfig::default();
    config.station_id = String::from("A7");
    config.gpio.pins.event_xor = Some(26);
    config.sampling.deadtime = Duration::from_millis(3);
    config.clock.buffer_size = 128;
    config.realtime.enabled = true;
    config.realtime.priority = 70;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
    file.flush().unwrap();

    let loaded = StationConfig::from_file(file.path()).unwrap();
    loaded.validate().unwrap();
    assert_eq!(loaded.station_id, "A7");
    assert_eq!(loaded.gpio.pins.event_xor, Some(26));
    assert_eq!(loaded.sampling.deadtime, Duration::from_millis(3));
    assert_eq!(loaded.clock.buffer_size, 128);
    assert_eq!(loaded.realtime.priority, 70);
    assert_eq!(loaded.to_toml().unwrap(), config.to_toml().unwrap());
}

#[test]
fn test_missing_config_file_reports_io_error() {
    let err = StationConfig::from_file(Path::new("/nonexistent/station.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{err:?}");
}

#[test]
fn test_malformed_config_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"gpio = \"not a table\"\n").unwrap();
    file.flush().unwrap();

    let err = StationConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{err:?}");
}
