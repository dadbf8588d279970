//! Event sinks wired into the daemon.
//!
//! Both sinks run synchronously in the edge-callback context and do
//! bounded work: one line of structured logging, one counter update.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use station_common::events::SignalEvent;
use station_common::metrics::EventMetrics;
use station_gpio::EventSink;
use station_timing::calibrate::wall_clock_now;

/// Sink that writes every classified event to the structured log.
///
/// Triggers, intervals, and generic signals log at debug so the hot
/// path stays quiet at the default level. Time-pulse offsets are the
/// once-per-second discipline feedback an operator watches, so they
/// log at info.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl LogPublisher {
    /// Create the logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogPublisher {
    fn on_event(&mut self, event: &SignalEvent) {
        match *event {
            SignalEvent::SamplingTrigger => debug!("Sampling trigger"),
            SignalEvent::EventInterval(ns) => debug!(interval_ns = ns, "Event interval"),
            SignalEvent::TimePulseOffset(us) => info!(offset_us = us, "Time pulse offset"),
            SignalEvent::GenericSignal(gpio) => debug!(gpio, "Generic signal"),
        }
    }
}

/// Sink that feeds the windowed event-rate metrics.
#[derive(Debug)]
pub struct MetricsSink {
    metrics: Arc<Mutex<EventMetrics>>,
}

impl MetricsSink {
    /// Create a sink recording into the shared metrics.
    #[must_use]
    pub fn new(metrics: Arc<Mutex<EventMetrics>>) -> Self {
        Self { metrics }
    }
}

impl EventSink for MetricsSink {
    fn on_event(&mut self, event: &SignalEvent) {
        // A failed clock read records at t=0: the total still counts,
        // only the rate window is skewed.
        let now_ms = wall_clock_now()
            .map(|(sec, nsec)| sec * 1000 + nsec / 1_000_000)
            .unwrap_or(0);
        match self.metrics.lock() {
            Ok(mut metrics) => metrics.record(event.kind(), now_ms),
            Err(_) => warn!("Event metrics mutex poisoned, count dropped"),
        }
    }
}
