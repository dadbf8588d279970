//! Diagnostics for the station daemon.
//!
//! The collector aggregates counters owned by other parts of the
//! daemon (event metrics, classifier stats, the published clock model,
//! calibration counters) into point-in-time reports. Reports are
//! rendered as a periodic structured log line, a JSON dump on SIGHUP,
//! and a Prometheus text-format string for external relays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use station_common::events::EventKind;
use station_common::metrics::{EventMetrics, EventMetricsSnapshot};
use station_common::state::StationState;
use station_gpio::{ClassifierStats, ClassifierStatsSnapshot};
use station_timing::calibrate::wall_clock_now;
use station_timing::cell::ClockModelCell;

/// Coarse health classification for external monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Operational but not taking good data (inhibited, or the clock
    /// discipline is rejecting most time pulses).
    Degraded,
    /// Faulted.
    Unhealthy,
    /// Starting up.
    Starting,
    /// Tearing down.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Starting => "starting",
            HealthStatus::ShuttingDown => "shutting_down",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time view of everything worth reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    /// Derived health classification.
    pub health: HealthStatus,
    /// Daemon lifecycle state.
    pub state: StationState,
    /// Seconds since the collector was created.
    pub uptime_secs: u64,
    /// Per-kind event totals and windowed rates.
    pub events: EventMetricsSnapshot,
    /// Classification pipeline counters.
    pub classifier: ClassifierStatsSnapshot,
    /// Completed calibration cycles.
    pub calibration_cycles: u64,
    /// Failed calibration cycles.
    pub calibration_failures: u64,
    /// Published clock model slope.
    pub clock_slope: f64,
    /// Published clock model intercept, microseconds.
    pub clock_intercept: f64,
    /// Extended tick the model is anchored at.
    pub reference_tick: u64,
}

/// Aggregates shared counters into [`DiagnosticsReport`]s.
pub struct DiagnosticsCollector {
    start: Instant,
    metrics: Arc<Mutex<EventMetrics>>,
    classifier: Arc<ClassifierStats>,
    cell: Arc<ClockModelCell>,
    calibration_cycles: Arc<AtomicU64>,
    calibration_failures: Arc<AtomicU64>,
}

impl DiagnosticsCollector {
    /// Create a collector over the daemon's shared counters.
    #[must_use]
    pub fn new(
        metrics: Arc<Mutex<EventMetrics>>,
        classifier: Arc<ClassifierStats>,
        cell: Arc<ClockModelCell>,
        calibration_cycles: Arc<AtomicU64>,
        calibration_failures: Arc<AtomicU64>,
    ) -> Self {
        Self {
            start: Instant::now(),
            metrics,
            classifier,
            cell,
            calibration_cycles,
            calibration_failures,
        }
    }

    /// Health classification for the given daemon state.
    #[must_use]
    pub fn health(&self, state: StationState) -> HealthStatus {
        match state {
            StationState::Created | StationState::Starting => HealthStatus::Starting,
            StationState::Running => {
                let stats = self.classifier.snapshot();
                // More rejected than accepted time pulses means the
                // discipline has lost the clock.
                if stats.timepulses_rejected > stats.timepulses_emitted {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            StationState::Inhibited => HealthStatus::Degraded,
            StationState::Stopping | StationState::Stopped => HealthStatus::ShuttingDown,
            StationState::Faulted => HealthStatus::Unhealthy,
        }
    }

    /// Build a report for the given daemon state.
    #[must_use]
    pub fn report(&self, state: StationState) -> DiagnosticsReport {
        let now_ms = wall_clock_now()
            .map(|(sec, nsec)| sec * 1000 + nsec / 1_000_000)
            .unwrap_or(0);
        let events = match self.metrics.lock() {
            Ok(metrics) => metrics.snapshot(now_ms),
            Err(_) => EventMetricsSnapshot {
                window_secs: 0.0,
                kinds: Vec::new(),
            },
        };
        let clock = self.cell.snapshot();

        DiagnosticsReport {
            health: self.health(state),
            state,
            uptime_secs: self.start.elapsed().as_secs(),
            events,
            classifier: self.classifier.snapshot(),
            calibration_cycles: self.calibration_cycles.load(Ordering::Relaxed),
            calibration_failures: self.calibration_failures.load(Ordering::Relaxed),
            clock_slope: clock.model.slope,
            clock_intercept: clock.model.intercept,
            reference_tick: clock.reference_tick,
        }
    }

    /// One structured log line for the periodic summary.
    pub fn log_summary(&self, state: StationState) {
        let report = self.report(state);
        let triggers = kind_total(&report, EventKind::SamplingTrigger);
        let timepulses = kind_total(&report, EventKind::TimePulse);
        info!(
            state = %report.state,
            health = %report.health,
            uptime_secs = report.uptime_secs,
            edges = report.classifier.edges_seen,
            triggers,
            timepulses,
            pileup_dropped = report.classifier.pileup_dropped,
            timepulses_rejected = report.classifier.timepulses_rejected,
            cal_cycles = report.calibration_cycles,
            slope = report.clock_slope,
            "Periodic status"
        );
    }

    /// Full dump: JSON at info, Prometheus text at debug.
    pub fn dump(&self, state: StationState) {
        let report = self.report(state);
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "Diagnostics snapshot"),
            Err(e) => warn!(error = %e, "Failed to serialize diagnostics report"),
        }
        debug!(metrics = %format_prometheus_metrics(&report), "Prometheus snapshot");
    }
}

fn kind_total(report: &DiagnosticsReport, kind: EventKind) -> u64 {
    report
        .events
        .kinds
        .get(kind.index())
        .map_or(0, |stat| stat.total)
}

/// Render a report in Prometheus text exposition format.
#[must_use]
pub fn format_prometheus_metrics(report: &DiagnosticsReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();

    out.push_str("# HELP muon_health Station health (1=healthy, 0=not)\n");
    out.push_str("# TYPE muon_health gauge\n");
    let _ = writeln!(
        out,
        "muon_health{{status=\"{}\"}} {}",
        report.health,
        u8::from(report.health == HealthStatus::Healthy)
    );

    out.push_str("# HELP muon_state Daemon lifecycle state\n");
    out.push_str("# TYPE muon_state gauge\n");
    let _ = writeln!(out, "muon_state{{state=\"{}\"}} 1", report.state);

    out.push_str("# HELP muon_uptime_seconds Daemon uptime\n");
    out.push_str("# TYPE muon_uptime_seconds gauge\n");
    let _ = writeln!(out, "muon_uptime_seconds {}", report.uptime_secs);

    out.push_str("# HELP muon_events_total Classified events by kind\n");
    out.push_str("# TYPE muon_events_total counter\n");
    for stat in &report.events.kinds {
        let _ = writeln!(
            out,
            "muon_events_total{{kind=\"{}\"}} {}",
            stat.kind.as_str(),
            stat.total
        );
    }

    out.push_str("# HELP muon_event_rate_hz Windowed event rate by kind\n");
    out.push_str("# TYPE muon_event_rate_hz gauge\n");
    for stat in &report.events.kinds {
        let _ = writeln!(
            out,
            "muon_event_rate_hz{{kind=\"{}\"}} {:.6}",
            stat.kind.as_str(),
            stat.rate_hz
        );
    }

    out.push_str("# HELP muon_edges_total Edges delivered to the classifier\n");
    out.push_str("# TYPE muon_edges_total counter\n");
    let _ = writeln!(out, "muon_edges_total {}", report.classifier.edges_seen);

    out.push_str("# HELP muon_pileup_dropped_total Edges dropped by the pileup filter\n");
    out.push_str("# TYPE muon_pileup_dropped_total counter\n");
    let _ = writeln!(
        out,
        "muon_pileup_dropped_total {}",
        report.classifier.pileup_dropped
    );

    out.push_str("# HELP muon_timepulse_rejected_total Time pulses outside the sanity bound\n");
    out.push_str("# TYPE muon_timepulse_rejected_total counter\n");
    let _ = writeln!(
        out,
        "muon_timepulse_rejected_total {}",
        report.classifier.timepulses_rejected
    );

    out.push_str("# HELP muon_calibration_cycles_total Completed clock measurement cycles\n");
    out.push_str("# TYPE muon_calibration_cycles_total counter\n");
    let _ = writeln!(
        out,
        "muon_calibration_cycles_total {}",
        report.calibration_cycles
    );

    out.push_str("# HELP muon_calibration_failures_total Failed clock measurement cycles\n");
    out.push_str("# TYPE muon_calibration_failures_total counter\n");
    let _ = writeln!(
        out,
        "muon_calibration_failures_total {}",
        report.calibration_failures
    );

    out.push_str("# HELP muon_clock_slope Published clock model slope\n");
    out.push_str("# TYPE muon_clock_slope gauge\n");
    let _ = writeln!(out, "muon_clock_slope {:.12}", report.clock_slope);

    out.push_str("# HELP muon_clock_reference_tick Extended tick the model is anchored at\n");
    out.push_str("# TYPE muon_clock_reference_tick gauge\n");
    let _ = writeln!(out, "muon_clock_reference_tick {}", report.reference_tick);

    out
}
