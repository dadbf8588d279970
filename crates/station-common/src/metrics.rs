//! Event counting and rate metrics for the dispatch pipeline.
//!
//! Ring-buffer based so that recording stays allocation-free once
//! constructed; callers pass wall time in explicitly, which keeps the
//! arithmetic testable with synthetic clocks.

use crate::events::EventKind;
use serde::Serialize;
use std::time::Duration;

/// Per-kind event totals plus a ring of recent arrival times for
/// windowed rate estimation.
#[derive(Debug)]
pub struct EventMetrics {
    /// Monotonic totals, indexed by `EventKind::index`.
    totals: [u64; EventKind::COUNT],
    /// Recent event wall times (ms since epoch), one ring per kind.
    rings: Vec<RateRing>,
    /// Rate estimation window.
    window: Duration,
}

#[derive(Debug)]
struct RateRing {
    times_ms: Box<[i64]>,
    write_pos: usize,
    len: usize,
}

impl RateRing {
    fn new(capacity: usize) -> Self {
        Self {
            times_ms: vec![0_i64; capacity.max(1)].into_boxed_slice(),
            write_pos: 0,
            len: 0,
        }
    }

    fn push(&mut self, now_ms: i64) {
        self.times_ms[self.write_pos] = now_ms;
        self.write_pos = (self.write_pos + 1) % self.times_ms.len();
        self.len = self.len.saturating_add(1).min(self.times_ms.len());
    }

    fn count_since(&self, cutoff_ms: i64) -> usize {
        self.times_ms[..self.len]
            .iter()
            .filter(|&&t| t >= cutoff_ms)
            .count()
    }

    fn clear(&mut self) {
        self.times_ms.fill(0);
        self.write_pos = 0;
        self.len = 0;
    }
}

impl EventMetrics {
    /// Create a metrics collector.
    ///
    /// # Arguments
    ///
    /// * `window` - Span over which rates are computed.
    /// * `ring_capacity` - Arrival times retained per kind. Rates saturate
    ///   at this many events per window.
    #[must_use]
    pub fn new(window: Duration, ring_capacity: usize) -> Self {
        Self {
            totals: [0; EventKind::COUNT],
            rings: (0..EventKind::COUNT)
                .map(|_| RateRing::new(ring_capacity))
                .collect(),
            window,
        }
    }

    /// Record one event of `kind` observed at `now_ms` (wall clock,
    /// milliseconds since the Unix epoch).
    pub fn record(&mut self, kind: EventKind, now_ms: i64) {
        let idx = kind.index();
        self.totals[idx] += 1;
        self.rings[idx].push(now_ms);
    }

    /// Monotonic total for `kind`.
    #[must_use]
    pub fn total(&self, kind: EventKind) -> u64 {
        self.totals[kind.index()]
    }

    /// Sum of totals across all kinds.
    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.totals.iter().sum()
    }

    /// Events per second for `kind` over the configured window ending at
    /// `now_ms`.
    #[must_use]
    pub fn rate_hz(&self, kind: EventKind, now_ms: i64) -> f64 {
        let window_secs = self.window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        let cutoff = now_ms - self.window.as_millis() as i64;
        let count = self.rings[kind.index()].count_since(cutoff);
        count as f64 / window_secs
    }

    /// Snapshot of totals and rates at `now_ms`.
    #[must_use]
    pub fn snapshot(&self, now_ms: i64) -> EventMetricsSnapshot {
        EventMetricsSnapshot {
            window_secs: self.window.as_secs_f64(),
            kinds: EventKind::ALL
                .iter()
                .map(|&kind| KindStat {
                    kind,
                    total: self.total(kind),
                    rate_hz: self.rate_hz(kind, now_ms),
                })
                .collect(),
        }
    }

    /// Reset all totals and rings to the initial state.
    pub fn reset(&mut self) {
        self.totals = [0; EventKind::COUNT];
        for ring in &mut self.rings {
            ring.clear();
        }
    }
}

/// Immutable snapshot of event metrics for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EventMetricsSnapshot {
    /// Rate window in seconds.
    pub window_secs: f64,
    /// Per-kind totals and rates, in `EventKind::ALL` order.
    pub kinds: Vec<KindStat>,
}

/// Total and windowed rate for one event kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KindStat {
    /// Event kind.
    pub kind: EventKind,
    /// Monotonic total.
    pub total: u64,
    /// Events per second over the snapshot window.
    pub rate_hz: f64,
}
