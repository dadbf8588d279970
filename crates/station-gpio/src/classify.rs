//! Edge classification: pileup filtering, dead-time gating, and event
//! synthesis.
//!
//! The classifier is the [`EdgeHandler`] the daemon injects into its
//! driver. It runs entirely in the driver's edge-callback context; the
//! only state it shares with other threads is the published clock
//! snapshot (read-only here), the inhibit/liveness flags, and the
//! diagnostics counters, all atomic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace, warn};

use station_common::config::{PinRole, StationConfig};
use station_common::error::StationResult;
use station_common::events::SignalEvent;
use station_timing::calibrate::{wall_clock_now, ProgramEpoch};
use station_timing::cell::ClockModelCell;
use station_timing::overflow::TickExtender;
use station_timing::synth::synthesize;

use crate::dispatch::{EventDispatcher, EventSink};
use crate::pins::PinMap;
use crate::{EdgeEvent, EdgeHandler};

/// Decaying burst counter that drops edges during electrical noise.
///
/// Edges closer together than the window raise the counter; spaced
/// edges lower it. Once the counter exceeds the threshold, edges are
/// dropped until the burst subsides. The last-seen tick advances on
/// every observed edge, dropped or not.
#[derive(Debug)]
pub struct PileupFilter {
    window_ticks: u32,
    threshold: u16,
    counter: u16,
    last_tick: u32,
}

impl PileupFilter {
    /// Create a filter with the given window and threshold.
    #[must_use]
    pub fn new(window_ticks: u32, threshold: u16) -> Self {
        Self {
            window_ticks,
            threshold,
            counter: 0,
            last_tick: 0,
        }
    }

    /// Account for an edge at `raw_tick`; true when it must be dropped.
    pub fn observe(&mut self, raw_tick: u32) -> bool {
        let delta = raw_tick.wrapping_sub(self.last_tick);
        self.last_tick = raw_tick;

        if delta < self.window_ticks {
            self.counter = self.counter.saturating_add(1);
        } else if self.counter > 0 {
            self.counter -= 1;
        }

        self.counter > self.threshold
    }

    /// Current burst counter value.
    #[must_use]
    pub fn counter(&self) -> u16 {
        self.counter
    }
}

/// Shared diagnostics counters for the classification pipeline.
#[derive(Debug, Default)]
pub struct ClassifierStats {
    /// Edges delivered while alive (including inhibited ones).
    pub edges_seen: AtomicU64,
    /// Edges ignored because the inhibit flag was set.
    pub edges_inhibited: AtomicU64,
    /// Edges dropped by the pileup filter.
    pub pileup_dropped: AtomicU64,
    /// Edges on pins outside the pin map.
    pub unmapped: AtomicU64,
    /// Sampling triggers emitted.
    pub triggers_emitted: AtomicU64,
    /// Trigger edges suppressed by the sampling dead-time.
    pub triggers_gated: AtomicU64,
    /// Inter-event intervals emitted.
    pub intervals_emitted: AtomicU64,
    /// Time-pulse offsets emitted.
    pub timepulses_emitted: AtomicU64,
    /// Time pulses rejected by the sanity bound.
    pub timepulses_rejected: AtomicU64,
    /// Generic signals emitted.
    pub generics_emitted: AtomicU64,
}

impl ClassifierStats {
    /// Consistent-enough copy of all counters for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ClassifierStatsSnapshot {
        ClassifierStatsSnapshot {
            edges_seen: self.edges_seen.load(Ordering::Relaxed),
            edges_inhibited: self.edges_inhibited.load(Ordering::Relaxed),
            pileup_dropped: self.pileup_dropped.load(Ordering::Relaxed),
            unmapped: self.unmapped.load(Ordering::Relaxed),
            triggers_emitted: self.triggers_emitted.load(Ordering::Relaxed),
            triggers_gated: self.triggers_gated.load(Ordering::Relaxed),
            intervals_emitted: self.intervals_emitted.load(Ordering::Relaxed),
            timepulses_emitted: self.timepulses_emitted.load(Ordering::Relaxed),
            timepulses_rejected: self.timepulses_rejected.load(Ordering::Relaxed),
            generics_emitted: self.generics_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`ClassifierStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStatsSnapshot {
    /// Edges delivered while alive.
    pub edges_seen: u64,
    /// Edges ignored while inhibited.
    pub edges_inhibited: u64,
    /// Edges dropped by the pileup filter.
    pub pileup_dropped: u64,
    /// Edges on unmapped pins.
    pub unmapped: u64,
    /// Sampling triggers emitted.
    pub triggers_emitted: u64,
    /// Trigger edges suppressed by the dead-time gate.
    pub triggers_gated: u64,
    /// Inter-event intervals emitted.
    pub intervals_emitted: u64,
    /// Time-pulse offsets emitted.
    pub timepulses_emitted: u64,
    /// Time pulses rejected by the sanity bound.
    pub timepulses_rejected: u64,
    /// Generic signals emitted.
    pub generics_emitted: u64,
}

/// Classifies GPIO edges into signal events.
pub struct EdgeClassifier {
    pin_map: PinMap,
    trigger_role: PinRole,
    pileup: PileupFilter,
    sampling_deadtime: Duration,
    generic_deadtime_ticks: u32,
    sanity_bound: Duration,
    epoch_ms: i64,
    extender: TickExtender,
    cell: Arc<ClockModelCell>,
    dispatcher: EventDispatcher,
    last_trigger_at: Option<Instant>,
    last_trigger_tick: Option<u32>,
    // Shared across all mapped pins, updated only on emission.
    last_generic_tick: u32,
    alive: Arc<AtomicBool>,
    inhibited: Arc<AtomicBool>,
    stats: Arc<ClassifierStats>,
}

impl std::fmt::Debug for EdgeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeClassifier")
            .field("trigger_role", &self.trigger_role)
            .field("pins", &self.pin_map.len())
            .field("sinks", &self.dispatcher.sink_count())
            .finish()
    }
}

impl EdgeClassifier {
    /// Create a classifier reading the clock snapshot from `cell`.
    #[must_use]
    pub fn new(
        config: &StationConfig,
        pin_map: PinMap,
        cell: Arc<ClockModelCell>,
        epoch: ProgramEpoch,
    ) -> Self {
        Self {
            pin_map,
            trigger_role: config.gpio.sampling_trigger,
            pileup: PileupFilter::new(
                config.gpio.pileup_window_ticks,
                config.gpio.pileup_threshold,
            ),
            sampling_deadtime: config.sampling.deadtime,
            generic_deadtime_ticks: config.gpio.generic_deadtime_ticks,
            sanity_bound: config.clock.sanity_bound,
            epoch_ms: epoch.millis(),
            extender: TickExtender::new(),
            cell,
            dispatcher: EventDispatcher::new(),
            last_trigger_at: None,
            last_trigger_tick: None,
            last_generic_tick: 0,
            alive: Arc::new(AtomicBool::new(true)),
            inhibited: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ClassifierStats::default()),
        }
    }

    /// Register a sink for dispatched events.
    pub fn register_sink(&mut self, sink: Box<dyn EventSink>) {
        self.dispatcher.register(sink);
    }

    /// Liveness token: clear it at teardown and the classifier
    /// short-circuits before touching any other state.
    #[must_use]
    pub fn liveness_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Inhibit flag: while set, edges are ignored (counted only).
    #[must_use]
    pub fn inhibit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inhibited)
    }

    /// Shared diagnostics counters.
    #[must_use]
    pub fn stats(&self) -> Arc<ClassifierStats> {
        Arc::clone(&self.stats)
    }

    fn handle_trigger(&mut self, edge: EdgeEvent) {
        let now = Instant::now();
        let gate_open = match self.last_trigger_at {
            Some(t) => now.duration_since(t) >= self.sampling_deadtime,
            None => true,
        };

        if gate_open {
            self.dispatcher.dispatch(&SignalEvent::SamplingTrigger);
            self.stats.triggers_emitted.fetch_add(1, Ordering::Relaxed);
            self.last_trigger_at = Some(now);
        } else {
            self.stats.triggers_gated.fetch_add(1, Ordering::Relaxed);
            trace!(gpio = edge.gpio, "sampling trigger gated by dead-time");
        }

        // The interval measurement deliberately bypasses the dead-time
        // gate: it wants the delta between every pair of trigger edges.
        if let Some(prev) = self.last_trigger_tick {
            let delta_ticks = edge.raw_tick.wrapping_sub(prev);
            let interval_ns = u64::from(delta_ticks) * 1000;
            self.dispatcher
                .dispatch(&SignalEvent::EventInterval(interval_ns));
            self.stats.intervals_emitted.fetch_add(1, Ordering::Relaxed);
        }
        self.last_trigger_tick = Some(edge.raw_tick);
    }

    fn handle_time_pulse(&mut self, extended_tick: u64) -> StationResult<()> {
        let snapshot = self.cell.snapshot();
        let (system_seconds, _) = wall_clock_now()?;

        match synthesize(
            extended_tick,
            &snapshot,
            self.epoch_ms,
            system_seconds,
            self.sanity_bound,
        ) {
            Some(ts) => {
                let offset_us = ts.offset_us as i32;
                self.dispatcher
                    .dispatch(&SignalEvent::TimePulseOffset(offset_us));
                self.stats.timepulses_emitted.fetch_add(1, Ordering::Relaxed);
                debug!(offset_us, unix_seconds = ts.unix_seconds, "time pulse");
            }
            None => {
                self.stats
                    .timepulses_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    tick = extended_tick,
                    slope = snapshot.model.slope,
                    "time pulse rejected by sanity bound"
                );
            }
        }
        Ok(())
    }

    fn handle_generic(&mut self, edge: EdgeEvent) {
        let delta = edge.raw_tick.wrapping_sub(self.last_generic_tick);
        if delta > self.generic_deadtime_ticks {
            self.dispatcher
                .dispatch(&SignalEvent::GenericSignal(edge.gpio));
            self.stats.generics_emitted.fetch_add(1, Ordering::Relaxed);
            self.last_generic_tick = edge.raw_tick;
        }
    }
}

impl EdgeHandler for EdgeClassifier {
    fn handle_edge(&mut self, edge: EdgeEvent) -> StationResult<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Ok(());
        }
        self.stats.edges_seen.fetch_add(1, Ordering::Relaxed);

        if self.inhibited.load(Ordering::Relaxed) {
            self.stats.edges_inhibited.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        // Every surviving edge feeds the extension so wrap detection
        // stays fresh between time pulses.
        let extended_tick = self.extender.extend(edge.raw_tick);

        if self.pileup.observe(edge.raw_tick) {
            self.stats.pileup_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(gpio = edge.gpio, tick = edge.raw_tick, "pileup drop");
            return Ok(());
        }

        let Some(role) = self.pin_map.role_of(edge.gpio) else {
            self.stats.unmapped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        if role == self.trigger_role {
            self.handle_trigger(edge);
        }
        if role == PinRole::TimePulse {
            self.handle_time_pulse(extended_tick)?;
        }
        // Generic dead-time applies to every mapped pin, including ones
        // already matched above.
        self.handle_generic(edge);

        Ok(())
    }
}
