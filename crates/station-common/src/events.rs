//! Classified GPIO signal events.
//!
//! Events are ephemeral: produced inside the edge callback, handed to the
//! registered sinks synchronously, never stored.

use serde::Serialize;

/// A classified edge event delivered to external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SignalEvent {
    /// The sampling-trigger pin fired outside its dead-time window; the
    /// external sampling driver should start an acquisition.
    SamplingTrigger,

    /// Tick spacing between consecutive sampling-trigger edges, in
    /// nanoseconds. Emitted on every trigger edge, not gated by the
    /// sampling dead-time.
    EventInterval(u64),

    /// Offset of a synthesized time-pulse timestamp from the system
    /// clock, in microseconds. Only emitted when the sanity bound passed.
    TimePulseOffset(i32),

    /// A mapped pin fired outside the generic tick dead-time; carries the
    /// BCM pin number.
    GenericSignal(u8),
}

impl SignalEvent {
    /// Metric key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SamplingTrigger => EventKind::SamplingTrigger,
            Self::EventInterval(_) => EventKind::EventInterval,
            Self::TimePulseOffset(_) => EventKind::TimePulse,
            Self::GenericSignal(_) => EventKind::Generic,
        }
    }
}

/// Event kinds used as metric and log keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Accepted sampling triggers.
    SamplingTrigger,
    /// Inter-event interval reports.
    EventInterval,
    /// Accepted time-pulse offsets.
    TimePulse,
    /// Generic per-pin signals.
    Generic,
}

impl EventKind {
    /// Number of distinct kinds.
    pub const COUNT: usize = 4;

    /// All kinds, in stable index order.
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::SamplingTrigger,
        EventKind::EventInterval,
        EventKind::TimePulse,
        EventKind::Generic,
    ];

    /// Stable array index for per-kind storage.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::SamplingTrigger => 0,
            Self::EventInterval => 1,
            Self::TimePulse => 2,
            Self::Generic => 3,
        }
    }

    /// Snake-case name used in metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SamplingTrigger => "sampling_trigger",
            Self::EventInterval => "event_interval",
            Self::TimePulse => "time_pulse",
            Self::Generic => "generic",
        }
    }
}
