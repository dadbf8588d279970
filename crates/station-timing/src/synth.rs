//! Absolute timestamp synthesis for time-pulse edges.
//!
//! A time-pulse edge arrives with nothing but a tick count. The published
//! clock model predicts the tick counter's offset from the wall clock at
//! that tick; adding the prediction to the tick and re-anchoring at the
//! program epoch yields an absolute UTC timestamp, from which the offset
//! between the pulse and the system clock is derived.

use std::time::Duration;

use crate::cell::ClockSnapshot;

/// Synthesized absolute time of a pulse edge.
///
/// `nanoseconds` is deliberately left unnormalized: the sub-second terms
/// (tick remainder, epoch remainder, fractional correction) are summed
/// without carrying into `unix_seconds`, and the offset computation
/// consumes the raw sum. Values above 10^9 are therefore legitimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTimestamp {
    /// Whole seconds since the Unix epoch.
    pub unix_seconds: i64,
    /// Sub-second part in nanoseconds, possibly >= 10^9.
    pub nanoseconds: i64,
    /// Pulse time minus system time, in microseconds.
    pub offset_us: f64,
}

/// Synthesize the absolute time of the edge at `extended_tick`.
///
/// `epoch_ms` is the program start in milliseconds since the Unix epoch
/// (ticks count from program start). `system_seconds` is the wall clock
/// read taken when the edge was processed; only its whole-second part
/// enters the offset, the synthesized sub-second value stands in for the
/// rest. Returns `None` when the resulting offset falls outside
/// `sanity_bound`, which happens while the model is still converging.
#[must_use]
pub fn synthesize(
    extended_tick: u64,
    snapshot: &ClockSnapshot,
    epoch_ms: i64,
    system_seconds: i64,
    sanity_bound: Duration,
) -> Option<PulseTimestamp> {
    let dx = (i128::from(extended_tick) - i128::from(snapshot.reference_tick)) as f64;
    let mean_diff = snapshot.model.intercept + snapshot.model.slope * dx;

    let int_part = mean_diff as i64;
    let frac_part = mean_diff - int_part as f64;

    let timestamp_us = extended_tick as i64 + int_part;
    let unix_seconds = timestamp_us / 1_000_000 + epoch_ms / 1000;
    let nanoseconds = (timestamp_us % 1_000_000) * 1000
        + (epoch_ms % 1000) * 1_000_000
        + (1000.0 * frac_part) as i64;

    let offset_s = (unix_seconds - system_seconds) as f64 + nanoseconds as f64 * 1e-9;
    if offset_s.abs() >= sanity_bound.as_secs_f64() {
        return None;
    }

    Some(PulseTimestamp {
        unix_seconds,
        nanoseconds,
        offset_us: offset_s * 1e6,
    })
}
