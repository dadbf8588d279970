//! Periodic clock calibration against the GPIO tick counter.
//!
//! Each cycle brackets a tick read between two wall-clock reads, charges
//! half the round trip to the tick read, and records the difference
//! between the wall clock (re-anchored at the program epoch) and the
//! extended tick. The refitted model is published after every sample so
//! the edge path always sees the newest estimate, converging or not.

use std::sync::Arc;

use tracing::trace;

use station_common::config::ClockConfig;
use station_common::error::{StationError, StationResult};

use crate::cell::ClockModelCell;
use crate::overflow::TickExtender;
use crate::regression::{ClockModel, RegressionBuffer};

/// Source of the raw 32-bit hardware tick counter.
pub trait TickSource {
    /// Read the current tick register.
    fn current_tick(&self) -> StationResult<u32>;
}

/// Read `CLOCK_REALTIME` as (seconds, nanoseconds).
#[cfg(target_os = "linux")]
pub fn wall_clock_now() -> StationResult<(i64, i64)> {
    let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_REALTIME)
        .map_err(|e| StationError::IoError(format!("clock_gettime failed: {e}")))?;
    Ok((i64::from(ts.tv_sec()), i64::from(ts.tv_nsec())))
}

/// Read the system clock as (seconds, nanoseconds).
#[cfg(not(target_os = "linux"))]
pub fn wall_clock_now() -> StationResult<(i64, i64)> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| StationError::IoError(format!("system clock before epoch: {e}")))?;
    Ok((now.as_secs() as i64, i64::from(now.subsec_nanos())))
}

/// Program start time, the zero point shared by ticks and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramEpoch {
    millis: i64,
}

impl ProgramEpoch {
    /// Capture the current wall clock as the epoch.
    pub fn now() -> StationResult<Self> {
        let (sec, nsec) = wall_clock_now()?;
        Ok(Self {
            millis: sec * 1000 + nsec / 1_000_000,
        })
    }

    /// Epoch from a known millisecond value, for tests and replay.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.millis
    }
}

/// Owns the sample history and drives the fit/publish cycle.
///
/// Lives on the calibration thread; everything downstream reads the
/// shared [`ClockModelCell`] instead of touching this struct.
pub struct ClockCalibrator {
    extender: TickExtender,
    buffer: RegressionBuffer,
    cell: Arc<ClockModelCell>,
    epoch: ProgramEpoch,
    cycles: u64,
}

impl ClockCalibrator {
    /// Create a calibrator publishing into `cell`.
    #[must_use]
    pub fn new(config: &ClockConfig, cell: Arc<ClockModelCell>, epoch: ProgramEpoch) -> Self {
        Self {
            extender: TickExtender::new(),
            buffer: RegressionBuffer::new(config.buffer_size),
            cell,
            epoch,
            cycles: 0,
        }
    }

    /// Run one measurement cycle against `source`.
    ///
    /// The tick read sits between two wall-clock reads; half the round
    /// trip approximates the delay before the tick was latched.
    pub fn measure_once(&mut self, source: &dyn TickSource) -> StationResult<ClockModel> {
        let (sec1, nsec1) = wall_clock_now()?;
        let raw_tick = source.current_tick()?;
        let (sec2, nsec2) = wall_clock_now()?;

        let rtt_ns = (sec2 - sec1) * 1_000_000_000 + (nsec2 - nsec1);
        let dt_us = rtt_ns / 2000;

        let measured_us = (sec1 * 1000 - self.epoch.millis) * 1000 + nsec1 / 1000 + dt_us;
        Ok(self.record_sample(raw_tick, measured_us))
    }

    /// Record one (tick, wall-clock) pair and republish the fit.
    ///
    /// `measured_us_since_epoch` is the wall-clock reading of the tick
    /// instant, in microseconds since the program epoch.
    pub fn record_sample(&mut self, raw_tick: u32, measured_us_since_epoch: i64) -> ClockModel {
        let extended = self.extender.extend(raw_tick);
        let offset_us = measured_us_since_epoch - extended as i64;

        self.buffer.push(extended, offset_us);
        let model = self.buffer.fit();
        self.cell.publish(model, extended);
        self.cycles += 1;

        trace!(
            tick = extended,
            offset_us,
            slope = model.slope,
            "clock sample recorded"
        );
        model
    }

    /// Completed measurement cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Samples currently in the regression window.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }

    /// The epoch this calibrator anchors measurements at.
    #[must_use]
    pub fn epoch(&self) -> ProgramEpoch {
        self.epoch
    }
}
