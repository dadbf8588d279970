//! Clock measurement thread.
//!
//! Owns the driver's tick-source handle and periodically pairs counter
//! reads with the system clock, feeding the regression and publishing
//! every refreshed model through the shared cell. Measurement failures
//! are counted; after too many in a row the thread stops itself rather
//! than keep hammering a dead tick source. The last published model
//! stays in effect either way.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use station_common::config::ClockConfig;
use station_timing::calibrate::{ClockCalibrator, ProgramEpoch};
use station_timing::cell::ClockModelCell;
use station_timing::TickSource;

/// Consecutive measurement failures after which the thread gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Granularity of the interruptible sleep between measurements.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Model refreshes between "model refreshed" log lines.
const LOG_EVERY_CYCLES: u64 = 600;

/// Handle to the measurement thread.
pub struct CalibrationThread {
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl CalibrationThread {
    /// Spawn the measurement loop on a named thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        config: &ClockConfig,
        cell: Arc<ClockModelCell>,
        epoch: ProgramEpoch,
        source: Box<dyn TickSource + Send>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let cycles = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let mut calibrator = ClockCalibrator::new(config, cell, epoch);
        let interval = config.measurement_interval;
        let thread_running = Arc::clone(&running);
        let thread_cycles = Arc::clone(&cycles);
        let thread_failures = Arc::clone(&failures);

        let handle = thread::Builder::new()
            .name("clock-cal".into())
            .spawn(move || {
                measurement_loop(
                    &mut calibrator,
                    source.as_ref(),
                    interval,
                    &thread_running,
                    &thread_cycles,
                    &thread_failures,
                );
            })?;

        Ok(Self {
            running,
            cycles,
            failures,
            handle: Some(handle),
        })
    }

    /// Completed measurement cycles, shared with diagnostics.
    #[must_use]
    pub fn cycles(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.cycles)
    }

    /// Failed measurement cycles, shared with diagnostics.
    #[must_use]
    pub fn failures(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.failures)
    }

    /// True while the measurement loop is live. The loop clears this
    /// itself when it hits the failure cutoff.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Calibration thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CalibrationThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn measurement_loop(
    calibrator: &mut ClockCalibrator,
    source: &dyn TickSource,
    interval: Duration,
    running: &AtomicBool,
    cycles: &AtomicU64,
    failures: &AtomicU64,
) {
    info!(
        interval_ms = interval.as_millis() as u64,
        "Calibration thread started"
    );
    let mut consecutive = 0u32;

    while running.load(Ordering::Relaxed) {
        match calibrator.measure_once(source) {
            Ok(model) => {
                consecutive = 0;
                cycles.fetch_add(1, Ordering::Relaxed);
                if calibrator.cycles() % LOG_EVERY_CYCLES == 0 {
                    info!(
                        slope = model.slope,
                        intercept_us = model.intercept,
                        samples = calibrator.sample_count(),
                        "Clock model refreshed"
                    );
                }
            }
            Err(e) => {
                consecutive += 1;
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, consecutive, "Clock measurement failed");
                if consecutive >= MAX_CONSECUTIVE_FAILURES {
                    error!(
                        failures = consecutive,
                        "Tick source unusable, stopping calibration thread"
                    );
                    running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
        sleep_with_stop(interval, running);
    }

    info!(
        cycles = cycles.load(Ordering::Relaxed),
        "Calibration thread stopped"
    );
}

/// Sleep in short slices so stop requests are honored promptly.
fn sleep_with_stop(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}
