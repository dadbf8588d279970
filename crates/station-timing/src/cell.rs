//! Lock-free publication of the current clock model.
//!
//! The calibration thread refits and republishes the model every
//! measurement cycle; the GPIO callback path reads it when synthesizing
//! a time-pulse timestamp. A seqlock keeps the reader wait-free with no
//! allocation: the writer bumps the version to odd, stores the fields,
//! then bumps to even; readers retry until they observe a stable even
//! version on both sides of the field loads.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::regression::ClockModel;

/// A consistent view of the published model and its reference tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    /// Fitted model, anchored at `reference_tick`.
    pub model: ClockModel,
    /// Extended tick the intercept is anchored at.
    pub reference_tick: u64,
}

impl ClockSnapshot {
    /// Neutral snapshot published before the first fit completes.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            model: ClockModel::default(),
            reference_tick: 0,
        }
    }
}

/// Seqlock cell holding the latest `ClockSnapshot`.
///
/// One writer (the calibration thread), any number of readers. Floats
/// travel through the atomics as raw bits.
#[derive(Debug)]
pub struct ClockModelCell {
    version: CachePadded<AtomicU64>,
    slope_bits: AtomicU64,
    intercept_bits: AtomicU64,
    reference_tick: AtomicU64,
}

impl Default for ClockModelCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockModelCell {
    /// Create a cell holding the neutral model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: CachePadded::new(AtomicU64::new(0)),
            slope_bits: AtomicU64::new(0.0_f64.to_bits()),
            intercept_bits: AtomicU64::new(0.0_f64.to_bits()),
            reference_tick: AtomicU64::new(0),
        }
    }

    /// Publish a new model. Single-writer only.
    pub fn publish(&self, model: ClockModel, reference_tick: u64) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.slope_bits.store(model.slope.to_bits(), Ordering::Relaxed);
        self.intercept_bits
            .store(model.intercept.to_bits(), Ordering::Relaxed);
        self.reference_tick.store(reference_tick, Ordering::Relaxed);

        self.version.store(v.wrapping_add(2), Ordering::Release);
    }

    /// Read a consistent snapshot, retrying across concurrent writes.
    #[must_use]
    pub fn snapshot(&self) -> ClockSnapshot {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            let slope = f64::from_bits(self.slope_bits.load(Ordering::Relaxed));
            let intercept = f64::from_bits(self.intercept_bits.load(Ordering::Relaxed));
            let reference_tick = self.reference_tick.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Relaxed);
            if v1 == v2 {
                return ClockSnapshot {
                    model: ClockModel { slope, intercept },
                    reference_tick,
                };
            }
        }
    }
}
