//! Sliding-window linear regression of wall-clock offset against ticks.
//!
//! The GPIO tick counter and the system clock drift apart slowly; a
//! least-squares line over the recent (tick, offset) history captures
//! both the accumulated offset and the dilation rate. The fit is
//! recomputed from scratch every measurement cycle and fully replaces
//! the previous model.

use serde::Serialize;

/// Linear model mapping extended ticks to wall-clock offset.
///
/// `slope` is microseconds of offset change per tick; `intercept` is the
/// predicted offset at the reference tick of the fit (the most recent
/// sample), not at tick zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ClockModel {
    /// Offset change per tick.
    pub slope: f64,
    /// Predicted offset at the reference tick, in microseconds.
    pub intercept: f64,
}

/// Fixed-capacity ring of (extended tick, offset) samples.
#[derive(Debug)]
pub struct RegressionBuffer {
    ticks: Box<[u64]>,
    offsets: Box<[i64]>,
    write_pos: usize,
    len: usize,
}

impl RegressionBuffer {
    /// Create a buffer holding up to `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            ticks: vec![0_u64; cap].into_boxed_slice(),
            offsets: vec![0_i64; cap].into_boxed_slice(),
            write_pos: 0,
            len: 0,
        }
    }

    /// Append a sample, overwriting the oldest once full.
    pub fn push(&mut self, extended_tick: u64, offset_us: i64) {
        self.ticks[self.write_pos] = extended_tick;
        self.offsets[self.write_pos] = offset_us;
        self.write_pos = (self.write_pos + 1) % self.ticks.len();
        self.len = self.len.saturating_add(1).min(self.ticks.len());
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no samples have been pushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ticks.len()
    }

    /// Extended tick of the most recently pushed sample.
    #[must_use]
    pub fn reference_tick(&self) -> Option<u64> {
        if self.len == 0 {
            None
        } else {
            Some(self.ticks[self.newest_index()])
        }
    }

    fn newest_index(&self) -> usize {
        (self.write_pos + self.ticks.len() - 1) % self.ticks.len()
    }

    /// Ordinary least-squares fit of offset against tick.
    ///
    /// Every sample is translated by the most recent sample's (tick,
    /// offset) before summing; window spans are far below 2^53 ticks, so
    /// the translated sums stay exactly representable in f64 where the
    /// raw 64-bit tick magnitudes would not. The returned intercept is
    /// the predicted offset at [`reference_tick`](Self::reference_tick).
    ///
    /// Fewer than 3 samples, or zero tick variance, yield the neutral
    /// `{slope: 0, intercept: 0}` model.
    #[must_use]
    pub fn fit(&self) -> ClockModel {
        if self.len < 3 {
            return ClockModel::default();
        }

        let ref_tick = self.ticks[self.newest_index()];
        let ref_offset = self.offsets[self.newest_index()];

        let n = self.len as f64;
        let mut sum_x = 0.0_f64;
        let mut sum_xx = 0.0_f64;
        let mut sum_xy = 0.0_f64;
        let mut sum_y = 0.0_f64;

        for i in 0..self.len {
            let x = (i128::from(self.ticks[i]) - i128::from(ref_tick)) as f64;
            let y = (self.offsets[i] - ref_offset) as f64;
            sum_x += x;
            sum_xx += x * x;
            sum_xy += x * y;
            sum_y += y;
        }

        let denom = n * sum_xx - sum_x * sum_x;
        if denom == 0.0 {
            return ClockModel::default();
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let b = (sum_y * sum_xx - sum_x * sum_xy) / denom;

        ClockModel {
            slope,
            intercept: b + ref_offset as f64,
        }
    }
}
