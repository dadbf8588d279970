//! 32-bit tick counter extension.

/// Tracks wraparound of the 32-bit hardware tick counter and produces a
/// cumulative 64-bit extended tick.
///
/// Must be fed ticks sampled in order from a single source (the clock
/// measurement cycle). If two consecutive samples are more than one full
/// wraparound (~71.6 minutes of µs ticks) apart, the extension
/// undercounts; that is a documented assumption of the measurement
/// interval, not an enforced invariant.
#[derive(Debug, Default)]
pub struct TickExtender {
    last_raw: u32,
    overflow_count: u64,
}

impl TickExtender {
    /// Create an extender with no observed wraparounds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `raw_tick` on the 64-bit extended timeline.
    pub fn extend(&mut self, raw_tick: u32) -> u64 {
        if raw_tick < self.last_raw {
            self.overflow_count += 1 << 32;
        }
        self.last_raw = raw_tick;
        self.overflow_count + u64::from(raw_tick)
    }

    /// Cumulative wraparound amount (a multiple of 2^32).
    #[must_use]
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }
}
