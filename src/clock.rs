//! Virtual time for replay sessions

use std::time::Duration;

/// Simulated replay clock, comparable against event timestamps.
///
/// Tracked in fractional milliseconds: with a sub-unit speed multiplier
/// a single tick advances the clock by less than a millisecond, and an
/// integer clock would stall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualClock {
    current_ms: f64,
}

impl VirtualClock {
    /// Clock positioned at the given timestamp
    pub fn at(timestamp_ms: u64) -> Self {
        Self {
            current_ms: timestamp_ms as f64,
        }
    }

    /// Reposition the clock at a timestamp (rewind/jump)
    pub fn reset_to(&mut self, timestamp_ms: u64) {
        self.current_ms = timestamp_ms as f64;
    }

    /// Advance one tick: `speed * tick` of virtual time
    pub fn advance(&mut self, speed: f64, tick: Duration) {
        self.current_ms += speed * tick.as_secs_f64() * 1_000.0;
    }

    /// Current virtual time in milliseconds
    pub fn current(&self) -> f64 {
        self.current_ms
    }

    /// Whether an event with this timestamp is due for emission
    pub fn is_due(&self, timestamp_ms: u64) -> bool {
        timestamp_ms as f64 <= self.current_ms
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::at(0)
    }
}
