//! Module that contains the Lamport logical clock kept by every peer.

/// Lamport clock: a counter that only moves forward.
///
/// The clock is not synchronised on its own; it lives inside the peer state and
/// is only touched while that state's lock is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    value: u64,
}

impl LamportClock {
    /// Largest timestamp [`LamportClock::witness`] accepts from another peer.
    ///
    /// Half the range stays free for local ticks, so the clock cannot wrap.
    pub const LIMIT: u64 = u64::MAX / 2;

    /// Function that creates a clock starting at 0.
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Function that returns the current value without advancing it.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Function that advances the clock for a local event and returns the event's timestamp.
    pub fn tick(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    /// Function that merges a received timestamp: `max(local, received) + 1`.
    ///
    /// Returns `None` and leaves the clock untouched when `received` is above
    /// [`LamportClock::LIMIT`].
    pub fn witness(&mut self, received: u64) -> Option<u64> {
        if received > Self::LIMIT {
            return None;
        }
        self.value = self.value.max(received).checked_add(1)?;
        Some(self.value)
    }
}
