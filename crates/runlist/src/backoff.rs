use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Adaptive backoff for polling loops (Crossbeam-style).
///
/// Progressively increases wait time: spin with PAUSE → yield to OS → sleep.
/// Unlike a lock-free retry loop, a drain wait never gives up on its own;
/// the caller bounds it with a [`Deadline`].
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    max_sleep: Duration,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6; // 2^6 = 64 spins max before yielding
    const YIELD_LIMIT: u32 = 10; // Then start sleeping

    /// Creates a new backoff whose sleeps never exceed `max_sleep`.
    #[inline]
    pub fn new(max_sleep: Duration) -> Self {
        Self { step: 0, max_sleep }
    }

    /// One wait step: spin, then yield, then sleep with doubling duration.
    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                hint::spin_loop();
            }
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exp = (self.step - Self::YIELD_LIMIT).min(10);
            let sleep = Duration::from_micros(10 << exp).min(self.max_sleep);
            thread::sleep(sleep);
        }
        self.step = self.step.saturating_add(1);
    }

    /// Returns `true` once the backoff has moved past spinning and yielding.
    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    /// Reset after progress was made.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/// Absolute end of a caller-bounded wait. `None` timeout means no end.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub(crate) fn expired(&self) -> bool {
        self.0.is_some_and(|end| Instant::now() >= end)
    }

    /// Time left, capped at `cap`. `None` once expired.
    pub(crate) fn remaining(&self, cap: Duration) -> Option<Duration> {
        match self.0 {
            None => Some(cap),
            Some(end) => {
                let left = end.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    None
                } else {
                    Some(left.min(cap))
                }
            }
        }
    }
}
