use crate::SchedError;
use std::time::Duration;

/// Largest supported ring, in address bits (64K entries).
pub const MAX_RING_BITS: u8 = 16;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Ring size as power of 2 (default: 6 = 64 entries)
    pub ring_bits: u8,
    /// Ask channels to stamp a completion timestamp next to each payload,
    /// and verify completion order against it
    pub enable_timestamps: bool,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
    /// Upper bound on a single condvar sleep while `append` waits for slots.
    /// Channel errors and completions are re-checked at least this often.
    pub poll_interval: Duration,
    /// Bound on the blocking waits inside `append`. `None` waits forever.
    pub flush_timeout: Option<Duration>,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(ring_bits: u8, enable_timestamps: bool, enable_metrics: bool) -> Self {
        Self {
            ring_bits,
            enable_timestamps,
            enable_metrics,
            poll_interval: Duration::from_millis(1),
            flush_timeout: None,
        }
    }

    /// Returns the number of ring entries (and semaphore slots).
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_bits
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }

    /// Most entries the ring may hold at once. One slot always stays empty so
    /// that `get == put` unambiguously means "idle".
    #[inline]
    pub const fn usable_entries(&self) -> usize {
        self.capacity() - 1
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the flush timeout.
    pub fn with_flush_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Enables or disables completion timestamps.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.enable_timestamps = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SchedError> {
        if self.ring_bits == 0 || self.ring_bits > MAX_RING_BITS {
            return Err(SchedError::InvalidConfig(format!(
                "ring_bits must be in 1..={MAX_RING_BITS}, got {}",
                self.ring_bits
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SchedError::InvalidConfig(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(6, false, false)
    }
}

/// Small ring (16 entries) that keeps queueing delay short.
pub const LOW_LATENCY_CONFIG: Config = Config::new(4, false, false);

/// Timestamped completions with ordering verification and metrics.
pub const VERIFIED_CONFIG: Config = Config::new(8, true, true);
