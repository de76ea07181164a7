use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler counters. Recorded only when `Config::enable_metrics` is set.
///
/// The admission and retirement counters are bumped from different threads,
/// so they live on separate cache lines.
#[derive(Debug, Default)]
pub struct Metrics {
    entries_appended: CachePadded<AtomicU64>,
    entries_retired: CachePadded<AtomicU64>,
    doorbell_writes: AtomicU64,
    frozen_publications: AtomicU64,
    flush_waits: AtomicU64,
    preemptions: AtomicU64,
    recoveries: AtomicU64,
}

/// Plain copy of [`Metrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub entries_appended: u64,
    pub entries_retired: u64,
    pub doorbell_writes: u64,
    pub frozen_publications: u64,
    pub flush_waits: u64,
    pub preemptions: u64,
    pub recoveries: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_appended(&self, n: u64) {
        self.entries_appended.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_retired(&self, n: u64) {
        self.entries_retired.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_doorbell(&self) {
        self.doorbell_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_frozen_publication(&self) {
        self.frozen_publications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_flush_wait(&self) {
        self.flush_waits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_appended: self.entries_appended.load(Ordering::Relaxed),
            entries_retired: self.entries_retired.load(Ordering::Relaxed),
            doorbell_writes: self.doorbell_writes.load(Ordering::Relaxed),
            frozen_publications: self.frozen_publications.load(Ordering::Relaxed),
            flush_waits: self.flush_waits.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}
