use crate::binding::SchedulerId;
use crate::entry::Entry;
use crate::error::SchedError;
use crate::hw::{Channel, DeviceControl, MemorySurface};
use crate::invariants::{debug_assert_frozen_bounded, debug_assert_ledger_bounded};
use crate::ledger::EntryLedger;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::ring::{RingState, RingWriter};
use crate::semaphore::{SemaphoreLayout, SemaphorePool, SlotReturn};
use crate::Config;
use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

// =============================================================================
// LOCKING PROTOCOL
// =============================================================================
//
// Two lock domains:
//
// - `flush_lock` serializes admissions. `append` waits for room without it,
//   then takes it, re-checks room under `state` and holds it through the
//   doorbell write, so at most one doorbell update is in flight and the
//   two-free-slot guarantee cannot be consumed by another producer. Never
//   held across an unbounded wait: `recover` and `preempt` need it.
// - `state` guards the ledger, the semaphore pool, the ring state and all
//   writes to the runlist and semaphore surfaces.
//
// Order is always flush_lock → state. `append`, `preempt` and `recover` take
// both; `retire`, `resubmit` and the freeze calls take only `state`. Channel
// bindings have their own lock, only ever taken after (or without) `state`.
//
// `state_changed` is signalled whenever slots free up, the flush-blocked
// counter drops, or the scheduler returns to `Running`.
//
// =============================================================================

/// Free ring slots `append` insists on before admitting an entry. One keeps
/// PUT != GET on a full ring, one is the slot being filled.
pub(crate) const MIN_FREE_RING_SLOTS: usize = 2;

/// Where the scheduler is in the preemption cycle.
///
/// Draining the ring (`preempt`) and reloading it (`resubmit`) each run
/// inside one hold of the state lock, so only the two resting phases are
/// ever observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Admitting and retiring normally.
    Running,
    /// Ledger moved into a snapshot; waiting for `resubmit`.
    Preempted,
}

impl SchedulerPhase {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Preempted => "preempted",
        }
    }
}

/// Everything guarded by the state lock.
pub(crate) struct SchedulerState {
    pub(crate) ledger: EntryLedger,
    pub(crate) pool: SemaphorePool,
    pub(crate) ring: RingState,
    pub(crate) phase: SchedulerPhase,
    /// Full (uncollapsed) ledger captured by the last preempt.
    pub(crate) saved: Option<Vec<Entry>>,
    pub(crate) next_payload: u64,
    /// Timestamp of the newest retired entry, per sub-device.
    pub(crate) last_timestamps: Vec<u64>,
}

impl SchedulerState {
    pub(crate) fn alloc_payload(&mut self) -> u64 {
        let payload = self.next_payload;
        self.next_payload += 1;
        payload
    }
}

/// Runlist scheduler for one engine.
///
/// Constructed explicitly by the owning device object and shared by `Arc`
/// (or reference) with every submitting thread; there is no global instance.
pub struct Scheduler {
    pub(crate) id: SchedulerId,
    pub(crate) config: Config,
    pub(crate) device: Arc<dyn DeviceControl>,
    pub(crate) writer: RingWriter,
    pub(crate) semaphores: Arc<dyn MemorySurface>,
    pub(crate) layout: SemaphoreLayout,
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) state_changed: Condvar,
    pub(crate) flush_blocked: CachePadded<AtomicUsize>,
    /// Thread currently inside `recover`, if any.
    pub(crate) recovering: Mutex<Option<ThreadId>>,
    pub(crate) metrics: Metrics,
}

impl Scheduler {
    /// Creates a scheduler over pre-allocated runlist and semaphore surfaces.
    ///
    /// `runlist` must hold `capacity` records and `semaphores` one region of
    /// `capacity` records per sub-device (see [`SemaphoreLayout`]).
    pub fn new(
        config: Config,
        device: Arc<dyn DeviceControl>,
        runlist: Arc<dyn MemorySurface>,
        semaphores: Arc<dyn MemorySurface>,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        let capacity = config.capacity();
        let sub_devices = device.sub_device_count();
        if sub_devices == 0 {
            return Err(SchedError::InvalidConfig(
                "device reports no sub-devices".into(),
            ));
        }

        let layout = SemaphoreLayout::new(capacity, sub_devices);
        if semaphores.len() < layout.required_len() {
            return Err(SchedError::InvalidConfig(format!(
                "semaphore surface is {} bytes, {sub_devices} sub-devices x {capacity} slots need {}",
                semaphores.len(),
                layout.required_len()
            )));
        }
        let writer = RingWriter::new(runlist, capacity)?;

        let id = SchedulerId::next();
        tracing::debug!(?id, capacity, sub_devices, "runlist scheduler created");

        Ok(Self {
            id,
            config,
            device,
            writer,
            semaphores,
            layout,
            flush_lock: Mutex::new(()),
            state: Mutex::new(SchedulerState {
                ledger: EntryLedger::new(config.usable_entries()),
                pool: SemaphorePool::new(capacity),
                ring: RingState::new(capacity),
                phase: SchedulerPhase::Running,
                saved: None,
                next_payload: 1,
                last_timestamps: vec![0; sub_devices],
            }),
            state_changed: Condvar::new(),
            flush_blocked: CachePadded::new(AtomicUsize::new(0)),
            recovering: Mutex::new(None),
            metrics: Metrics::new(),
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runlist capacity in entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Semaphore surface layout, for collaborators that write releases.
    #[inline]
    pub fn semaphore_layout(&self) -> SemaphoreLayout {
        self.layout
    }

    /// Number of outstanding (admitted, not yet retired) entries.
    pub fn len(&self) -> usize {
        self.lock_state().ledger.len()
    }

    /// Returns true if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.lock_state().ledger.is_empty()
    }

    /// Copy of the ledger, oldest first.
    pub fn entries(&self) -> Vec<Entry> {
        self.lock_state().ledger.snapshot()
    }

    /// Semaphore slots currently free.
    pub fn free_semaphore_slots(&self) -> usize {
        self.lock_state().pool.free_len()
    }

    /// Current runlist write pointer.
    pub fn write_ptr(&self) -> u32 {
        self.lock_state().ring.write_ptr()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.lock_state().phase
    }

    /// Returns true while the channel has an outstanding entry here.
    pub fn is_admitted(&self, channel: &dyn Channel) -> bool {
        self.lock_state().ledger.contains_channel(channel.id())
    }

    /// Get metrics snapshot if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ---------------------------------------------------------------------
    // INTERNALS SHARED BY THE COMPONENT MODULES
    // ---------------------------------------------------------------------

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn check_channel(&self, channel: &Arc<dyn Channel>) -> Result<(), SchedError> {
        channel
            .check_error()
            .map_err(|e| SchedError::channel(channel.id(), e))
    }

    /// Publish `put` to the hardware. Caller holds the state lock.
    pub(crate) fn ring_doorbell(&self, put: u32) {
        self.device.ring_doorbell(put);
        if self.config.enable_metrics {
            self.metrics.add_doorbell();
        }
    }

    /// Encode `entry` at the write pointer, advance it, then publish or defer.
    pub(crate) fn push_entry_locked(&self, st: &mut SchedulerState, entry: Entry) {
        self.writer.write(st.ring.write_ptr(), &entry);
        st.ledger.push(entry);
        st.ring.advance();

        debug_assert_ledger_bounded!(st.ledger.len(), self.config.usable_entries());

        if st.ring.is_frozen() {
            st.ring.add_frozen(1);
            debug_assert_frozen_bounded!(st.ring.frozen_count(), st.ledger.len());
        } else {
            self.ring_doorbell(st.ring.write_ptr());
        }
    }

    /// Drop the channel back-reference held by `entry`.
    pub(crate) fn release_binding(&self, entry: &Entry) {
        match entry.channel() {
            Some(channel) => channel.binding().release(self.id),
            None => tracing::warn!(
                channel = %entry.channel_id(),
                payload = entry.payload(),
                "channel dropped while its entry was outstanding"
            ),
        }
    }

    pub(crate) fn free_ring_slots(&self, st: &SchedulerState) -> usize {
        self.capacity() - st.ledger.len()
    }
}

impl SlotReturn for Scheduler {
    fn return_slot(&self, slot: u32) {
        let mut st = self.lock_state();
        st.pool.push(slot);
        self.state_changed.notify_all();
    }
}

// Note: Scheduler intentionally does NOT implement Clone. Share it by Arc;
// a second instance over the same surfaces would fight over the runlist.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::hw::RingPointers;
    use crate::surface::HostSurface;

    struct OneSub;

    impl DeviceControl for OneSub {
        fn sub_device_count(&self) -> usize {
            1
        }
        fn ring_doorbell(&self, _: u32) {}
        fn ring_pointers(&self, _: usize) -> RingPointers {
            RingPointers::default()
        }
        fn preempt(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn surfaces(ring: usize, sema: usize) -> (Arc<dyn MemorySurface>, Arc<dyn MemorySurface>) {
        (
            Arc::new(HostSurface::new(ring, 0x1000)),
            Arc::new(HostSurface::new(sema, 0x2000)),
        )
    }

    #[test]
    fn test_new_checks_surface_sizes() {
        let config = Config::new(2, false, false);
        let (ring, sema) = surfaces(4 * crate::RING_ENTRY_SIZE, 4 * crate::SEMAPHORE_RECORD_SIZE);
        let s = Scheduler::new(config, Arc::new(OneSub), ring, sema).unwrap();
        assert_eq!(s.capacity(), 4);
        assert!(s.is_empty());
        assert_eq!(s.free_semaphore_slots(), 4);
        assert_eq!(s.phase(), SchedulerPhase::Running);

        let (ring, sema) = surfaces(4 * crate::RING_ENTRY_SIZE, 8);
        assert!(matches!(
            Scheduler::new(config, Arc::new(OneSub), ring, sema),
            Err(SchedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_slot_return_notifies_pool() {
        let config = Config::new(2, false, false);
        let (ring, sema) = surfaces(4 * crate::RING_ENTRY_SIZE, 4 * crate::SEMAPHORE_RECORD_SIZE);
        let s = Scheduler::new(config, Arc::new(OneSub), ring, sema).unwrap();
        let slot = s.lock_state().pool.pop().unwrap();
        assert_eq!(s.free_semaphore_slots(), 3);
        s.return_slot(slot);
        assert_eq!(s.free_semaphore_slots(), 4);
    }
}
