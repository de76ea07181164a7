//! Robust-channel fault recovery.
//!
//! After a fatal per-channel fault the hardware may have reset the whole
//! runlist, silently dropping every entry it held. Recovery re-establishes
//! the ledger invariants: each entry of a faulting channel gets its lost work
//! replaced by a bare release of its semaphore, the ring is rewritten and
//! republished, and a faulting channel with no entry gets a fresh one so its
//! recovery work is scheduled at all.

use crate::backoff::Deadline;
use crate::entry::Entry;
use crate::error::SchedError;
use crate::hw::Channel;
use crate::invariants::debug_assert_pool_matches_ledger;
use crate::scheduler::{Scheduler, SchedulerPhase, SchedulerState};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Clears the recovering flag on every exit path.
struct RecoveringFlag<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> RecoveringFlag<'a> {
    fn set(flag: &'a Mutex<Option<ThreadId>>) -> Self {
        *flag.lock().unwrap() = Some(thread::current().id());
        Self(flag)
    }
}

impl Drop for RecoveringFlag<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap() = None;
    }
}

impl Scheduler {
    /// Recover from a robust-channel fault on `channel`.
    ///
    /// A call made from inside a running recovery on the same thread
    /// (typically from `Channel::recover`) only recovers the channel object
    /// itself. Recoveries from other threads serialize on the scheduler locks.
    /// While preempted, only the channel is recovered: the snapshot is
    /// rewritten by `resubmit` anyway.
    pub fn recover<C: Channel + 'static>(&self, channel: &Arc<C>) -> Result<(), SchedError> {
        let channel: Arc<dyn Channel> = channel.clone();
        self.recover_dyn(&channel)
    }

    /// [`recover`](Self::recover) for a channel held as a trait object, such
    /// as one obtained from [`Entry::channel`].
    pub fn recover_dyn(&self, faulting: &Arc<dyn Channel>) -> Result<(), SchedError> {
        let id = faulting.id();
        if *self.recovering.lock().unwrap() == Some(thread::current().id()) {
            tracing::debug!(channel = %id, "nested recovery, channel only");
            return faulting.recover().map_err(|e| SchedError::channel(id, e));
        }

        let _flush = self.flush_lock.lock().unwrap();
        let mut st = self.lock_state();
        let _flag = RecoveringFlag::set(&self.recovering);

        faulting.recover().map_err(|e| SchedError::channel(id, e))?;
        if st.phase != SchedulerPhase::Running {
            tracing::info!(channel = %id, phase = st.phase.name(), "channel recovered while preempted");
            return Ok(());
        }

        let ring_reset = (0..self.layout.sub_devices())
            .all(|sub| self.device.ring_pointers(sub).is_reset());

        if ring_reset {
            self.replace_faulted_work_locked(&st, faulting)?;
        }
        let synthesized = !st.ledger.contains_channel(id);
        if synthesized {
            self.admit_recovery_entry_locked(&mut st, faulting, ring_reset)?;
        }
        if ring_reset {
            self.writer.rewrite(st.ledger.iter());
            let len = st.ledger.len();
            st.ring.reload(len);
            if st.ring.is_frozen() {
                st.ring.add_frozen(len);
            } else {
                self.ring_doorbell(st.ring.write_ptr());
            }
        }
        debug_assert_pool_matches_ledger!(st.pool.in_use(), st.ledger.len());
        self.state_changed.notify_all();

        tracing::info!(
            channel = %id,
            ring_reset,
            synthesized,
            outstanding = st.ledger.len(),
            "robust channel recovery complete"
        );
        if self.config.enable_metrics {
            self.metrics.add_recovery();
        }
        Ok(())
    }

    /// Swap the lost pushbuffer content of every faulting channel in the
    /// ledger for a bare semaphore release.
    fn replace_faulted_work_locked(
        &self,
        st: &SchedulerState,
        faulting: &Arc<dyn Channel>,
    ) -> Result<(), SchedError> {
        for entry in st.ledger.iter() {
            let Some(channel) = entry.channel() else {
                // The entry can never complete; keep going so the rest of
                // the ring is still rebuilt.
                tracing::warn!(channel = %entry.channel_id(), payload = entry.payload(),
                    "skipping entry of dropped channel during recovery");
                continue;
            };
            if entry.channel_id() != faulting.id() && channel.check_error().is_ok() {
                continue;
            }
            channel
                .replace_pending_work(self.layout.slot_offset(entry.semaphore_slot()), entry.payload())
                .map_err(|e| SchedError::channel(entry.channel_id(), e))?;
        }
        Ok(())
    }

    /// Admit a fresh entry for a faulting channel that had none, without
    /// waiting: recovery cannot block on the ring it is repairing.
    fn admit_recovery_entry_locked(
        &self,
        st: &mut SchedulerState,
        faulting: &Arc<dyn Channel>,
        ring_reset: bool,
    ) -> Result<(), SchedError> {
        let id = faulting.id();
        if self.free_ring_slots(st) < 2 {
            return Err(SchedError::RingFull);
        }
        let claim = faulting
            .binding()
            .claim(self.id, Deadline::after(Some(Duration::ZERO)), self.config.poll_interval)?;
        let slot = st.pool.pop().ok_or(SchedError::RingFull)?;
        let payload = st.alloc_payload();

        let offset = self.layout.slot_offset(slot);
        let emitted = faulting
            .emit_semaphore_release(offset, payload, self.config.enable_timestamps)
            .and_then(|()| faulting.flush());
        if let Err(e) = emitted {
            // State lock is held, so no scoped guard: return the slot by hand.
            st.pool.push(slot);
            return Err(SchedError::channel(id, e));
        }

        let entry = Entry::new(faulting, payload, faulting.write_progress_marker(), slot);
        claim.commit();
        tracing::debug!(channel = %id, payload, slot, "recovery entry synthesized");
        if ring_reset {
            // The caller rewrites the whole ring from the ledger.
            st.ledger.push(entry);
        } else {
            self.push_entry_locked(st, entry);
        }
        if self.config.enable_metrics {
            self.metrics.add_appended(1);
        }
        Ok(())
    }
}
