//! Admission path: `append`, freezing and deferred doorbell publication.

use crate::backoff::Deadline;
use crate::entry::Entry;
use crate::error::SchedError;
use crate::hw::Channel;
use crate::invariants::debug_assert_pool_matches_ledger;
use crate::reaper::outstanding_channels;
use crate::scheduler::{Scheduler, SchedulerPhase, SchedulerState, MIN_FREE_RING_SLOTS};
use crate::semaphore::SlotGuard;
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Scheduler {
    // ---------------------------------------------------------------------
    // APPEND
    // ---------------------------------------------------------------------

    /// Admit one unit of the channel's pending work onto the runlist.
    ///
    /// Blocks while the channel still has entries on another scheduler,
    /// while fewer than two ring slots are free, while flushes are blocked,
    /// and while the scheduler is preempted. All of these waits share one
    /// `Config::flush_timeout` budget; on timeout nothing has been admitted,
    /// though completed entries may have been retired while waiting.
    ///
    /// The channel is told to release this entry's semaphore after its
    /// pending work, then flushed; the entry is then written at the write
    /// pointer and the doorbell rung (or deferred while frozen).
    pub fn append<C: Channel + 'static>(&self, channel: &Arc<C>) -> Result<(), SchedError> {
        let channel: Arc<dyn Channel> = channel.clone();
        self.append_dyn(&channel)
    }

    /// [`append`](Self::append) for a channel held as a trait object.
    pub fn append_dyn(&self, channel: &Arc<dyn Channel>) -> Result<(), SchedError> {
        let id = channel.id();
        self.check_channel(channel)?;

        let deadline = Deadline::after(self.config.flush_timeout);
        let claim = channel
            .binding()
            .claim(self.id, deadline, self.config.poll_interval)?;

        // The slot wait runs without the flush lock so `recover` and
        // `preempt` can get in; room is re-checked once both locks are held.
        let (_flush, payload, slot) = loop {
            self.wait_for_room(channel, deadline)?;
            let flush = self.flush_lock.lock().unwrap();
            let mut st = self.lock_state();
            if self.has_room_locked(&mut st) {
                let slot = st.pool.pop().ok_or(SchedError::RingFull)?;
                break (flush, st.alloc_payload(), slot);
            }
        };
        let slot = SlotGuard::new(self, slot);

        let offset = self.layout.slot_offset(slot.slot());
        channel
            .emit_semaphore_release(offset, payload, self.config.enable_timestamps)
            .map_err(|e| SchedError::channel(id, e))?;
        channel.flush().map_err(|e| SchedError::channel(id, e))?;
        self.check_channel(channel)?;
        let marker = channel.write_progress_marker();

        let mut st = self.lock_state();
        let entry = Entry::new(channel, payload, marker, slot.commit());
        claim.commit();
        tracing::debug!(
            channel = %id,
            payload,
            slot = entry.semaphore_slot(),
            pos = st.ring.write_ptr(),
            frozen = st.ring.is_frozen(),
            "runlist append"
        );
        self.push_entry_locked(&mut st, entry);
        debug_assert_pool_matches_ledger!(st.pool.in_use(), st.ledger.len());

        if self.config.enable_metrics {
            self.metrics.add_appended(1);
        }
        Ok(())
    }

    /// Retire what has completed, then report whether an entry may be
    /// admitted right now.
    fn has_room_locked(&self, st: &mut SchedulerState) -> bool {
        if st.phase != SchedulerPhase::Running || self.flush_blocked.load(Ordering::Acquire) > 0 {
            return false;
        }
        self.retire_locked(st);
        self.free_ring_slots(st) >= MIN_FREE_RING_SLOTS
    }

    /// Wait until an entry looks admissible. Fails fast when the appending
    /// channel or any channel with an outstanding entry reports an error:
    /// a faulted channel can stall the ring until it is recovered.
    fn wait_for_room(&self, channel: &Arc<dyn Channel>, deadline: Deadline) -> Result<(), SchedError> {
        let mut waited = false;
        let mut st = self.lock_state();
        loop {
            if self.has_room_locked(&mut st) {
                return Ok(());
            }

            let outstanding = outstanding_channels(st.ledger.iter());
            drop(st);
            self.check_channel(channel)?;
            for other in &outstanding {
                self.check_channel(other)?;
            }

            if !waited {
                waited = true;
                tracing::debug!(channel = %channel.id(), "append waiting for runlist room");
                if self.config.enable_metrics {
                    self.metrics.add_flush_wait();
                }
            }

            st = self.lock_state();
            let Some(wait) = deadline.remaining(self.config.poll_interval) else {
                return Err(SchedError::Timeout {
                    waiting_for: "free runlist slots",
                });
            };
            st = self.state_changed.wait_timeout(st, wait).unwrap().0;
        }
    }

    // ---------------------------------------------------------------------
    // FLUSH BLOCKING
    // ---------------------------------------------------------------------

    /// Pause all admissions until the returned guard is dropped.
    ///
    /// Guards nest: appends resume when the last one is gone.
    pub fn block_flushes(&self) -> FlushBlock<'_> {
        self.flush_blocked.fetch_add(1, Ordering::AcqRel);
        FlushBlock { scheduler: self }
    }

    /// Number of live [`FlushBlock`] guards.
    pub fn flush_block_count(&self) -> usize {
        self.flush_blocked.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // FREEZING
    // ---------------------------------------------------------------------

    /// Stop publishing new entries; they are written to memory but the
    /// doorbell stays put until [`publish_frozen`](Self::publish_frozen) or
    /// [`unfreeze`](Self::unfreeze).
    pub fn freeze(&self) {
        self.lock_state().ring.set_frozen(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.lock_state().ring.is_frozen()
    }

    /// Entries written but not yet doorbelled.
    pub fn frozen_count(&self) -> usize {
        self.lock_state().ring.frozen_count()
    }

    /// Publish up to `max` of the oldest unpublished entries with one
    /// doorbell write. Returns how many were published.
    pub fn publish_frozen(&self, max: usize) -> usize {
        let mut st = self.lock_state();
        self.publish_frozen_locked(&mut st, max)
    }

    /// Publish every pending entry in one doorbell write, then clear the
    /// frozen flag.
    pub fn unfreeze(&self) -> usize {
        let mut st = self.lock_state();
        let pending = st.ring.frozen_count();
        let published = self.publish_frozen_locked(&mut st, pending);
        st.ring.set_frozen(false);
        published
    }

    fn publish_frozen_locked(&self, st: &mut SchedulerState, max: usize) -> usize {
        let n = max.min(st.ring.frozen_count());
        if n == 0 {
            return 0;
        }

        // Unpublished entries are the newest `frozen_count` in the ledger.
        let len = st.ledger.len();
        let first = len - st.ring.frozen_count();
        for index in first..first + n {
            if let Some(entry) = st.ledger.get(index) {
                self.writer.verify(st.ring.behind(len - index), entry);
            }
        }

        st.ring.take_frozen(n);
        let put = st.ring.published_ptr();
        self.ring_doorbell(put);
        tracing::debug!(published = n, put, still_frozen = st.ring.frozen_count(), "frozen entries published");
        if self.config.enable_metrics {
            self.metrics.add_frozen_publication();
        }
        n
    }
}

/// RAII pause of all admissions on one scheduler. See
/// [`Scheduler::block_flushes`].
#[must_use = "admissions resume as soon as the guard is dropped"]
pub struct FlushBlock<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for FlushBlock<'_> {
    fn drop(&mut self) {
        self.scheduler.flush_blocked.fetch_sub(1, Ordering::AcqRel);
        // Take the state lock so a waiter between its check and its wait
        // cannot miss this wakeup.
        let _st = self.scheduler.lock_state();
        self.scheduler.state_changed.notify_all();
    }
}
