//! Completion detection: `retire` and `wait_for_drain`.

use crate::backoff::{Backoff, Deadline};
use crate::entry::Entry;
use crate::error::SchedError;
use crate::hw::Channel;
use crate::invariants::{
    debug_assert_pool_matches_ledger, fatal_out_of_order, fatal_spurious_completion,
};
use crate::scheduler::{Scheduler, SchedulerState};
use crate::semaphore::SemaphoreRecord;
use std::sync::Arc;
use std::time::Duration;

impl Scheduler {
    /// Retire every entry whose semaphore shows its payload on all
    /// sub-devices, oldest first. Returns how many were removed.
    ///
    /// Never blocks on the hardware. Panics on an internal-consistency
    /// fault: an entry completing out of order, or a semaphore showing the
    /// payload of an entry queued behind an incomplete one.
    pub fn retire(&self) -> Result<usize, SchedError> {
        let mut st = self.lock_state();
        Ok(self.retire_locked(&mut st))
    }

    pub(crate) fn retire_locked(&self, st: &mut SchedulerState) -> usize {
        // Frozen entries were never handed to the hardware.
        let published = st.ledger.len() - st.ring.frozen_count();
        if published == 0 {
            return 0;
        }

        let region_len = self.layout.region_len();
        let mut regions = Vec::with_capacity(self.layout.sub_devices());
        let mut retire = published;
        for sub in 0..self.layout.sub_devices() {
            let mut region = vec![0u8; region_len];
            self.semaphores.read(sub * region_len, &mut region);
            retire = retire.min(self.scan_sub_device(st, sub, &region, published));
            regions.push(region);
        }
        if retire == 0 {
            return 0;
        }

        if let Some(newest) = st.ledger.get(retire - 1) {
            let slot = newest.semaphore_slot();
            for (sub, region) in regions.iter().enumerate() {
                st.last_timestamps[sub] = SemaphoreRecord::read_from(region, slot).timestamp;
            }
        }

        let retired: Vec<Entry> = st.ledger.pop_front_n(retire).collect();
        for entry in &retired {
            st.pool.push(entry.semaphore_slot());
            self.release_binding(entry);
        }
        debug_assert_pool_matches_ledger!(st.pool.in_use(), st.ledger.len());

        tracing::debug!(
            retired = retire,
            outstanding = st.ledger.len(),
            last_payload = retired.last().map(Entry::payload),
            "runlist entries retired"
        );
        if self.config.enable_metrics {
            self.metrics.add_retired(retire as u64);
        }
        self.state_changed.notify_all();
        retire
    }

    /// Count leading entries done on one sub-device and check ordering.
    fn scan_sub_device(
        &self,
        st: &SchedulerState,
        sub: usize,
        region: &[u8],
        published: usize,
    ) -> usize {
        let mut prev_ts = st.last_timestamps[sub];
        let mut done = 0;
        let mut blocked_by = None;

        for entry in st.ledger.iter().take(published) {
            let record = SemaphoreRecord::read_from(region, entry.semaphore_slot());
            if record.payload != entry.payload() {
                blocked_by = Some(entry);
                break;
            }
            if self.config.enable_timestamps {
                if record.timestamp < prev_ts {
                    fatal_out_of_order!(sub, entry, record.timestamp, prev_ts);
                }
                prev_ts = record.timestamp;
            }
            done += 1;
        }

        // Nothing behind the first incomplete entry may have completed.
        if let Some(blocked) = blocked_by {
            for entry in st.ledger.iter().skip(done + 1) {
                let record = SemaphoreRecord::read_from(region, entry.semaphore_slot());
                if record.payload == entry.payload() {
                    fatal_spurious_completion!(sub, entry, blocked);
                }
            }
        }
        done
    }

    /// Block until at most `remaining` entries are outstanding.
    ///
    /// Polls [`retire`](Self::retire) with adaptive backoff. Fails with the
    /// first channel error reported by an outstanding entry's channel, or
    /// with `Timeout` once `timeout` elapses (`None` waits forever).
    pub fn wait_for_drain(
        &self,
        remaining: usize,
        timeout: Option<Duration>,
    ) -> Result<(), SchedError> {
        let deadline = Deadline::after(timeout);
        let mut backoff = Backoff::new(self.config.poll_interval);

        loop {
            let channels = {
                let mut st = self.lock_state();
                if self.retire_locked(&mut st) > 0 {
                    backoff.reset();
                }
                if st.ledger.len() <= remaining {
                    return Ok(());
                }
                outstanding_channels(st.ledger.iter())
            };

            for channel in &channels {
                self.check_channel(channel)?;
            }
            if deadline.expired() {
                return Err(SchedError::Timeout {
                    waiting_for: "runlist to drain",
                });
            }
            backoff.snooze();
        }
    }
}

/// Distinct live channels of `entries`, in first-seen order.
pub(crate) fn outstanding_channels<'a>(entries: impl Iterator<Item = &'a Entry>) -> Vec<Arc<dyn Channel>> {
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    for entry in entries {
        if channels.iter().any(|c| c.id() == entry.channel_id()) {
            continue;
        }
        if let Some(channel) = entry.channel() {
            channels.push(channel);
        }
    }
    channels
}
