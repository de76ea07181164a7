//! Preemption and resubmission.
//!
//! `preempt` halts the engine, drains the ledger into a snapshot and resets
//! the runlist. The caller may reorder the snapshot and hand it back to
//! `resubmit`, which rebuilds the ledger and reloads the ring from position
//! zero. Entries keep their semaphore slots and payloads across the cycle:
//! the matching releases are already queued in their channels.

use crate::entry::{Entry, SavedEntries};
use crate::error::{ContractViolation, SchedError};
use crate::hw::ChannelId;
use crate::invariants::debug_assert_pool_matches_ledger;
use crate::scheduler::{Scheduler, SchedulerPhase, SchedulerState};
use std::collections::HashMap;

impl Scheduler {
    /// Halt runlist consumption and move every outstanding entry into a
    /// snapshot.
    ///
    /// Completed entries are retired first. The returned list collapses
    /// runs of consecutive entries on one channel to the first of the run.
    /// Admissions wait until [`resubmit`](Self::resubmit) or
    /// [`discard_saved`](Self::discard_saved).
    pub fn preempt(&self) -> Result<SavedEntries, SchedError> {
        let _flush = self.flush_lock.lock().unwrap();
        let mut st = self.lock_state();
        expect_phase(&st, SchedulerPhase::Running, "preempt")?;

        if let Err(e) = self.device.preempt() {
            tracing::warn!(error = %e, "device preempt request failed");
            return Err(SchedError::PreemptFailed(e));
        }

        self.retire_locked(&mut st);
        let full = st.ledger.take_all();
        st.ring.reset();
        st.pool.refill();

        let saved = SavedEntries::collapse(&full);
        tracing::info!(
            outstanding = full.len(),
            reorderable = saved.len(),
            "runlist preempted"
        );
        st.saved = Some(full);
        st.phase = SchedulerPhase::Preempted;

        if self.config.enable_metrics {
            self.metrics.add_preemption();
        }
        Ok(saved)
    }

    /// Reload the runlist from a reordering of the last preempt snapshot.
    ///
    /// `new_order` must only name snapshot entries, each at most once, and
    /// must keep entries of one channel in their original relative order.
    /// Each named entry is preceded by its channel's earlier unplaced
    /// entries and followed by the rest of its collapsed run. Entries not
    /// reached that way go last, in snapshot order.
    ///
    /// On a contract violation the snapshot is kept and the scheduler stays
    /// preempted.
    pub fn resubmit(&self, new_order: &[Entry]) -> Result<(), SchedError> {
        let mut st = self.lock_state();
        expect_phase(&st, SchedulerPhase::Preempted, "resubmit")?;
        let full = st.saved.take().unwrap_or_default();

        let order = match rebuild_order(&full, new_order) {
            Ok(order) => order,
            Err(e) => {
                st.saved = Some(full);
                return Err(e);
            }
        };

        for entry in &order {
            if !st.pool.take(entry.semaphore_slot()) {
                tracing::error!(entry = ?entry, "two saved entries share a semaphore slot");
                panic!("semaphore slot {} claimed twice on resubmit", entry.semaphore_slot());
            }
        }
        self.reload_ring_locked(&mut st, order);
        debug_assert_pool_matches_ledger!(st.pool.in_use(), st.ledger.len());

        tracing::info!(
            entries = st.ledger.len(),
            frozen = st.ring.is_frozen(),
            "runlist resubmitted"
        );
        st.phase = SchedulerPhase::Running;
        self.state_changed.notify_all();
        Ok(())
    }

    /// Abandon the preempt snapshot and resume admissions with an empty
    /// runlist. Returns how many entries were dropped.
    pub fn discard_saved(&self) -> Result<usize, SchedError> {
        let mut st = self.lock_state();
        expect_phase(&st, SchedulerPhase::Preempted, "discard_saved")?;
        let full = st.saved.take().unwrap_or_default();
        for entry in &full {
            self.release_binding(entry);
        }
        tracing::info!(dropped = full.len(), "preempt snapshot discarded");
        st.phase = SchedulerPhase::Running;
        self.state_changed.notify_all();
        Ok(full.len())
    }

    /// Replace ledger and ring contents with `entries` from position zero,
    /// then publish them or queue them as frozen.
    fn reload_ring_locked(&self, st: &mut SchedulerState, entries: Vec<Entry>) {
        self.writer.rewrite(entries.iter());
        let len = entries.len();
        for entry in entries {
            st.ledger.push(entry);
        }
        st.ring.reload(len);
        if st.ring.is_frozen() {
            st.ring.add_frozen(len);
        } else {
            self.ring_doorbell(st.ring.write_ptr());
        }
    }
}

fn expect_phase(
    st: &SchedulerState,
    want: SchedulerPhase,
    operation: &'static str,
) -> Result<(), SchedError> {
    if st.phase == want {
        Ok(())
    } else {
        Err(ContractViolation::WrongPhase {
            operation,
            phase: st.phase.name(),
        }
        .into())
    }
}

/// Validate `new_order` against the full snapshot and expand it back into a
/// complete dispatch order.
fn rebuild_order(full: &[Entry], new_order: &[Entry]) -> Result<Vec<Entry>, SchedError> {
    let mut requested = Vec::with_capacity(new_order.len());
    for entry in new_order {
        let Some(index) = full.iter().position(|e| e == entry) else {
            return Err(ContractViolation::UnknownEntry {
                channel: entry.channel_id(),
                payload: entry.payload(),
            }
            .into());
        };
        if requested.contains(&index) {
            return Err(ContractViolation::DuplicateEntry {
                channel: entry.channel_id(),
                payload: entry.payload(),
            }
            .into());
        }
        requested.push(index);
    }

    let mut last_seen: HashMap<ChannelId, usize> = HashMap::new();
    for &index in &requested {
        let channel = full[index].channel_id();
        if last_seen.get(&channel).is_some_and(|&prev| prev > index) {
            return Err(ContractViolation::ChannelReordered { channel }.into());
        }
        last_seen.insert(channel, index);
    }

    let mut checked: Vec<ChannelId> = Vec::new();
    for entry in full {
        if checked.contains(&entry.channel_id()) {
            continue;
        }
        checked.push(entry.channel_id());
        let channel = entry
            .channel()
            .ok_or(ContractViolation::ChannelDropped(entry.channel_id()))?;
        channel
            .check_error()
            .map_err(|e| SchedError::channel(entry.channel_id(), e))?;
    }

    let mut placed = vec![false; full.len()];
    let mut order = Vec::with_capacity(full.len());
    for &index in &requested {
        let channel = full[index].channel_id();
        let run_end = (index + 1..full.len())
            .find(|&j| full[j].channel_id() != channel)
            .unwrap_or(full.len());
        let picks = (0..index)
            .filter(|&j| full[j].channel_id() == channel)
            .chain(index..run_end);
        for j in picks {
            if !placed[j] {
                placed[j] = true;
                order.push(full[j].clone());
            }
        }
    }
    for (j, entry) in full.iter().enumerate() {
        if !placed[j] {
            order.push(entry.clone());
        }
    }
    Ok(order)
}
