//! Channel → scheduler back-reference.
//!
//! A channel may have entries outstanding on at most one scheduler at a time.
//! The binding records which scheduler that is and how many entries it still
//! holds; admission on another scheduler waits until the count drains to zero.
//! The binding is lookup only: it never keeps a scheduler alive.

use crate::backoff::Deadline;
use crate::error::SchedError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Identity of one scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct BindingState {
    owner: Option<SchedulerId>,
    outstanding: usize,
}

/// Per-channel record of the scheduler it is admitted on.
///
/// Channel implementations embed one of these and return it from
/// [`Channel::binding`](crate::Channel::binding).
#[derive(Debug, Default)]
pub struct SchedulerBinding {
    state: Mutex<BindingState>,
    drained: Condvar,
}

impl SchedulerBinding {
    /// Creates an unbound binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler currently holding entries of this channel.
    pub fn owner(&self) -> Option<SchedulerId> {
        self.state.lock().unwrap().owner
    }

    /// Number of this channel's entries outstanding on its owner.
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().outstanding
    }

    /// Reserve one outstanding entry for `sched`, first waiting (until
    /// `deadline`) for any other scheduler to drain this channel.
    pub(crate) fn claim(
        &self,
        sched: SchedulerId,
        deadline: Deadline,
        poll: Duration,
    ) -> Result<BindingClaim<'_>, SchedError> {
        let mut state = self.state.lock().unwrap();
        while state.owner.is_some_and(|o| o != sched) && state.outstanding > 0 {
            let Some(wait) = deadline.remaining(poll) else {
                return Err(SchedError::Timeout {
                    waiting_for: "channel to drain from another scheduler",
                });
            };
            state = self.drained.wait_timeout(state, wait).unwrap().0;
        }
        state.owner = Some(sched);
        state.outstanding += 1;
        Ok(BindingClaim {
            binding: self,
            sched,
            armed: true,
        })
    }

    /// Drop one outstanding entry held by `sched`.
    pub(crate) fn release(&self, sched: SchedulerId) {
        let mut state = self.state.lock().unwrap();
        if state.owner != Some(sched) || state.outstanding == 0 {
            tracing::warn!(?sched, owner = ?state.owner, "release of unowned channel binding");
            return;
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            state.owner = None;
            self.drained.notify_all();
        }
    }
}

/// Scoped reservation from [`SchedulerBinding::claim`]. Released on drop
/// unless [`commit`](Self::commit)ted.
pub(crate) struct BindingClaim<'a> {
    binding: &'a SchedulerBinding,
    sched: SchedulerId,
    armed: bool,
}

impl BindingClaim<'_> {
    /// Keep the reservation; the entry now owns it.
    pub(crate) fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for BindingClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.binding.release(self.sched);
        }
    }
}
