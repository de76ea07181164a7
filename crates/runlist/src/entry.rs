use crate::hw::{Channel, ChannelId};
use std::fmt;
use std::sync::{Arc, Weak};

/// One admitted unit of work on the runlist.
///
/// Holds a non-owning reference to its channel: the scheduler never keeps a
/// channel alive, and a channel must leave every ledger before it is dropped.
/// Equality is structural over the channel's identity and the four fields.
#[derive(Clone)]
pub struct Entry {
    channel: Weak<dyn Channel>,
    channel_id: ChannelId,
    payload: u64,
    ring_limit: u32,
    semaphore_slot: u32,
}

impl Entry {
    pub(crate) fn new(
        channel: &Arc<dyn Channel>,
        payload: u64,
        ring_limit: u32,
        semaphore_slot: u32,
    ) -> Self {
        Self {
            channel: Arc::downgrade(channel),
            channel_id: channel.id(),
            payload,
            ring_limit,
            semaphore_slot,
        }
    }

    /// Identity of the owning channel.
    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Completion payload the backend semaphore must show for this entry.
    #[inline]
    pub fn payload(&self) -> u64 {
        self.payload
    }

    /// Channel write-progress marker recorded at admission.
    #[inline]
    pub fn ring_limit(&self) -> u32 {
        self.ring_limit
    }

    /// Index of this entry's backend semaphore slot.
    #[inline]
    pub fn semaphore_slot(&self) -> u32 {
        self.semaphore_slot
    }

    /// The owning channel, if it is still alive.
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.upgrade()
    }

    #[inline]
    pub(crate) fn same_channel(&self, other: &Entry) -> bool {
        self.channel_id == other.channel_id
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.channel_id == other.channel_id
            && self.payload == other.payload
            && self.ring_limit == other.ring_limit
            && self.semaphore_slot == other.semaphore_slot
    }
}

impl Eq for Entry {}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("channel", &self.channel_id)
            .field("payload", &self.payload)
            .field("ring_limit", &self.ring_limit)
            .field("semaphore_slot", &self.semaphore_slot)
            .finish()
    }
}

/// Snapshot of the ledger taken by [`Scheduler::preempt`](crate::Scheduler::preempt).
///
/// Consecutive entries of one channel are collapsed to the first of the run:
/// a channel's internal order cannot be split, so only one handle per run is
/// offered for reordering. Hand a permutation (or subset) back to
/// [`Scheduler::resubmit`](crate::Scheduler::resubmit), or drop it and call
/// [`Scheduler::discard_saved`](crate::Scheduler::discard_saved).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedEntries {
    entries: Vec<Entry>,
}

impl SavedEntries {
    pub(crate) fn collapse(full: &[Entry]) -> Self {
        let mut entries: Vec<Entry> = Vec::with_capacity(full.len());
        for entry in full {
            if entries.last().is_some_and(|prev| prev.same_channel(entry)) {
                continue;
            }
            entries.push(entry.clone());
        }
        Self { entries }
    }

    /// Number of reorderable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was outstanding at preemption.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the entries in dispatch order.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Borrow as a slice, in dispatch order.
    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    /// Take the entries out for reordering.
    pub fn into_vec(self) -> Vec<Entry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a SavedEntries {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
