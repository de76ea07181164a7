use crate::entry::Entry;
use crate::hw::ChannelId;
use std::collections::VecDeque;

/// The scheduler's belief about ring contents.
///
/// Insertion order is dispatch order is required completion order. The
/// oldest entry sits at the ring's read pointer.
#[derive(Debug)]
pub(crate) struct EntryLedger {
    entries: VecDeque<Entry>,
    limit: usize,
}

impl EntryLedger {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail. The caller has already checked for a free ring slot.
    pub(crate) fn push(&mut self, entry: Entry) {
        debug_assert!(self.entries.len() < self.limit, "ledger overflow");
        self.entries.push_back(entry);
    }

    /// Remove the `n` oldest entries.
    pub(crate) fn pop_front_n(&mut self, n: usize) -> impl Iterator<Item = Entry> + '_ {
        self.entries.drain(..n)
    }

    /// Move every entry out, leaving the ledger empty.
    pub(crate) fn take_all(&mut self) -> Vec<Entry> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn iter(&self) -> std::collections::vec_deque::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub(crate) fn contains_channel(&self, channel: ChannelId) -> bool {
        self.entries.iter().any(|e| e.channel_id() == channel)
    }

    pub(crate) fn snapshot(&self) -> Vec<Entry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry_for, StubChannel};

    #[test]
    fn test_fifo_order() {
        let a = StubChannel::arc(1);
        let b = StubChannel::arc(2);
        let mut ledger = EntryLedger::new(3);
        assert!(ledger.is_empty());

        ledger.push(entry_for(&a, 1, 0));
        ledger.push(entry_for(&b, 2, 1));
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains_channel(ChannelId(2)));
        assert!(!ledger.contains_channel(ChannelId(9)));
        assert_eq!(ledger.snapshot()[1], entry_for(&b, 2, 1));

        let retired: Vec<_> = ledger.pop_front_n(1).collect();
        assert_eq!(retired[0].payload(), 1);
        assert_eq!(ledger.get(0).map(Entry::payload), Some(2));
        assert_eq!(ledger.iter().count(), 1);
    }

    #[test]
    fn test_take_all_empties() {
        let a = StubChannel::arc(1);
        let mut ledger = EntryLedger::new(4);
        for p in 1..=3 {
            ledger.push(entry_for(&a, p, p as u32));
        }
        let all = ledger.take_all();
        assert_eq!(all.len(), 3);
        assert!(ledger.is_empty());
        assert_eq!(ledger.len(), 0);
    }
}
