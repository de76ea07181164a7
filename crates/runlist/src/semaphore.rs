//! Backend semaphore slots: memory layout and the free/in-use pool.
//!
//! Each sub-device owns one region of `slots` records laid out back to back
//! in the semaphore surface. A record is 16 bytes, little-endian:
//!
//! ```text
//! +0  payload   u64   written by the channel's release
//! +8  timestamp u64   written alongside when timestamps are enabled
//! ```

use std::collections::VecDeque;

/// Size of one semaphore record in bytes.
pub const SEMAPHORE_RECORD_SIZE: usize = 16;

/// Byte layout of the semaphore surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreLayout {
    slots: usize,
    sub_devices: usize,
}

impl SemaphoreLayout {
    pub fn new(slots: usize, sub_devices: usize) -> Self {
        Self { slots, sub_devices }
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn sub_devices(&self) -> usize {
        self.sub_devices
    }

    /// Bytes covered by one sub-device's region.
    #[inline]
    pub fn region_len(&self) -> usize {
        self.slots * SEMAPHORE_RECORD_SIZE
    }

    /// Surface size needed for all sub-devices.
    #[inline]
    pub fn required_len(&self) -> usize {
        self.region_len() * self.sub_devices
    }

    /// Offset of `slot` within a sub-device region. This is what channels
    /// are told to release to; the region base is per sub-device.
    #[inline]
    pub fn slot_offset(&self, slot: u32) -> u64 {
        (slot as usize * SEMAPHORE_RECORD_SIZE) as u64
    }

    /// Absolute byte offset of `slot` on `sub_device` in the surface.
    #[inline]
    pub fn record_offset(&self, sub_device: usize, slot: u32) -> usize {
        sub_device * self.region_len() + slot as usize * SEMAPHORE_RECORD_SIZE
    }
}

/// One decoded semaphore record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemaphoreRecord {
    pub payload: u64,
    pub timestamp: u64,
}

impl SemaphoreRecord {
    /// Decode `slot` out of a full region snapshot.
    pub fn read_from(region: &[u8], slot: u32) -> Self {
        let at = slot as usize * SEMAPHORE_RECORD_SIZE;
        let word = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&region[at + o..at + o + 8]);
            u64::from_le_bytes(b)
        };
        Self {
            payload: word(0),
            timestamp: word(8),
        }
    }

    pub fn to_bytes(self) -> [u8; SEMAPHORE_RECORD_SIZE] {
        let mut out = [0u8; SEMAPHORE_RECORD_SIZE];
        out[..8].copy_from_slice(&self.payload.to_le_bytes());
        out[8..].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }
}

/// Free/in-use partition of semaphore slots.
///
/// Free slots are handed out FIFO so a recycled slot is the last one reused,
/// which keeps a stale payload in memory as long as possible before it is
/// overwritten.
#[derive(Debug)]
pub(crate) struct SemaphorePool {
    free: VecDeque<u32>,
    in_use: Vec<bool>,
    in_use_count: usize,
}

impl SemaphorePool {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            free: (0..slots as u32).collect(),
            in_use: vec![false; slots],
            in_use_count: 0,
        }
    }

    #[inline]
    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub(crate) fn in_use(&self) -> usize {
        self.in_use_count
    }

    /// Oldest free slot, now marked in use.
    pub(crate) fn pop(&mut self) -> Option<u32> {
        let slot = self.free.pop_front()?;
        self.in_use[slot as usize] = true;
        self.in_use_count += 1;
        Some(slot)
    }

    /// Claim a specific slot, e.g. one an entry already carries.
    /// Returns `false` if it is not free.
    pub(crate) fn take(&mut self, slot: u32) -> bool {
        match self.free.iter().position(|&s| s == slot) {
            Some(i) => {
                self.free.remove(i);
                self.in_use[slot as usize] = true;
                self.in_use_count += 1;
                true
            }
            None => false,
        }
    }

    /// Return a slot to the back of the free queue.
    pub(crate) fn push(&mut self, slot: u32) {
        let used = &mut self.in_use[slot as usize];
        if !*used {
            tracing::error!(slot, "semaphore slot returned twice");
            panic!("semaphore slot {slot} returned to the pool while already free");
        }
        *used = false;
        self.in_use_count -= 1;
        self.free.push_back(slot);
    }

    /// Mark every slot free again, in index order.
    pub(crate) fn refill(&mut self) {
        let slots = self.in_use.len();
        self.free = (0..slots as u32).collect();
        self.in_use.iter_mut().for_each(|u| *u = false);
        self.in_use_count = 0;
    }
}

/// Hands a provisionally popped slot back when a guard is dropped armed.
pub(crate) trait SlotReturn {
    fn return_slot(&self, slot: u32);
}

/// Scoped ownership of a freshly popped slot.
///
/// Dropping the guard returns the slot to its pool; [`commit`](Self::commit)
/// hands it to the entry that now owns it.
pub(crate) struct SlotGuard<'a, R: SlotReturn> {
    owner: &'a R,
    slot: u32,
    armed: bool,
}

impl<'a, R: SlotReturn> SlotGuard<'a, R> {
    pub(crate) fn new(owner: &'a R, slot: u32) -> Self {
        Self {
            owner,
            slot,
            armed: true,
        }
    }

    #[inline]
    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn commit(mut self) -> u32 {
        self.armed = false;
        self.slot
    }
}

impl<R: SlotReturn> Drop for SlotGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.owner.return_slot(self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_pool_fifo_recycling() {
        let mut pool = SemaphorePool::new(4);
        assert_eq!(pool.pop(), Some(0));
        assert_eq!(pool.pop(), Some(1));
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.free_len(), 2);

        pool.push(0);
        // 2 and 3 were free before 0 came back
        assert_eq!(pool.pop(), Some(2));
        assert_eq!(pool.pop(), Some(3));
        assert_eq!(pool.pop(), Some(0));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn test_take_and_refill() {
        let mut pool = SemaphorePool::new(4);
        assert!(pool.take(2));
        assert!(!pool.take(2));
        assert_eq!(pool.in_use(), 1);

        pool.refill();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.free_len(), 4);
        assert_eq!(pool.pop(), Some(0));
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn test_double_free_is_fatal() {
        let mut pool = SemaphorePool::new(2);
        pool.push(1);
    }

    struct Recorder(RefCell<Vec<u32>>);

    impl SlotReturn for Recorder {
        fn return_slot(&self, slot: u32) {
            self.0.borrow_mut().push(slot);
        }
    }

    #[test]
    fn test_slot_guard_rolls_back_unless_committed() {
        let r = Recorder(RefCell::new(Vec::new()));
        {
            let g = SlotGuard::new(&r, 7);
            assert_eq!(g.slot(), 7);
        }
        assert_eq!(*r.0.borrow(), vec![7]);

        let g = SlotGuard::new(&r, 8);
        assert_eq!(g.commit(), 8);
        assert_eq!(*r.0.borrow(), vec![7]);
    }

    #[test]
    fn test_layout_and_record() {
        let layout = SemaphoreLayout::new(8, 2);
        assert_eq!(layout.region_len(), 128);
        assert_eq!(layout.required_len(), 256);
        assert_eq!(layout.slot_offset(3), 48);
        assert_eq!(layout.record_offset(1, 3), 128 + 48);

        let mut region = vec![0u8; layout.region_len()];
        let rec = SemaphoreRecord { payload: 0xdead_beef, timestamp: 42 };
        region[48..64].copy_from_slice(&rec.to_bytes());
        assert_eq!(SemaphoreRecord::read_from(&region, 3), rec);
        assert_eq!(SemaphoreRecord::read_from(&region, 2), SemaphoreRecord::default());
    }
}
