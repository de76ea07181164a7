use crate::entry::Entry;
use crate::error::SchedError;
use crate::hw::MemorySurface;
use crate::invariants::fatal_ring_mismatch;
use std::sync::Arc;

// =============================================================================
// RUNLIST MEMORY LAYOUT
// =============================================================================
//
// The runlist is `capacity` fixed-size records in a GPU-visible surface. The
// engine fetches records from its GET pointer up to the PUT pointer published
// through the doorbell, wrapping at `capacity`.
//
// Record (24 bytes, little-endian):
//
//   +0   channel id      u32
//   +4   ring limit      u32   channel GP_PUT to run up to
//   +8   semaphore slot  u32
//   +12  flags           u32   bit 0: valid
//   +16  payload         u64
//
// One record always stays empty, so PUT == GET means idle, never full. The
// write pointer and every record are only touched under the state lock.
//
// =============================================================================

/// Size of one runlist record in bytes.
pub const RING_ENTRY_SIZE: usize = 24;

const FLAG_VALID: u32 = 1;

/// One decoded runlist record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingRecord {
    pub channel: u32,
    pub ring_limit: u32,
    pub semaphore_slot: u32,
    pub flags: u32,
    pub payload: u64,
}

impl RingRecord {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            channel: entry.channel_id().0,
            ring_limit: entry.ring_limit(),
            semaphore_slot: entry.semaphore_slot(),
            flags: FLAG_VALID,
            payload: entry.payload(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags & FLAG_VALID != 0
    }

    pub fn encode(&self) -> [u8; RING_ENTRY_SIZE] {
        let mut out = [0u8; RING_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.channel.to_le_bytes());
        out[4..8].copy_from_slice(&self.ring_limit.to_le_bytes());
        out[8..12].copy_from_slice(&self.semaphore_slot.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.payload.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; RING_ENTRY_SIZE]) -> Self {
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&bytes[16..24]);
        Self {
            channel: u32_at(0),
            ring_limit: u32_at(4),
            semaphore_slot: u32_at(8),
            flags: u32_at(12),
            payload: u64::from_le_bytes(payload),
        }
    }
}

/// Write pointer and freeze bookkeeping.
#[derive(Debug)]
pub(crate) struct RingState {
    write_ptr: u32,
    mask: u32,
    frozen: bool,
    /// Newest entries written to memory but not yet doorbelled.
    frozen_count: usize,
}

impl RingState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            write_ptr: 0,
            mask: (capacity - 1) as u32,
            frozen: false,
            frozen_count: 0,
        }
    }

    #[inline]
    pub(crate) fn write_ptr(&self) -> u32 {
        self.write_ptr
    }

    /// Write pointer as last published through the doorbell.
    #[inline]
    pub(crate) fn published_ptr(&self) -> u32 {
        self.write_ptr.wrapping_sub(self.frozen_count as u32) & self.mask
    }

    /// Ring position `back` records behind the write pointer.
    #[inline]
    pub(crate) fn behind(&self, back: usize) -> u32 {
        self.write_ptr.wrapping_sub(back as u32) & self.mask
    }

    #[inline]
    pub(crate) fn advance(&mut self) {
        self.write_ptr = (self.write_ptr + 1) & self.mask;
    }

    #[inline]
    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    pub(crate) fn frozen_count(&self) -> usize {
        self.frozen_count
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub(crate) fn add_frozen(&mut self, n: usize) {
        self.frozen_count += n;
    }

    pub(crate) fn take_frozen(&mut self, n: usize) {
        self.frozen_count -= n;
    }

    /// Empty, unfrozen, write pointer zero.
    pub(crate) fn reset(&mut self) {
        self.write_ptr = 0;
        self.frozen = false;
        self.frozen_count = 0;
    }

    /// Rewound to zero with `len` records queued, frozen flag untouched.
    pub(crate) fn reload(&mut self, len: usize) {
        self.write_ptr = len as u32 & self.mask;
        self.frozen_count = 0;
    }
}

/// Encodes ledger entries into the GPU-visible runlist surface.
pub(crate) struct RingWriter {
    surface: Arc<dyn MemorySurface>,
    capacity: usize,
}

impl RingWriter {
    pub(crate) fn new(surface: Arc<dyn MemorySurface>, capacity: usize) -> Result<Self, SchedError> {
        let needed = capacity * RING_ENTRY_SIZE;
        if surface.len() < needed {
            return Err(SchedError::InvalidConfig(format!(
                "runlist surface is {} bytes, {capacity} entries need {needed}",
                surface.len()
            )));
        }
        Ok(Self { surface, capacity })
    }

    #[inline]
    fn offset(&self, pos: u32) -> usize {
        debug_assert!((pos as usize) < self.capacity);
        pos as usize * RING_ENTRY_SIZE
    }

    pub(crate) fn write(&self, pos: u32, entry: &Entry) {
        self.surface
            .write(self.offset(pos), &RingRecord::from_entry(entry).encode());
    }

    pub(crate) fn read(&self, pos: u32) -> RingRecord {
        let mut buf = [0u8; RING_ENTRY_SIZE];
        self.surface.read(self.offset(pos), &mut buf);
        RingRecord::decode(&buf)
    }

    /// Re-read `pos` and check it still encodes `entry`. A mismatch means
    /// the runlist memory was corrupted behind the scheduler's back.
    pub(crate) fn verify(&self, pos: u32, entry: &Entry) {
        let expected = RingRecord::from_entry(entry);
        let found = self.read(pos);
        if found != expected {
            fatal_ring_mismatch!(pos, expected, found);
        }
    }

    /// Write `entries` from position zero, clearing the rest of the ring.
    pub(crate) fn rewrite<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) {
        let mut pos = 0u32;
        for entry in entries {
            self.write(pos, entry);
            pos += 1;
        }
        let empty = RingRecord::default().encode();
        for p in pos as usize..self.capacity {
            self.surface.write(p * RING_ENTRY_SIZE, &empty);
        }
    }
}
