//! Collaborator interfaces the scheduler drives.
//!
//! The scheduler never owns channels or GPU memory. Channels are referenced
//! weakly from ledger entries; surfaces and the device control handle are
//! created by the surrounding allocation layer and shared by `Arc`.

use crate::binding::SchedulerBinding;
use crate::error::{ChannelError, DeviceError};
use std::fmt;

/// Wrapper identity of a channel. All entry equality checks go through this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// A GPU channel that submits work through the runlist.
pub trait Channel: Send + Sync {
    /// Stable identity of this channel.
    fn id(&self) -> ChannelId;

    /// Back-reference to the scheduler this channel is admitted on, if any.
    fn binding(&self) -> &SchedulerBinding;

    /// Kick the channel's pending pushbuffer content to the hardware.
    fn flush(&self) -> Result<(), ChannelError>;

    /// Report a pending channel error, if any.
    fn check_error(&self) -> Result<(), ChannelError>;

    /// Current hardware write-progress marker (GP_PUT) of the channel.
    fn write_progress_marker(&self) -> u32;

    /// Queue a backend-semaphore release of `payload` at `offset` (relative
    /// to one sub-device's semaphore region) ahead of the channel's pending
    /// work, so the write lands only after that work completes.
    fn emit_semaphore_release(
        &self,
        offset: u64,
        payload: u64,
        use_timestamp: bool,
    ) -> Result<(), ChannelError>;

    /// Channel-level robust-fault recovery.
    fn recover(&self) -> Result<(), ChannelError>;

    /// Discard in-flight work and leave only a release of `payload` at
    /// `offset`. Used after the hardware reset the runlist.
    fn replace_pending_work(&self, offset: u64, payload: u64) -> Result<(), ChannelError>;
}

/// Fixed-size GPU-visible allocation with host byte access.
///
/// Offsets handed to `read`/`write` are always validated against `len()` by
/// the scheduler at construction time.
pub trait MemorySurface: Send + Sync {
    /// Size of the allocation in bytes.
    fn len(&self) -> usize;

    /// Returns `true` for a zero-sized surface.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Copy `data` into the surface starting at `offset`.
    fn write(&self, offset: usize, data: &[u8]);

    /// Address the hardware consumer uses for this allocation.
    fn device_address(&self) -> u64;
}

/// Consumer (GET) and doorbell (PUT) pointers of one sub-device's runlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingPointers {
    /// Next entry the engine will fetch.
    pub get: u32,
    /// Last published write pointer.
    pub put: u32,
}

impl RingPointers {
    /// Both pointers read zero: the hardware reset this runlist.
    #[inline]
    pub fn is_reset(&self) -> bool {
        self.get == 0 && self.put == 0
    }
}

/// Device-level control of the engine that consumes the runlist.
pub trait DeviceControl: Send + Sync {
    /// Number of physical sub-devices. Each one has its own semaphore region.
    fn sub_device_count(&self) -> usize;

    /// Publish `put` as the runlist write pointer on every sub-device.
    fn ring_doorbell(&self, put: u32);

    /// Read back the runlist pointers of one sub-device.
    fn ring_pointers(&self, sub_device: usize) -> RingPointers;

    /// Halt runlist consumption.
    fn preempt(&self) -> Result<(), DeviceError>;
}
