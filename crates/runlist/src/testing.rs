//! Minimal collaborators for unit tests.

use crate::binding::SchedulerBinding;
use crate::entry::Entry;
use crate::error::ChannelError;
use crate::hw::{Channel, ChannelId};
use std::sync::Arc;

/// A channel that accepts everything and never faults.
pub(crate) struct StubChannel {
    id: ChannelId,
    binding: SchedulerBinding,
}

impl StubChannel {
    pub(crate) fn arc(id: u32) -> Arc<dyn Channel> {
        Arc::new(Self {
            id: ChannelId(id),
            binding: SchedulerBinding::new(),
        })
    }
}

impl Channel for StubChannel {
    fn id(&self) -> ChannelId {
        self.id
    }
    fn binding(&self) -> &SchedulerBinding {
        &self.binding
    }
    fn flush(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    fn check_error(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    fn write_progress_marker(&self) -> u32 {
        0
    }
    fn emit_semaphore_release(&self, _: u64, _: u64, _: bool) -> Result<(), ChannelError> {
        Ok(())
    }
    fn recover(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    fn replace_pending_work(&self, _: u64, _: u64) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Entry on `channel` with the given payload and slot, marker 0.
pub(crate) fn entry_for(channel: &Arc<dyn Channel>, payload: u64, slot: u32) -> Entry {
    Entry::new(channel, payload, 0, slot)
}
