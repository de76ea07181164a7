//! Error types for scheduler operations.

use crate::hw::ChannelId;
use thiserror::Error;

/// Errors reported by a [`Channel`](crate::Channel) collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel hit a fatal per-channel hardware fault (robust-channel error).
    #[error("robust channel fault (code {0:#x})")]
    RobustFault(u32),

    /// The channel's pushbuffer has no room for more methods.
    #[error("pushbuffer full")]
    PushbufferFull,

    /// Any other channel-side failure.
    #[error("{0}")]
    Other(String),
}

/// Errors reported by the [`DeviceControl`](crate::DeviceControl) collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device refused or failed the preempt request.
    #[error("preempt request rejected by device")]
    PreemptRejected,

    /// The device is lost or powered down.
    #[error("device unavailable")]
    Unavailable,
}

/// Caller-contract violations. Fatal to the call; never silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// Resubmit named an entry that was not in the last preempt snapshot.
    #[error("entry (channel {channel}, payload {payload}) is not in the saved snapshot")]
    UnknownEntry {
        /// Channel of the offending entry.
        channel: ChannelId,
        /// Payload of the offending entry.
        payload: u64,
    },

    /// Resubmit named the same entry twice.
    #[error("entry (channel {channel}, payload {payload}) resubmitted twice")]
    DuplicateEntry {
        /// Channel of the offending entry.
        channel: ChannelId,
        /// Payload of the offending entry.
        payload: u64,
    },

    /// Two entries of one channel were swapped relative to the snapshot.
    #[error("entries of channel {channel} reordered relative to each other")]
    ChannelReordered {
        /// Channel whose internal order was broken.
        channel: ChannelId,
    },

    /// The operation is not valid in the scheduler's current phase.
    #[error("{operation} is not allowed while the scheduler is {phase}")]
    WrongPhase {
        /// The rejected operation.
        operation: &'static str,
        /// Phase the scheduler was in.
        phase: &'static str,
    },

    /// A channel was destroyed while the ledger still referenced it.
    #[error("channel {0} dropped while referenced by the ledger")]
    ChannelDropped(ChannelId),
}

/// Errors returned by [`Scheduler`](crate::Scheduler) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// A channel reported a pending error. Propagated, never retried.
    #[error("channel {channel} fault: {source}")]
    ChannelFault {
        /// The failing channel.
        channel: ChannelId,
        /// What the channel reported.
        source: ChannelError,
    },

    /// A bounded wait expired. No ledger state was changed.
    #[error("timed out waiting for {waiting_for}")]
    Timeout {
        /// What the call was waiting on.
        waiting_for: &'static str,
    },

    /// The caller broke the scheduler's contract.
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),

    /// The device-level preempt request failed.
    #[error("preempt failed: {0}")]
    PreemptFailed(DeviceError),

    /// Configuration or surface sizes are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No ring slot is left for an entry that cannot wait (recovery path).
    #[error("runlist is full")]
    RingFull,
}

impl SchedError {
    pub(crate) fn channel(channel: ChannelId, source: ChannelError) -> Self {
        Self::ChannelFault { channel, source }
    }

    /// Returns `true` if the caller may retry after a delay or after
    /// outstanding entries retire.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RingFull)
    }

    /// Returns `true` if this error reports a caller bug rather than a
    /// hardware or resource condition.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let t = SchedError::Timeout { waiting_for: "free ring slots" };
        assert!(t.is_retryable());
        assert!(!t.is_contract_violation());

        let c: SchedError = ContractViolation::ChannelReordered { channel: ChannelId(3) }.into();
        assert!(c.is_contract_violation());
        assert!(!c.is_retryable());

        let f = SchedError::channel(ChannelId(1), ChannelError::RobustFault(0x1f));
        assert!(!f.is_retryable());
        assert_eq!(f.to_string(), "channel ch1 fault: robust channel fault (code 0x1f)");
    }
}
