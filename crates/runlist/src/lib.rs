//! runlist-rs - GPU Runlist Scheduler
//!
//! Admits units of GPU work ("entries") onto a fixed-size circular dispatch
//! ring (the runlist) consumed asynchronously by an engine, detects their
//! completion through per-entry backend semaphores, and recovers the ring
//! after preemption or a fatal channel fault.
//!
//! # Key Features
//!
//! - Multi-producer admission with a two-free-slot guarantee and blocking,
//!   timeout-bounded waits
//! - Completion reaping across every sub-device, with in-order verification
//! - Frozen publication: batch several entries behind one doorbell write
//! - Preempt / reorder / resubmit cycle preserving per-channel order
//! - Robust-channel fault recovery that rebuilds a hardware-reset ring
//!
//! # Example
//!
//! ```ignore
//! use runlist_rs::{Config, HostSurface, Scheduler, RING_ENTRY_SIZE, SEMAPHORE_RECORD_SIZE};
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let runlist = Arc::new(HostSurface::new(config.capacity() * RING_ENTRY_SIZE, 0x10_0000));
//! let semaphores = Arc::new(HostSurface::new(config.capacity() * SEMAPHORE_RECORD_SIZE, 0x20_0000));
//! let scheduler = Scheduler::new(config, device, runlist, semaphores)?;
//!
//! // Producer threads
//! scheduler.append(&channel)?;
//!
//! // Poll path
//! let retired = scheduler.retire()?;
//! scheduler.wait_for_drain(0, Some(Duration::from_secs(1)))?;
//! ```

mod backoff;
mod binding;
mod config;
mod entry;
mod error;
mod flush;
mod hw;
mod invariants;
mod ledger;
mod metrics;
mod preempt;
mod reaper;
mod recovery;
mod ring;
mod scheduler;
mod semaphore;
mod surface;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use binding::{SchedulerBinding, SchedulerId};
pub use config::{Config, LOW_LATENCY_CONFIG, MAX_RING_BITS, VERIFIED_CONFIG};
pub use entry::{Entry, SavedEntries};
pub use error::{ChannelError, ContractViolation, DeviceError, SchedError};
pub use flush::FlushBlock;
pub use hw::{Channel, ChannelId, DeviceControl, MemorySurface, RingPointers};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::{RingRecord, RING_ENTRY_SIZE};
pub use scheduler::{Scheduler, SchedulerPhase};
pub use semaphore::{SemaphoreLayout, SemaphoreRecord, SEMAPHORE_RECORD_SIZE};
pub use surface::HostSurface;
