//! Software stand-ins for the channel, device and GPU memory the scheduler
//! drives, shared by the integration tests.

#![allow(dead_code)]

use runlist_rs::{
    Channel, ChannelError, ChannelId, Config, DeviceControl, DeviceError, Entry, HostSurface,
    MemorySurface, RingPointers, RingRecord, Scheduler, SchedulerBinding, SemaphoreLayout, SemaphoreRecord,
    RING_ENTRY_SIZE, SEMAPHORE_RECORD_SIZE,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// MockChannel
// =============================================================================

type RecoverHook = Box<dyn Fn() + Send + Sync>;

/// Channel whose pushbuffer is a list of recorded semaphore releases.
#[derive(Default)]
pub struct MockChannel {
    id: u32,
    binding: SchedulerBinding,
    gp_put: AtomicU32,
    error: Mutex<Option<ChannelError>>,
    fail_flush: AtomicBool,
    fail_emit: AtomicBool,
    /// (offset, payload) of every release queued, in order.
    pub releases: Mutex<Vec<(u64, u64)>>,
    /// (offset, payload) of every replace_pending_work call.
    pub replaced: Mutex<Vec<(u64, u64)>>,
    pub flushes: AtomicUsize,
    pub recoveries: AtomicUsize,
    on_recover: Mutex<Option<RecoverHook>>,
}

impl MockChannel {
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Self::default()
        })
    }

    pub fn set_error(&self, error: ChannelError) {
        *self.error.lock().unwrap() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.error.lock().unwrap() = None;
    }

    pub fn fail_next_flush(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_emit(&self) {
        self.fail_emit.store(true, Ordering::SeqCst);
    }

    /// Run `hook` from inside the next `recover` calls.
    pub fn on_recover(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_recover.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn binding_outstanding(&self) -> usize {
        self.binding.outstanding()
    }

    pub fn release_count(&self) -> usize {
        self.releases.lock().unwrap().len()
    }

    pub fn last_release(&self) -> Option<(u64, u64)> {
        self.releases.lock().unwrap().last().copied()
    }
}

impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        ChannelId(self.id)
    }

    fn binding(&self) -> &SchedulerBinding {
        &self.binding
    }

    fn flush(&self) -> Result<(), ChannelError> {
        if self.fail_flush.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::Other("flush failed".into()));
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.gp_put.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_error(&self) -> Result<(), ChannelError> {
        match self.error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn write_progress_marker(&self) -> u32 {
        self.gp_put.load(Ordering::SeqCst)
    }

    fn emit_semaphore_release(
        &self,
        offset: u64,
        payload: u64,
        _use_timestamp: bool,
    ) -> Result<(), ChannelError> {
        if self.fail_emit.swap(false, Ordering::SeqCst) {
            return Err(ChannelError::PushbufferFull);
        }
        self.releases.lock().unwrap().push((offset, payload));
        Ok(())
    }

    fn recover(&self) -> Result<(), ChannelError> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        self.clear_error();
        if let Some(hook) = self.on_recover.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    fn replace_pending_work(&self, offset: u64, payload: u64) -> Result<(), ChannelError> {
        self.replaced.lock().unwrap().push((offset, payload));
        Ok(())
    }
}

// =============================================================================
// MockDevice
// =============================================================================

/// Device whose consumer tracks the doorbell on every sub-device.
pub struct MockDevice {
    sub_devices: usize,
    pub doorbells: Mutex<Vec<u32>>,
    pointers: Mutex<Vec<RingPointers>>,
    reject_preempt: AtomicBool,
    pub preempts: AtomicUsize,
}

impl MockDevice {
    pub fn new(sub_devices: usize) -> Arc<Self> {
        Arc::new(Self {
            sub_devices,
            doorbells: Mutex::new(Vec::new()),
            pointers: Mutex::new(vec![RingPointers::default(); sub_devices]),
            reject_preempt: AtomicBool::new(false),
            preempts: AtomicUsize::new(0),
        })
    }

    pub fn doorbell_count(&self) -> usize {
        self.doorbells.lock().unwrap().len()
    }

    pub fn last_doorbell(&self) -> Option<u32> {
        self.doorbells.lock().unwrap().last().copied()
    }

    /// Simulate the hardware resetting the runlist on every sub-device.
    pub fn reset_ring(&self) {
        for p in self.pointers.lock().unwrap().iter_mut() {
            *p = RingPointers::default();
        }
    }

    pub fn set_pointers(&self, pointers: RingPointers) {
        for p in self.pointers.lock().unwrap().iter_mut() {
            *p = pointers;
        }
    }

    pub fn reject_preempt(&self, reject: bool) {
        self.reject_preempt.store(reject, Ordering::SeqCst);
    }
}

impl DeviceControl for MockDevice {
    fn sub_device_count(&self) -> usize {
        self.sub_devices
    }

    fn ring_doorbell(&self, put: u32) {
        self.doorbells.lock().unwrap().push(put);
        for p in self.pointers.lock().unwrap().iter_mut() {
            p.put = put;
        }
    }

    fn ring_pointers(&self, sub_device: usize) -> RingPointers {
        self.pointers.lock().unwrap()[sub_device]
    }

    fn preempt(&self) -> Result<(), DeviceError> {
        if self.reject_preempt.load(Ordering::SeqCst) {
            return Err(DeviceError::PreemptRejected);
        }
        self.preempts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Rig: scheduler plus its collaborators
// =============================================================================

/// Route scheduler logs to the test harness. `RUST_LOG=runlist_rs=debug`
/// shows them for a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Rig {
    pub scheduler: Arc<Scheduler>,
    pub device: Arc<MockDevice>,
    pub runlist: Arc<HostSurface>,
    pub semaphores: Arc<HostSurface>,
}

impl Rig {
    pub fn new(config: Config) -> Self {
        Self::with_sub_devices(config, 1)
    }

    pub fn with_sub_devices(config: Config, sub_devices: usize) -> Self {
        init_tracing();
        let device = MockDevice::new(sub_devices);
        let runlist = Arc::new(HostSurface::new(
            config.capacity() * RING_ENTRY_SIZE,
            0x10_0000,
        ));
        let semaphores = Arc::new(HostSurface::new(
            config.capacity() * SEMAPHORE_RECORD_SIZE * sub_devices,
            0x20_0000,
        ));
        let scheduler = Scheduler::new(
            config,
            device.clone(),
            runlist.clone(),
            semaphores.clone(),
        )
        .expect("valid rig");
        Self {
            scheduler: Arc::new(scheduler),
            device,
            runlist,
            semaphores,
        }
    }

    /// Signal `entry` on every sub-device.
    pub fn complete(&self, entry: &Entry) {
        self.completer().complete(entry);
    }

    /// Signal `entry` on one sub-device with a hardware timestamp.
    pub fn complete_on(&self, sub: usize, entry: &Entry, timestamp: u64) {
        self.completer().complete_on(sub, entry, timestamp);
    }

    /// Handle that writes completions from another thread.
    pub fn completer(&self) -> Completer {
        Completer {
            semaphores: self.semaphores.clone(),
            layout: self.scheduler.semaphore_layout(),
        }
    }

    /// Signal the oldest `n` outstanding entries.
    pub fn complete_oldest(&self, n: usize) {
        for entry in self.scheduler.entries().iter().take(n) {
            self.complete(entry);
        }
    }

    /// Decode the runlist record at `pos`.
    pub fn ring_record(&self, pos: usize) -> RingRecord {
        let mut bytes = [0u8; RING_ENTRY_SIZE];
        self.runlist.read(pos * RING_ENTRY_SIZE, &mut bytes);
        RingRecord::decode(&bytes)
    }
}

/// Plays the engine's part: writes semaphore releases into the surface.
#[derive(Clone)]
pub struct Completer {
    semaphores: Arc<HostSurface>,
    layout: SemaphoreLayout,
}

impl Completer {
    pub fn complete(&self, entry: &Entry) {
        for sub in 0..self.layout.sub_devices() {
            self.complete_on(sub, entry, 0);
        }
    }

    pub fn complete_on(&self, sub: usize, entry: &Entry, timestamp: u64) {
        let record = SemaphoreRecord {
            payload: entry.payload(),
            timestamp,
        };
        self.semaphores.write(
            self.layout.record_offset(sub, entry.semaphore_slot()),
            &record.to_bytes(),
        );
    }
}

pub fn payloads(entries: &[Entry]) -> Vec<u64> {
    entries.iter().map(Entry::payload).collect()
}

pub fn channel_ids(entries: &[Entry]) -> Vec<u32> {
    entries.iter().map(|e| e.channel_id().0).collect()
}
