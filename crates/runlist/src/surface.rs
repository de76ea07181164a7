use crate::hw::MemorySurface;
use std::sync::Mutex;

/// A [`MemorySurface`] backed by host memory.
///
/// Suitable for engines that fetch the runlist from coherent system memory,
/// and for driving the scheduler against a software consumer.
#[derive(Debug)]
pub struct HostSurface {
    bytes: Mutex<Vec<u8>>,
    device_address: u64,
}

impl HostSurface {
    /// Zero-filled surface of `len` bytes mapped at `device_address`.
    pub fn new(len: usize, device_address: u64) -> Self {
        Self {
            bytes: Mutex::new(vec![0; len]),
            device_address,
        }
    }
}

impl MemorySurface for HostSurface {
    fn len(&self) -> usize {
        self.bytes.lock().unwrap().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self.bytes.lock().unwrap();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }

    fn write(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn device_address(&self) -> u64 {
        self.device_address
    }
}
