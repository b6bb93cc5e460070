//! CPU runtime implementation
//!
//! The default runtime. Host memory comes from the system allocator with
//! 64-byte alignment (SIMD friendly, and a stand-in for page-locked memory).
//! The runtime can additionally emulate a configurable number of device
//! heaps in host memory: "device" allocations and transfers go through the
//! same code paths as a real accelerator backend, just synchronously. That
//! keeps the full tile motion, broadcast, and batch-staging machinery
//! exercised on machines without accelerators.

use super::{Location, Runtime};
use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout as AllocLayout};

/// Allocation alignment, matching AVX-512 vectors
const ALIGN: usize = 64;

/// CPU compute runtime with optional emulated device heaps
///
/// `CpuRuntime::new()` reports zero devices; [`CpuRuntime::with_devices`]
/// emulates `n` of them.
#[derive(Clone, Debug, Default)]
pub struct CpuRuntime {
    devices: usize,
}

/// Stream on an emulated device; transfers complete eagerly
///
/// The default stream is a detached token bound to device 0, enough for
/// host-side copies that never reach a device.
#[derive(Debug, Default)]
pub struct CpuStream {
    device: usize,
}

impl CpuStream {
    /// Device this stream is bound to
    #[inline]
    pub fn device(&self) -> usize {
        self.device
    }
}

impl CpuRuntime {
    /// Runtime with no devices; every tile lives on the host
    pub fn new() -> Self {
        Self { devices: 0 }
    }

    /// Runtime emulating `devices` device heaps in host memory
    pub fn with_devices(devices: usize) -> Self {
        Self { devices }
    }

    fn check_device(&self, device: usize) -> Result<()> {
        if device >= self.devices {
            return Err(Error::InvalidArgument {
                arg: "device",
                reason: format!("device {} out of range (0..{})", device, self.devices),
            });
        }
        Ok(())
    }

    fn alloc_aligned(&self, bytes: usize, location: Location) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }

        let layout = AllocLayout::from_size_align(bytes, ALIGN).map_err(|_| Error::AllocFailed {
            bytes,
            location,
        })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::AllocFailed { bytes, location });
        }
        Ok(ptr as u64)
    }

    fn free_aligned(ptr: u64, bytes: usize) {
        if ptr == 0 || bytes == 0 {
            return;
        }
        let layout =
            AllocLayout::from_size_align(bytes, ALIGN).expect("invalid deallocation layout");
        unsafe {
            dealloc(ptr as *mut u8, layout);
        }
    }

    fn memcpy(src: u64, dst: u64, bytes: usize) {
        if bytes == 0 || src == 0 || dst == 0 {
            return;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, bytes);
        }
    }
}

impl Runtime for CpuRuntime {
    type Stream = CpuStream;
    type BlasHandle = ();

    fn name() -> &'static str {
        "cpu"
    }

    fn device_count(&self) -> usize {
        self.devices
    }

    fn alloc_host(&self, bytes: usize) -> Result<u64> {
        self.alloc_aligned(bytes, Location::Host)
    }

    fn free_host(&self, ptr: u64, bytes: usize) {
        Self::free_aligned(ptr, bytes);
    }

    fn alloc_device(&self, device: usize, bytes: usize) -> Result<u64> {
        self.check_device(device)?;
        self.alloc_aligned(bytes, Location::Device(device))
    }

    fn free_device(&self, _device: usize, ptr: u64, bytes: usize) {
        Self::free_aligned(ptr, bytes);
    }

    fn create_stream(&self, device: usize) -> Result<Self::Stream> {
        self.check_device(device)?;
        Ok(CpuStream { device })
    }

    fn create_blas_handle(
        &self,
        device: usize,
        _stream: &Self::Stream,
    ) -> Result<Self::BlasHandle> {
        self.check_device(device)?;
        Ok(())
    }

    fn sync_stream(&self, _stream: &Self::Stream) -> Result<()> {
        // Emulated transfers complete eagerly, nothing pending
        Ok(())
    }

    fn copy_to_device(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        _stream: &Self::Stream,
    ) -> Result<()> {
        self.check_device(device)?;
        Self::memcpy(src, dst, bytes);
        Ok(())
    }

    fn copy_to_host(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        _stream: &Self::Stream,
    ) -> Result<()> {
        self.check_device(device)?;
        Self::memcpy(src, dst, bytes);
        Ok(())
    }

    fn copy_on_host(&self, src: u64, dst: u64, bytes: usize) -> Result<()> {
        Self::memcpy(src, dst, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_roundtrip() {
        let rt = CpuRuntime::new();
        let ptr = rt.alloc_host(256).unwrap();
        assert_ne!(ptr, 0);
        assert_eq!(ptr % ALIGN as u64, 0);
        rt.free_host(ptr, 256);
    }

    #[test]
    fn test_zero_sized_alloc() {
        let rt = CpuRuntime::new();
        assert_eq!(rt.alloc_host(0).unwrap(), 0);
        rt.free_host(0, 0);
    }

    #[test]
    fn test_device_range_checked() {
        let rt = CpuRuntime::with_devices(2);
        assert!(rt.alloc_device(1, 64).is_ok());
        assert!(matches!(
            rt.alloc_device(2, 64),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_emulated_transfer() {
        let rt = CpuRuntime::with_devices(1);
        let stream = rt.create_stream(0).unwrap();

        let host = rt.alloc_host(64).unwrap();
        let dev = rt.alloc_device(0, 64).unwrap();

        unsafe {
            std::slice::from_raw_parts_mut(host as *mut u8, 64).fill(0xAB);
        }
        rt.copy_to_device(host, dev, 64, 0, &stream).unwrap();
        rt.sync_stream(&stream).unwrap();

        let back = rt.alloc_host(64).unwrap();
        rt.copy_to_host(dev, back, 64, 0, &stream).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(back as *const u8, 64) };
        assert!(bytes.iter().all(|&b| b == 0xAB));

        rt.free_host(host, 64);
        rt.free_host(back, 64);
        rt.free_device(0, dev, 64);
    }
}
