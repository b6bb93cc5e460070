//! CUDA runtime implementation
//!
//! Maps the [`Runtime`] seam onto the CUDA driver through cudarc. Contexts
//! are created once per device at construction; streams and cuBLAS handles
//! are minted on demand for the device contexts. Memory travels through the
//! driver `sys` API with explicit status checks, host blocks are page-locked
//! with `cuMemHostAlloc` so async copies and batch-pointer uploads overlap
//! with compute.

use super::Runtime;
use crate::error::{Error, Result};
use cudarc::cublas::CudaBlas;
use cudarc::driver::safe::{CudaContext, CudaStream};
use cudarc::driver::sys;
use std::sync::Arc;

/// CUDA runtime driving every device visible to the driver
pub struct CudaRuntime {
    contexts: Vec<Arc<CudaContext>>,
}

impl CudaRuntime {
    /// Initialize the driver and create a context per visible device
    pub fn new() -> Result<Self> {
        let count = CudaContext::device_count()? as usize;

        let mut contexts = Vec::with_capacity(count);
        for device in 0..count {
            contexts.push(CudaContext::new(device)?);
        }

        Ok(Self { contexts })
    }

    fn context(&self, device: usize) -> Result<&Arc<CudaContext>> {
        self.contexts.get(device).ok_or_else(|| Error::InvalidArgument {
            arg: "device",
            reason: format!(
                "device {} out of range (0..{})",
                device,
                self.contexts.len()
            ),
        })
    }

    fn check(result: sys::CUresult, direction: &'static str, bytes: usize) -> Result<()> {
        if result == sys::CUresult::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(Error::TransferFailed {
                direction,
                reason: format!("{} bytes ({:?})", bytes, result),
            })
        }
    }
}

impl Runtime for CudaRuntime {
    type Stream = Arc<CudaStream>;
    type BlasHandle = Arc<CudaBlas>;

    fn name() -> &'static str {
        "cuda"
    }

    fn device_count(&self) -> usize {
        self.contexts.len()
    }

    fn alloc_host(&self, bytes: usize) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }

        // Any context will do for pinned host memory; bind the first.
        let ctx = self.context(0)?;
        ctx.bind_to_thread()?;

        unsafe {
            let mut ptr: *mut std::ffi::c_void = std::ptr::null_mut();
            let result = sys::cuMemHostAlloc(&mut ptr, bytes, 0);
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::AllocFailed {
                    bytes,
                    location: super::Location::Host,
                });
            }
            Ok(ptr as u64)
        }
    }

    fn free_host(&self, ptr: u64, _bytes: usize) {
        if ptr == 0 {
            return;
        }
        unsafe {
            let result = sys::cuMemFreeHost(ptr as *mut std::ffi::c_void);
            if result != sys::CUresult::CUDA_SUCCESS {
                log::warn!("cuMemFreeHost failed for ptr 0x{:x}: {:?}", ptr, result);
            }
        }
    }

    fn alloc_device(&self, device: usize, bytes: usize) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }

        let ctx = self.context(device)?;
        ctx.bind_to_thread()?;

        unsafe {
            let mut dptr: sys::CUdeviceptr = 0;
            let result = sys::cuMemAlloc_v2(&mut dptr, bytes);
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::AllocFailed {
                    bytes,
                    location: super::Location::Device(device),
                });
            }
            Ok(dptr)
        }
    }

    fn free_device(&self, device: usize, ptr: u64, _bytes: usize) {
        if ptr == 0 {
            return;
        }
        let Ok(ctx) = self.context(device) else {
            return;
        };
        if ctx.bind_to_thread().is_err() {
            // Context is gone; the driver reclaims the memory
            return;
        }
        unsafe {
            let result = sys::cuMemFree_v2(ptr);
            if result != sys::CUresult::CUDA_SUCCESS {
                log::warn!("cuMemFree failed for ptr 0x{:x}: {:?}", ptr, result);
            }
        }
    }

    fn create_stream(&self, device: usize) -> Result<Self::Stream> {
        let ctx = self.context(device)?;
        Ok(ctx.new_stream()?)
    }

    fn create_blas_handle(
        &self,
        device: usize,
        stream: &Self::Stream,
    ) -> Result<Self::BlasHandle> {
        let ctx = self.context(device)?;
        ctx.bind_to_thread()?;
        let blas = CudaBlas::new(stream.clone()).map_err(|e| Error::TransferFailed {
            direction: "cublas-init",
            reason: format!("{:?}", e),
        })?;
        Ok(Arc::new(blas))
    }

    fn sync_stream(&self, stream: &Self::Stream) -> Result<()> {
        stream.synchronize()?;
        Ok(())
    }

    fn copy_to_device(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        stream: &Self::Stream,
    ) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let ctx = self.context(device)?;
        ctx.bind_to_thread()?;
        unsafe {
            let result = sys::cuMemcpyHtoDAsync_v2(
                dst,
                src as *const std::ffi::c_void,
                bytes,
                stream.cu_stream(),
            );
            Self::check(result, "host-to-device", bytes)
        }
    }

    fn copy_to_host(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        stream: &Self::Stream,
    ) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let ctx = self.context(device)?;
        ctx.bind_to_thread()?;
        unsafe {
            let result = sys::cuMemcpyDtoHAsync_v2(
                dst as *mut std::ffi::c_void,
                src,
                bytes,
                stream.cu_stream(),
            );
            Self::check(result, "device-to-host", bytes)
        }
    }

    fn copy_on_host(&self, src: u64, dst: u64, bytes: usize) -> Result<()> {
        if bytes == 0 || src == 0 || dst == 0 {
            return Ok(());
        }
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, bytes);
        }
        Ok(())
    }
}
