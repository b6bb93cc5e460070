//! Device backends for tile storage and motion
//!
//! This module defines the [`Runtime`] trait, the seam between the tile
//! substrate and the machine it runs on. A runtime owns the memory spaces
//! (the host plus `N` accelerator devices), the asynchronous copy engines
//! between them, and the per-device stream and BLAS-handle factories that
//! [`crate::matrix::DeviceContext`] draws from.
//!
//! # Architecture
//!
//! ```text
//! Runtime (backend identity)
//! ├── Location   (host or one of N devices)
//! ├── Stream     (FIFO queue of transfers/kernels on one device)
//! └── BlasHandle (accelerator BLAS bound to a compute stream)
//! ```
//!
//! [`CpuRuntime`] is always available and can emulate device heaps in host
//! memory, so the full motion and broadcast machinery runs on CPU-only
//! builds; `CudaRuntime` (feature `cuda`) maps the same seam onto the CUDA
//! driver.

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use cpu::CpuRuntime;

use crate::error::Result;
use std::fmt;

/// A memory space: the host or one of the accelerator devices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// Host (CPU) memory
    Host,
    /// Device memory on the accelerator with this index
    Device(usize),
}

impl Location {
    /// True for the host location
    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self, Location::Host)
    }

    /// The device index, or `None` for the host
    #[inline]
    pub fn device(&self) -> Option<usize> {
        match self {
            Location::Host => None,
            Location::Device(d) => Some(*d),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => write!(f, "host"),
            Location::Device(d) => write!(f, "device:{}", d),
        }
    }
}

/// Core trait for compute backends
///
/// Memory is addressed as `u64` (a device pointer, or a host pointer cast to
/// an integer), so the same tile and pool code paths serve every backend.
/// Host allocations are page-locked where the backend supports it, which is
/// what makes the async copies and batched-kernel pointer uploads effective.
///
/// # Asynchrony
///
/// `copy_to_device` / `copy_to_host` enqueue on the given stream and may
/// return before the transfer completes; completion is observed with
/// [`Runtime::sync_stream`]. `copy_on_host` is synchronous. Backends without
/// real copy engines (the CPU runtime) are permitted to complete transfers
/// eagerly.
pub trait Runtime: Send + Sync + 'static {
    /// FIFO queue of transfers and kernels on one device
    type Stream: Send + Sync;

    /// Accelerator BLAS handle bound to a stream
    type BlasHandle: Send + Sync;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Number of accelerator devices this runtime drives
    fn device_count(&self) -> usize;

    /// Allocate zeroed host memory, page-locked where supported
    fn alloc_host(&self, bytes: usize) -> Result<u64>;

    /// Free a host allocation
    fn free_host(&self, ptr: u64, bytes: usize);

    /// Allocate device memory on `device`
    fn alloc_device(&self, device: usize, bytes: usize) -> Result<u64>;

    /// Free a device allocation
    fn free_device(&self, device: usize, ptr: u64, bytes: usize);

    /// Create a stream on `device`
    fn create_stream(&self, device: usize) -> Result<Self::Stream>;

    /// Create a BLAS handle on `device`, bound to `stream`
    fn create_blas_handle(&self, device: usize, stream: &Self::Stream) -> Result<Self::BlasHandle>;

    /// Block until every operation enqueued on `stream` has completed
    fn sync_stream(&self, stream: &Self::Stream) -> Result<()>;

    /// Enqueue a host-to-device copy of `bytes` bytes on `stream`
    fn copy_to_device(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Enqueue a device-to-host copy of `bytes` bytes on `stream`
    fn copy_to_host(
        &self,
        src: u64,
        dst: u64,
        bytes: usize,
        device: usize,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Synchronous host-to-host copy
    fn copy_on_host(&self, src: u64, dst: u64, bytes: usize) -> Result<()>;

    /// Allocate at an arbitrary location
    fn alloc(&self, location: Location, bytes: usize) -> Result<u64> {
        match location {
            Location::Host => self.alloc_host(bytes),
            Location::Device(d) => self.alloc_device(d, bytes),
        }
    }

    /// Free at an arbitrary location
    fn free(&self, location: Location, ptr: u64, bytes: usize) {
        match location {
            Location::Host => self.free_host(ptr, bytes),
            Location::Device(d) => self.free_device(d, ptr, bytes),
        }
    }
}
