//! Per-device scratch for batched kernels
//!
//! Each device a matrix touches gets a [`DeviceContext`]: a compute stream,
//! a communication stream (so transfers overlap kernels), a BLAS handle
//! bound to the compute stream, and three pinned-host pointer arrays with
//! device mirrors. A batched kernel call stages the per-tile `a/b/c`
//! pointers into the host arrays, uploads them on the compute stream, and
//! launches against the device mirrors.

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::sync::Arc;

const PTR_BYTES: usize = std::mem::size_of::<u64>();

struct BatchArrays {
    capacity: usize,
    a_host: u64,
    b_host: u64,
    c_host: u64,
    a_dev: u64,
    b_dev: u64,
    c_dev: u64,
}

/// Streams, BLAS handle, and batch pointer scratch for one device
///
/// Created at matrix construction, shared by every view of the matrix, and
/// torn down when the last view drops.
pub struct DeviceContext<R: Runtime> {
    runtime: Arc<R>,
    device: usize,
    compute_stream: R::Stream,
    comm_stream: R::Stream,
    blas: R::BlasHandle,
    batch: Mutex<BatchArrays>,
}

impl<R: Runtime> DeviceContext<R> {
    /// Build the context for `device` with pointer arrays of `capacity`
    /// entries
    ///
    /// `capacity` must be at least the matrix's `max_local_tiles` for this
    /// device; a batched kernel never stages more tiles than that.
    pub fn new(runtime: Arc<R>, device: usize, capacity: usize) -> Result<Self> {
        let compute_stream = runtime.create_stream(device)?;
        let comm_stream = runtime.create_stream(device)?;
        let blas = runtime.create_blas_handle(device, &compute_stream)?;

        let bytes = capacity * PTR_BYTES;
        let batch = BatchArrays {
            capacity,
            a_host: runtime.alloc_host(bytes)?,
            b_host: runtime.alloc_host(bytes)?,
            c_host: runtime.alloc_host(bytes)?,
            a_dev: runtime.alloc_device(device, bytes)?,
            b_dev: runtime.alloc_device(device, bytes)?,
            c_dev: runtime.alloc_device(device, bytes)?,
        };

        Ok(Self {
            runtime,
            device,
            compute_stream,
            comm_stream,
            blas,
            batch: Mutex::new(batch),
        })
    }

    /// Device this context drives
    #[inline]
    pub fn device(&self) -> usize {
        self.device
    }

    /// Stream batched kernels launch on
    #[inline]
    pub fn compute_stream(&self) -> &R::Stream {
        &self.compute_stream
    }

    /// Stream tile transfers ride on
    #[inline]
    pub fn comm_stream(&self) -> &R::Stream {
        &self.comm_stream
    }

    /// BLAS handle bound to the compute stream
    #[inline]
    pub fn blas(&self) -> &R::BlasHandle {
        &self.blas
    }

    /// Number of pointer entries each batch array holds
    pub fn capacity(&self) -> usize {
        self.batch.lock().capacity
    }

    /// Device addresses of the three pointer-array mirrors `(a, b, c)`
    ///
    /// Valid for kernel launches after [`DeviceContext::stage_batch`]
    /// returns.
    pub fn device_arrays(&self) -> (u64, u64, u64) {
        let batch = self.batch.lock();
        (batch.a_dev, batch.b_dev, batch.c_dev)
    }

    /// Fill the host pointer arrays and upload them on the compute stream
    ///
    /// The three slices must have equal length, at most `capacity`. The
    /// upload is enqueued; a kernel launched afterwards on the same stream
    /// observes it in order.
    pub fn stage_batch(&self, a: &[u64], b: &[u64], c: &[u64]) -> Result<()> {
        let batch = self.batch.lock();

        if a.len() != b.len() || a.len() != c.len() {
            return Err(Error::InvalidArgument {
                arg: "a/b/c",
                reason: format!(
                    "pointer array lengths differ: {} / {} / {}",
                    a.len(),
                    b.len(),
                    c.len()
                ),
            });
        }
        if a.len() > batch.capacity {
            return Err(Error::InvalidArgument {
                arg: "a/b/c",
                reason: format!(
                    "batch of {} tiles exceeds context capacity {}",
                    a.len(),
                    batch.capacity
                ),
            });
        }
        if a.is_empty() {
            return Ok(());
        }

        let bytes = a.len() * PTR_BYTES;
        for (src, host, dev) in [
            (a, batch.a_host, batch.a_dev),
            (b, batch.b_host, batch.b_dev),
            (c, batch.c_host, batch.c_dev),
        ] {
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), host as *mut u64, src.len());
            }
            self.runtime
                .copy_to_device(host, dev, bytes, self.device, &self.compute_stream)?;
        }
        Ok(())
    }

    /// Block until the compute stream drains
    pub fn sync_compute(&self) -> Result<()> {
        self.runtime.sync_stream(&self.compute_stream)
    }

    /// Block until the communication stream drains
    pub fn sync_comm(&self) -> Result<()> {
        self.runtime.sync_stream(&self.comm_stream)
    }
}

impl<R: Runtime> Drop for DeviceContext<R> {
    fn drop(&mut self) {
        let batch = self.batch.get_mut();
        let bytes = batch.capacity * PTR_BYTES;
        self.runtime.free_host(batch.a_host, bytes);
        self.runtime.free_host(batch.b_host, bytes);
        self.runtime.free_host(batch.c_host, bytes);
        self.runtime.free_device(self.device, batch.a_dev, bytes);
        self.runtime.free_device(self.device, batch.b_dev, bytes);
        self.runtime.free_device(self.device, batch.c_dev, bytes);
    }
}
