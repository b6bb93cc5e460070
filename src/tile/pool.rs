//! Slab pool for tile blocks
//!
//! Every tile of a matrix has the same capacity, `nb * nb` elements, so the
//! pool allocates a single fixed block size and keeps one intrusive
//! free-list per location (host, plus one per device). Fixed-size blocks
//! collapse fragmentation to zero, and batched kernels get their pinned
//! allocations from one contiguous size class.

use crate::error::Result;
use crate::runtime::{Location, Runtime};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct FreeList {
    free: Vec<u64>,
    allocated: usize,
}

/// Fixed-block-size slab allocator with per-location free-lists
///
/// Blocks acquired at a location are only ever released at that location;
/// the per-location lists make that invariant structural. Each list has its
/// own lock, so acquire/release on different locations never contend.
pub struct TilePool<R: Runtime> {
    runtime: Arc<R>,
    block_bytes: usize,
    host: Mutex<FreeList>,
    devices: Vec<Mutex<FreeList>>,
}

impl<R: Runtime> TilePool<R> {
    /// Create a pool handing out blocks of `block_bytes` bytes, with one
    /// device free-list per device the runtime reports
    pub fn new(runtime: Arc<R>, block_bytes: usize) -> Self {
        let devices = (0..runtime.device_count())
            .map(|_| Mutex::new(FreeList::default()))
            .collect();
        Self {
            runtime,
            block_bytes,
            host: Mutex::new(FreeList::default()),
            devices,
        }
    }

    /// Size of every block this pool hands out
    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// The runtime backing this pool's allocations
    #[inline]
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    fn list(&self, location: Location) -> Result<&Mutex<FreeList>> {
        match location {
            Location::Host => Ok(&self.host),
            Location::Device(d) => {
                self.devices
                    .get(d)
                    .ok_or_else(|| crate::error::Error::InvalidArgument {
                        arg: "location",
                        reason: format!(
                            "device {} out of range (0..{})",
                            d,
                            self.devices.len()
                        ),
                    })
            }
        }
    }

    fn grow(&self, list: &mut FreeList, location: Location, count: usize) -> Result<()> {
        for _ in 0..count {
            let ptr = self.runtime.alloc(location, self.block_bytes)?;
            list.free.push(ptr);
            list.allocated += 1;
        }
        Ok(())
    }

    /// Pre-allocate `count` host blocks
    pub fn reserve_host(&self, count: usize) -> Result<()> {
        let mut list = self.host.lock();
        self.grow(&mut list, Location::Host, count)
    }

    /// Pre-allocate `count` blocks on `device`
    pub fn reserve_device(&self, device: usize, count: usize) -> Result<()> {
        let location = Location::Device(device);
        let mut list = self.list(location)?.lock();
        self.grow(&mut list, location, count)
    }

    /// Take a block from `location`'s free-list, growing it lazily when empty
    pub fn acquire(&self, location: Location) -> Result<u64> {
        let mut list = self.list(location)?.lock();
        if let Some(ptr) = list.free.pop() {
            return Ok(ptr);
        }
        log::trace!(
            "pool growing at {}: {} blocks of {} bytes in use",
            location,
            list.allocated,
            self.block_bytes
        );
        self.grow(&mut list, location, 1)?;
        Ok(list.free.pop().expect("freshly grown free-list is non-empty"))
    }

    /// Return a block to `location`'s free-list
    ///
    /// The block must have been acquired at the same location.
    pub fn release(&self, ptr: u64, location: Location) {
        debug_assert_ne!(ptr, 0, "releasing a null block");
        if let Ok(list) = self.list(location) {
            list.lock().free.push(ptr);
        } else {
            debug_assert!(false, "release at unknown location {}", location);
        }
    }

    /// Total blocks ever allocated at `location`
    pub fn allocated(&self, location: Location) -> usize {
        self.list(location).map(|l| l.lock().allocated).unwrap_or(0)
    }

    /// Blocks currently sitting in `location`'s free-list
    pub fn available(&self, location: Location) -> usize {
        self.list(location).map(|l| l.lock().free.len()).unwrap_or(0)
    }
}

impl<R: Runtime> Drop for TilePool<R> {
    fn drop(&mut self) {
        let host = self.host.get_mut();
        debug_assert_eq!(
            host.free.len(),
            host.allocated,
            "host blocks still outstanding at pool teardown"
        );
        for ptr in host.free.drain(..) {
            self.runtime.free_host(ptr, self.block_bytes);
        }

        for (d, list) in self.devices.iter_mut().enumerate() {
            let list = list.get_mut();
            debug_assert_eq!(
                list.free.len(),
                list.allocated,
                "device {} blocks still outstanding at pool teardown",
                d
            );
            for ptr in list.free.drain(..) {
                self.runtime.free_device(d, ptr, self.block_bytes);
            }
        }
    }
}
