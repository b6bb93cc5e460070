//! Tiles and the structures that own them
//!
//! A [`Tile`] is one dense column-major block of a tiled matrix. Its block
//! comes from a [`TilePool`] (one fixed size class per matrix), its copies
//! are tracked per location by a [`TileRegistry`], and broadcast-received
//! copies are reclaimed through the [`LifetimeTracker`].

mod lifetime;
mod pool;
mod registry;

pub use lifetime::LifetimeTracker;
pub use pool::TilePool;
pub use registry::TileRegistry;

use crate::error::{Error, Result};
use crate::runtime::{Location, Runtime};
use crate::scalar::Scalar;
use std::marker::PhantomData;
use std::sync::Arc;

/// One dense column-major block of a tiled matrix
///
/// A tile knows its extent (`mb` rows by `nb` columns), its column stride,
/// where it lives (host or a device), and whether its storage is borrowed
/// from the caller (`origin`) or owned by the pool. Pool-backed tiles return
/// their block when dropped; origin tiles never free their data.
///
/// # Data discipline
///
/// The element block is addressed through a raw pointer, exactly as the
/// node-level kernels consume it. Writers (`copy_from`, receive paths) and
/// readers ([`Tile::as_slice`], [`Tile::get`]) must not race on the same
/// tile; the task graph above this crate is responsible for ordering
/// producers before consumers.
pub struct Tile<T: Scalar, R: Runtime> {
    mb: usize,
    nb: usize,
    stride: usize,
    data: u64,
    location: Location,
    origin: bool,
    pool: Arc<TilePool<R>>,
    _elem: PhantomData<T>,
}

impl<T: Scalar, R: Runtime> Tile<T, R> {
    /// Allocate an `mb x nb` host tile from the pool
    pub fn new(mb: usize, nb: usize, pool: &Arc<TilePool<R>>) -> Result<Self> {
        Self::new_at(mb, nb, Location::Host, pool)
    }

    /// Allocate an `mb x nb` tile from the pool at `location`
    pub fn new_at(
        mb: usize,
        nb: usize,
        location: Location,
        pool: &Arc<TilePool<R>>,
    ) -> Result<Self> {
        let bytes = mb * nb * std::mem::size_of::<T>();
        if bytes == 0 || bytes > pool.block_bytes() {
            return Err(Error::InvalidArgument {
                arg: "mb/nb",
                reason: format!(
                    "tile of {} bytes does not fit the pool's {}-byte blocks",
                    bytes,
                    pool.block_bytes()
                ),
            });
        }

        let data = pool.acquire(location)?;
        Ok(Self {
            mb,
            nb,
            stride: mb,
            data,
            location,
            origin: false,
            pool: pool.clone(),
            _elem: PhantomData,
        })
    }

    /// Wrap caller-owned host memory as an origin tile
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `lda * (nb - 1) + mb` elements of valid,
    /// writable memory that outlives the tile, and `lda >= mb`.
    pub unsafe fn from_raw(
        mb: usize,
        nb: usize,
        ptr: *mut T,
        lda: usize,
        pool: &Arc<TilePool<R>>,
    ) -> Self {
        debug_assert!(lda >= mb, "column stride shorter than the column");
        Self {
            mb,
            nb,
            stride: lda,
            data: ptr as u64,
            location: Location::Host,
            origin: true,
            pool: pool.clone(),
            _elem: PhantomData,
        }
    }

    /// Row extent in elements
    #[inline]
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Column extent in elements
    #[inline]
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Column stride in elements; `stride >= mb`
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Where this copy lives
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    /// True when the storage is borrowed from the caller
    #[inline]
    pub fn is_origin(&self) -> bool {
        self.origin
    }

    /// Raw address of the element block
    #[inline]
    pub fn data_ptr(&self) -> u64 {
        self.data
    }

    /// Size of the compact `mb * nb` element payload in bytes
    #[inline]
    pub fn bytes(&self) -> usize {
        self.mb * self.nb * std::mem::size_of::<T>()
    }

    /// View the elements of a contiguous host tile
    ///
    /// # Panics
    ///
    /// Panics when the tile is on a device or its stride exceeds `mb`
    /// (strided tiles have gaps that a flat slice would misrepresent).
    pub fn as_slice(&self) -> &[T] {
        assert!(self.location.is_host(), "as_slice on a device tile");
        assert_eq!(self.stride, self.mb, "as_slice on a strided tile");
        unsafe { std::slice::from_raw_parts(self.data as *const T, self.mb * self.nb) }
    }

    /// Read element `(r, c)` of a host tile
    pub fn get(&self, r: usize, c: usize) -> T {
        assert!(self.location.is_host(), "get on a device tile");
        assert!(r < self.mb && c < self.nb, "element index out of range");
        unsafe { *(self.data as *const T).add(c * self.stride + r) }
    }

    /// Blocking elementwise copy from a strided host array into this host
    /// tile
    pub fn copy_from(&self, a: &[T], lda: usize) -> Result<()> {
        self.check_host_op("copy_from", a.len(), lda)?;
        for c in 0..self.nb {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    a.as_ptr().add(c * lda),
                    (self.data as *mut T).add(c * self.stride),
                    self.mb,
                );
            }
        }
        Ok(())
    }

    /// Blocking elementwise copy from this host tile into a strided host
    /// array
    pub fn copy_into(&self, a: &mut [T], lda: usize) -> Result<()> {
        self.check_host_op("copy_into", a.len(), lda)?;
        for c in 0..self.nb {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    (self.data as *const T).add(c * self.stride),
                    a.as_mut_ptr().add(c * lda),
                    self.mb,
                );
            }
        }
        Ok(())
    }

    fn check_host_op(&self, op: &'static str, len: usize, lda: usize) -> Result<()> {
        if !self.location.is_host() {
            return Err(Error::InvalidArgument {
                arg: op,
                reason: format!("tile is resident at {}", self.location),
            });
        }
        if lda < self.mb || len < lda * (self.nb - 1) + self.mb {
            return Err(Error::InvalidArgument {
                arg: op,
                reason: format!(
                    "array of {} elements with stride {} cannot hold {} x {}",
                    len, lda, self.mb, self.nb
                ),
            });
        }
        Ok(())
    }

    /// Pack the element block into a contiguous vector (host tiles only)
    pub fn pack(&self) -> Result<Vec<T>> {
        let mut out = vec![T::zero(); self.mb * self.nb];
        self.copy_into(&mut out, self.mb)?;
        Ok(out)
    }

    /// Asynchronously copy this tile to `target`, returning the new copy
    ///
    /// The new tile preserves `mb`/`nb` and compacts the stride to `mb`.
    /// Device-bound copies are enqueued on `stream` and do not synchronize,
    /// except that a strided (origin) source is staged through a temporary
    /// and therefore completes before returning. Host-to-host copies are
    /// synchronous. The source is unaffected.
    pub fn copy_to(&self, target: Location, stream: &R::Stream, runtime: &R) -> Result<Self> {
        let dst = Self::new_at(self.mb, self.nb, target, &self.pool)?;
        let elem = std::mem::size_of::<T>();

        match (self.location, target) {
            (Location::Host, Location::Device(d)) => {
                if self.stride == self.mb {
                    runtime.copy_to_device(self.data, dst.data, self.bytes(), d, stream)?;
                } else {
                    // Staged copy; the temporary must outlive the transfer.
                    let packed = self.pack()?;
                    runtime.copy_to_device(
                        packed.as_ptr() as u64,
                        dst.data,
                        self.bytes(),
                        d,
                        stream,
                    )?;
                    runtime.sync_stream(stream)?;
                }
            }
            (Location::Device(d), Location::Host) => {
                debug_assert_eq!(self.stride, self.mb, "device tiles are compact");
                runtime.copy_to_host(self.data, dst.data, self.bytes(), d, stream)?;
            }
            (Location::Host, Location::Host) => {
                for c in 0..self.nb {
                    runtime.copy_on_host(
                        self.data + (c * self.stride * elem) as u64,
                        dst.data + (c * self.mb * elem) as u64,
                        self.mb * elem,
                    )?;
                }
            }
            (Location::Device(_), Location::Device(_)) => {
                return Err(Error::InvalidArgument {
                    arg: "target",
                    reason: "device-to-device tile copies are not supported".into(),
                });
            }
        }
        Ok(dst)
    }
}

impl<T: Scalar, R: Runtime> Drop for Tile<T, R> {
    fn drop(&mut self) {
        if !self.origin && self.data != 0 {
            self.pool.release(self.data, self.location);
        }
    }
}

impl<T: Scalar, R: Runtime> std::fmt::Debug for Tile<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("mb", &self.mb)
            .field("nb", &self.nb)
            .field("stride", &self.stride)
            .field("location", &self.location)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
