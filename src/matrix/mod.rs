//! The distributed tiled matrix handle
//!
//! [`Matrix`] is the type numerical routines program against. It composes a
//! [`Distribution`] (who owns which tile, and on which device), a
//! [`TileRegistry`] (which copies exist right now on this rank), a
//! [`TilePool`] (where their blocks come from), a [`Communicator`] (how
//! tiles cross ranks), and one [`DeviceContext`] per device. Submatrix
//! views share all of that and only carry their own tile offsets, so a
//! panel of a matrix is as cheap as a pair of integers.

mod context;
mod distribution;

pub use context::DeviceContext;
pub use distribution::{BlockCyclic, Distribution, ProcessGrid};

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::runtime::{Location, Runtime};
use crate::scalar::Scalar;
use crate::tile::{LifetimeTracker, Tile, TilePool, TileRegistry};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Tag under which tile payloads travel point-to-point
const TILE_TAG: u64 = 0;

/// Where a broadcast should leave the delivered tile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// Deliver to the host only
    #[default]
    Host,
    /// Deliver to the host, then fan out to every device
    Devices,
}

/// Which tiles of the grid a collaborator actually stores
///
/// Hermitian routines store one triangle; whole-matrix iteration (fills,
/// gather, local-tile counting) consults this instead of assuming either
/// shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageShape {
    /// Every tile of the grid
    #[default]
    Full,
    /// Tiles on or below the diagonal (`j <= i`)
    Lower,
}

impl StorageShape {
    /// Columns stored in tile row `i` of an `nt`-column grid
    #[inline]
    pub fn cols_for_row(&self, i: usize, nt: usize) -> std::ops::Range<usize> {
        match self {
            StorageShape::Full => 0..nt,
            StorageShape::Lower => 0..nt.min(i + 1),
        }
    }
}

/// An inclusive rectangle of tile positions, `[i1..i2] x [j1..j2]`
///
/// Consumer ranges for [`Matrix::tile_bcast`]: the set of tile positions
/// whose owners will read the broadcast tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRange {
    /// First tile row
    pub i1: usize,
    /// Last tile row, inclusive
    pub i2: usize,
    /// First tile column
    pub j1: usize,
    /// Last tile column, inclusive
    pub j2: usize,
}

impl TileRange {
    /// Range covering `[i1..i2] x [j1..j2]`, both ends inclusive
    pub fn new(i1: usize, i2: usize, j1: usize, j2: usize) -> Self {
        Self { i1, i2, j1, j2 }
    }

    /// Every tile position in the range, row-major
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> {
        let (j1, j2) = (self.j1, self.j2);
        (self.i1..=self.i2).flat_map(move |i| (j1..=j2).map(move |j| (i, j)))
    }
}

struct MatrixCore<T: Scalar, R: Runtime> {
    m: usize,
    n: usize,
    nb: usize,
    /// Global tile-grid extents
    mt: usize,
    nt: usize,
    shape: StorageShape,
    dist: Box<dyn Distribution>,
    registry: TileRegistry<T, R>,
    lives: LifetimeTracker,
    pool: Arc<TilePool<R>>,
    runtime: Arc<R>,
    comm: Arc<dyn Communicator>,
    /// Serializes every transport call on this rank
    transport: Mutex<()>,
    contexts: Vec<DeviceContext<R>>,
    rank: usize,
    world: usize,
    num_devices: usize,
}

/// Distributed tiled matrix, or a view into one
///
/// Cloning (or [`Matrix::submatrix`]) produces a view: the registry, pool,
/// lifetime tracker, communicator, and device contexts are shared with the
/// parent, and only the tile offsets differ. Whatever view inserts a tile,
/// every other view of the same matrix observes it. Teardown happens when
/// the last view drops: registry entries release their blocks to the pool,
/// then the pool returns everything to the runtime.
pub struct Matrix<T: Scalar, R: Runtime> {
    /// First tile row of this view in the global grid
    it: usize,
    /// First tile column of this view in the global grid
    jt: usize,
    /// Tile rows in this view
    mt: usize,
    /// Tile columns in this view
    nt: usize,
    core: Arc<MatrixCore<T, R>>,
}

impl<T: Scalar, R: Runtime> Clone for Matrix<T, R> {
    fn clone(&self) -> Self {
        Self {
            it: self.it,
            jt: self.jt,
            mt: self.mt,
            nt: self.nt,
            core: self.core.clone(),
        }
    }
}

fn local_tile_count(
    dist: &dyn Distribution,
    shape: StorageShape,
    mt: usize,
    nt: usize,
    rank: usize,
    device: Option<usize>,
) -> usize {
    let mut count = 0;
    for i in 0..mt {
        for j in shape.cols_for_row(i, nt) {
            if dist.owner_rank(i, j) == rank
                && device.map_or(true, |d| dist.device(i, j) == Some(d))
            {
                count += 1;
            }
        }
    }
    count
}

impl<T: Scalar, R: Runtime> Matrix<T, R> {
    /// Create an `m x n` matrix in `nb`-sized tiles, block-cyclic over
    /// `grid`, with no tiles materialized yet
    ///
    /// The communicator's size must match the grid. Use
    /// [`Matrix::insert_local_tiles`], [`Matrix::fill_random`], or
    /// [`Matrix::copy_from_host`] to materialize the local tiles.
    pub fn new(
        m: usize,
        n: usize,
        nb: usize,
        shape: StorageShape,
        grid: ProcessGrid,
        runtime: Arc<R>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        if grid.size() != comm.size() {
            return Err(Error::InvalidArgument {
                arg: "grid",
                reason: format!(
                    "{}x{} grid does not cover a {}-rank communicator",
                    grid.p(),
                    grid.q(),
                    comm.size()
                ),
            });
        }
        let dist = Box::new(BlockCyclic::new(m, n, nb, grid, runtime.device_count()));
        Self::with_distribution(m, n, nb, shape, dist, runtime, comm)
    }

    /// Like [`Matrix::new`], with a caller-supplied distribution
    ///
    /// The distribution must be pure and total over the tile grid; the core
    /// only ever consults it through this matrix.
    pub fn with_distribution(
        m: usize,
        n: usize,
        nb: usize,
        shape: StorageShape,
        dist: Box<dyn Distribution>,
        runtime: Arc<R>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        if m == 0 || n == 0 || nb == 0 {
            return Err(Error::InvalidArgument {
                arg: "m/n/nb",
                reason: format!("degenerate matrix {}x{} with nb={}", m, n, nb),
            });
        }

        let mt = m.div_ceil(nb);
        let nt = n.div_ceil(nb);
        let rank = comm.rank();
        let world = comm.size();
        let num_devices = runtime.device_count();

        let pool = Arc::new(TilePool::new(
            runtime.clone(),
            nb * nb * std::mem::size_of::<T>(),
        ));
        pool.reserve_host(local_tile_count(dist.as_ref(), shape, mt, nt, rank, None))?;

        let contexts = (0..num_devices)
            .map(|d| {
                let capacity = local_tile_count(dist.as_ref(), shape, mt, nt, rank, Some(d));
                DeviceContext::new(runtime.clone(), d, capacity)
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "matrix {}x{} nb={} ({}x{} tiles) on rank {}/{} with {} devices",
            m,
            n,
            nb,
            mt,
            nt,
            rank,
            world,
            num_devices
        );

        Ok(Self {
            it: 0,
            jt: 0,
            mt,
            nt,
            core: Arc::new(MatrixCore {
                m,
                n,
                nb,
                mt,
                nt,
                shape,
                dist,
                registry: TileRegistry::new(),
                lives: LifetimeTracker::new(),
                pool,
                runtime,
                comm,
                transport: Mutex::new(()),
                contexts,
                rank,
                world,
                num_devices,
            }),
        })
    }

    /// Create and fill local tiles from a column-major host array
    pub fn from_host_data(
        m: usize,
        n: usize,
        a: &[T],
        lda: usize,
        nb: usize,
        shape: StorageShape,
        grid: ProcessGrid,
        runtime: Arc<R>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let matrix = Self::new(m, n, nb, shape, grid, runtime, comm)?;
        matrix.copy_from_host(a, lda)?;
        Ok(matrix)
    }

    /// Create and fill local tiles with reproducible random data,
    /// diagonally dominant on the diagonal tiles
    pub fn random(
        m: usize,
        n: usize,
        nb: usize,
        shape: StorageShape,
        grid: ProcessGrid,
        runtime: Arc<R>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let matrix = Self::new(m, n, nb, shape, grid, runtime, comm)?;
        matrix.fill_random()?;
        Ok(matrix)
    }

    // ------------------------------------------------------------------
    // Geometry and distribution queries
    // ------------------------------------------------------------------

    /// Global element rows
    #[inline]
    pub fn m(&self) -> usize {
        self.core.m
    }

    /// Global element columns
    #[inline]
    pub fn n(&self) -> usize {
        self.core.n
    }

    /// Tile size
    #[inline]
    pub fn nb(&self) -> usize {
        self.core.nb
    }

    /// Tile rows in this view
    #[inline]
    pub fn mt(&self) -> usize {
        self.mt
    }

    /// Tile columns in this view
    #[inline]
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// First tile row of this view in the global grid
    #[inline]
    pub fn it(&self) -> usize {
        self.it
    }

    /// First tile column of this view in the global grid
    #[inline]
    pub fn jt(&self) -> usize {
        self.jt
    }

    /// This rank's index in the communicator
    #[inline]
    pub fn rank(&self) -> usize {
        self.core.rank
    }

    /// Number of ranks in the communicator
    #[inline]
    pub fn world_size(&self) -> usize {
        self.core.world
    }

    /// Number of devices on this rank
    #[inline]
    pub fn num_devices(&self) -> usize {
        self.core.num_devices
    }

    /// Storage shape whole-matrix iteration honors
    #[inline]
    pub fn shape(&self) -> StorageShape {
        self.core.shape
    }

    /// The communicator this matrix coordinates over
    #[inline]
    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.core.comm
    }

    /// The runtime backing this matrix's memory
    #[inline]
    pub fn runtime(&self) -> &Arc<R> {
        &self.core.runtime
    }

    /// The pool tile blocks come from
    #[inline]
    pub fn pool(&self) -> &Arc<TilePool<R>> {
        &self.core.pool
    }

    /// The registry of materialized tile copies on this rank
    #[inline]
    pub fn registry(&self) -> &TileRegistry<T, R> {
        &self.core.registry
    }

    /// Scratch context for `device`
    pub fn context(&self, device: usize) -> Result<&DeviceContext<R>> {
        self.core
            .contexts
            .get(device)
            .ok_or_else(|| Error::InvalidArgument {
                arg: "device",
                reason: format!(
                    "device {} out of range (0..{})",
                    device, self.core.num_devices
                ),
            })
    }

    #[inline]
    fn global(&self, i: usize, j: usize) -> (usize, usize) {
        (self.it + i, self.jt + j)
    }

    /// Rank that owns tile `(i, j)` of this view
    #[inline]
    pub fn owner_rank(&self, i: usize, j: usize) -> usize {
        let (gi, gj) = self.global(i, j);
        self.core.dist.owner_rank(gi, gj)
    }

    /// Device tile `(i, j)` prefers, `None` for the host
    #[inline]
    pub fn device_of(&self, i: usize, j: usize) -> Option<usize> {
        let (gi, gj) = self.global(i, j);
        self.core.dist.device(gi, gj)
    }

    /// Height in elements of tile row `i`
    #[inline]
    pub fn row_height(&self, i: usize) -> usize {
        self.core.dist.row_height(self.it + i)
    }

    /// Width in elements of tile column `j`
    #[inline]
    pub fn col_width(&self, j: usize) -> usize {
        self.core.dist.col_width(self.jt + j)
    }

    /// True when this rank owns tile `(i, j)`
    #[inline]
    pub fn is_local(&self, i: usize, j: usize) -> bool {
        self.owner_rank(i, j) == self.core.rank
    }

    /// Count of this rank's tiles matching `location`
    ///
    /// `Host` counts every local tile; `Device(d)` counts local tiles the
    /// distribution places on device `d`. Only the stored shape is
    /// iterated, so a `Lower` matrix counts its lower triangle.
    pub fn max_local_tiles(&self, location: Location) -> usize {
        let mut count = 0;
        for i in 0..self.mt {
            for j in self.core.shape.cols_for_row(i, self.nt) {
                if self.is_local(i, j)
                    && location
                        .device()
                        .map_or(true, |d| self.device_of(i, j) == Some(d))
                {
                    count += 1;
                }
            }
        }
        count
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// View of tile rows `i1..=i2` and columns `j1..=j2` of this view
    ///
    /// The view shares the registry, pool, lifetime tracker, and device
    /// contexts with the parent; its tile `(0, 0)` is the parent's
    /// `(i1, j1)`.
    pub fn submatrix(&self, i1: usize, i2: usize, j1: usize, j2: usize) -> Result<Self> {
        if i1 > i2 || j1 > j2 || i2 >= self.mt || j2 >= self.nt {
            return Err(Error::InvalidArgument {
                arg: "i1/i2/j1/j2",
                reason: format!(
                    "bounds [{}..{}] x [{}..{}] outside a {} x {} view",
                    i1, i2, j1, j2, self.mt, self.nt
                ),
            });
        }
        Ok(Self {
            it: self.it + i1,
            jt: self.jt + j1,
            mt: i2 - i1 + 1,
            nt: j2 - j1 + 1,
            core: self.core.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Tile access and materialization
    // ------------------------------------------------------------------

    fn check_index(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.mt || j >= self.nt {
            return Err(Error::InvalidArgument {
                arg: "i/j",
                reason: format!("tile ({}, {}) outside a {} x {} view", i, j, self.mt, self.nt),
            });
        }
        Ok(())
    }

    /// The host copy of tile `(i, j)`
    pub fn tile(&self, i: usize, j: usize) -> Result<Arc<Tile<T, R>>> {
        self.tile_at(i, j, Location::Host)
    }

    /// The copy of tile `(i, j)` at `location`
    ///
    /// Fails with [`Error::NotResident`] when no copy exists there —
    /// requesting a tile that was never materialized, delivered, or moved
    /// to that location is a caller bug.
    pub fn tile_at(&self, i: usize, j: usize, location: Location) -> Result<Arc<Tile<T, R>>> {
        self.check_index(i, j)?;
        let (gi, gj) = self.global(i, j);
        self.core
            .registry
            .find(gi, gj, location)
            .ok_or(Error::NotResident { i, j, location })
    }

    /// Materialize every local tile of the stored shape on the host,
    /// leaving existing tiles in place
    pub fn insert_local_tiles(&self) -> Result<()> {
        for i in 0..self.mt {
            for j in self.core.shape.cols_for_row(i, self.nt) {
                if !self.is_local(i, j) {
                    continue;
                }
                let (gi, gj) = self.global(i, j);
                if self.core.registry.contains(gi, gj, Location::Host) {
                    continue;
                }
                let tile = Tile::new(self.row_height(i), self.col_width(j), &self.core.pool)?;
                self.core.registry.insert(gi, gj, Arc::new(tile));
            }
        }
        Ok(())
    }

    /// Wrap caller-owned memory as this rank's local tiles
    ///
    /// Each local tile of the stored shape becomes an origin tile pointing
    /// into `a` at its block-cyclic offset. Origin tiles are never freed by
    /// the matrix.
    ///
    /// # Safety
    ///
    /// `a` must point to a column-major array of at least
    /// `lda * (view columns - 1) + view rows` elements with `lda` at least
    /// the view's element height, valid and writable for the matrix's
    /// lifetime.
    pub unsafe fn attach_host_tiles(&self, a: *mut T, lda: usize) -> Result<()> {
        let mut row_off = 0;
        for i in 0..self.mt {
            let mb = self.row_height(i);
            let mut col_off = 0;
            for j in 0..self.nt {
                let nbj = self.col_width(j);
                if self.core.shape.cols_for_row(i, self.nt).contains(&j) && self.is_local(i, j) {
                    let (gi, gj) = self.global(i, j);
                    let tile = Tile::from_raw(
                        mb,
                        nbj,
                        a.add(col_off * lda + row_off),
                        lda,
                        &self.core.pool,
                    );
                    self.core.registry.insert(gi, gj, Arc::new(tile));
                }
                col_off += nbj;
            }
            row_off += mb;
        }
        Ok(())
    }

    fn view_elems(&self) -> (usize, usize) {
        let rows = (0..self.mt).map(|i| self.row_height(i)).sum();
        let cols = (0..self.nt).map(|j| self.col_width(j)).sum();
        (rows, cols)
    }

    fn check_host_array(&self, len: usize, lda: usize) -> Result<()> {
        let (rows, cols) = self.view_elems();
        if lda < rows || len < lda * (cols - 1) + rows {
            return Err(Error::InvalidArgument {
                arg: "a/lda",
                reason: format!(
                    "array of {} elements with lda {} cannot hold {} x {}",
                    len, lda, rows, cols
                ),
            });
        }
        Ok(())
    }

    /// Copy this view's local tiles in from a column-major host array
    ///
    /// Tiles are materialized as needed; existing tiles are overwritten.
    pub fn copy_from_host(&self, a: &[T], lda: usize) -> Result<()> {
        self.check_host_array(a.len(), lda)?;
        self.insert_local_tiles()?;

        let mut row_off = 0;
        for i in 0..self.mt {
            let mut col_off = 0;
            for j in 0..self.nt {
                if self.core.shape.cols_for_row(i, self.nt).contains(&j) && self.is_local(i, j) {
                    let tile = self.tile(i, j)?;
                    tile.copy_from(&a[col_off * lda + row_off..], lda)?;
                }
                col_off += self.col_width(j);
            }
            row_off += self.row_height(i);
        }
        Ok(())
    }

    /// Copy this view's local tiles out to a column-major host array
    pub fn copy_into_host(&self, a: &mut [T], lda: usize) -> Result<()> {
        self.check_host_array(a.len(), lda)?;

        let mut row_off = 0;
        for i in 0..self.mt {
            let mut col_off = 0;
            for j in 0..self.nt {
                if self.core.shape.cols_for_row(i, self.nt).contains(&j) && self.is_local(i, j) {
                    let tile = self.tile(i, j)?;
                    tile.copy_into(&mut a[col_off * lda + row_off..], lda)?;
                }
                col_off += self.col_width(j);
            }
            row_off += self.row_height(i);
        }
        Ok(())
    }

    fn local_coords(&self) -> Vec<(usize, usize)> {
        let mut coords = Vec::new();
        for i in 0..self.mt {
            for j in self.core.shape.cols_for_row(i, self.nt) {
                if self.is_local(i, j) {
                    coords.push((i, j));
                }
            }
        }
        coords
    }

    fn random_tile(&self, i: usize, j: usize) -> Result<Tile<T, R>> {
        let (gi, gj) = self.global(i, j);
        let mb = self.row_height(i);
        let nbj = self.col_width(j);
        let tile = Tile::new(mb, nbj, &self.core.pool)?;

        // Seeded from the global position, so refilling is reproducible and
        // every rank would generate the same tile at the same coordinates.
        let mut rng = StdRng::seed_from_u64(((gi as u64) << 32) ^ gj as u64);
        let mut vals = vec![T::zero(); mb * nbj];
        for v in vals.iter_mut() {
            *v = T::sample_uniform(&mut rng);
        }
        if gi == gj {
            let bump = T::from_f64((self.core.nb * self.core.nt) as f64);
            for k in 0..mb.min(nbj) {
                vals[k * mb + k] += bump;
            }
        }
        tile.copy_from(&vals, mb)?;
        Ok(tile)
    }

    /// Fill this view's local tiles with reproducible random data
    ///
    /// Diagonal tiles get `nb * nt` added to their diagonal, keeping
    /// random Hermitian test matrices diagonally dominant and therefore
    /// positive definite.
    pub fn fill_random(&self) -> Result<()> {
        let coords = self.local_coords();

        #[cfg(feature = "rayon")]
        let filled: Result<Vec<_>> = {
            use rayon::prelude::*;
            coords
                .par_iter()
                .map(|&(i, j)| self.random_tile(i, j).map(|t| ((i, j), t)))
                .collect()
        };
        #[cfg(not(feature = "rayon"))]
        let filled: Result<Vec<_>> = coords
            .iter()
            .map(|&(i, j)| self.random_tile(i, j).map(|t| ((i, j), t)))
            .collect();

        for ((i, j), tile) in filled? {
            let (gi, gj) = self.global(i, j);
            self.core.registry.insert(gi, gj, Arc::new(tile));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tile motion
    // ------------------------------------------------------------------

    /// Copy tile `(i, j)` to `device`, preserving the host copy
    ///
    /// No-op when the tile is already resident there, or when the rank has
    /// no devices. The copy rides the device's communication stream.
    pub fn copy_to_device(&self, i: usize, j: usize, device: usize) -> Result<()> {
        self.check_index(i, j)?;
        if self.core.num_devices == 0 {
            return Ok(());
        }
        let ctx = self.context(device)?;

        let (gi, gj) = self.global(i, j);
        if self.core.registry.contains(gi, gj, Location::Device(device)) {
            return Ok(());
        }

        let host = self
            .core
            .registry
            .find(gi, gj, Location::Host)
            .ok_or(Error::NotResident {
                i,
                j,
                location: Location::Host,
            })?;
        let copy = host.copy_to(
            Location::Device(device),
            ctx.comm_stream(),
            self.core.runtime.as_ref(),
        )?;
        self.core.registry.insert(gi, gj, Arc::new(copy));
        log::trace!("tile ({}, {}) copied to device {}", gi, gj, device);
        Ok(())
    }

    /// Move tile `(i, j)` to `device`: copy if needed, then drop the host
    /// copy
    pub fn move_to_device(&self, i: usize, j: usize, device: usize) -> Result<()> {
        if self.core.num_devices == 0 {
            return Ok(());
        }
        self.copy_to_device(i, j, device)?;

        // The host block may still be feeding the enqueued transfer; it
        // must not return to the pool before the copy lands.
        let ctx = self.context(device)?;
        self.core.runtime.sync_stream(ctx.comm_stream())?;

        let (gi, gj) = self.global(i, j);
        self.core.registry.erase(gi, gj, Location::Host);
        Ok(())
    }

    /// Move tile `(i, j)` back to the host: copy if needed, then drop the
    /// copy on `device`
    pub fn move_to_host(&self, i: usize, j: usize, device: usize) -> Result<()> {
        self.check_index(i, j)?;
        if self.core.num_devices == 0 {
            return Ok(());
        }
        let ctx = self.context(device)?;

        let (gi, gj) = self.global(i, j);
        if !self.core.registry.contains(gi, gj, Location::Host) {
            let dev_tile = self
                .core
                .registry
                .find(gi, gj, Location::Device(device))
                .ok_or(Error::NotResident {
                    i,
                    j,
                    location: Location::Device(device),
                })?;
            let copy = dev_tile.copy_to(
                Location::Host,
                ctx.comm_stream(),
                self.core.runtime.as_ref(),
            )?;
            self.core.runtime.sync_stream(ctx.comm_stream())?;
            self.core.registry.insert(gi, gj, Arc::new(copy));
        }

        self.core.registry.erase(gi, gj, Location::Device(device));
        Ok(())
    }

    /// Drop the copy of tile `(i, j)` at `location`; no-op when absent
    pub fn erase(&self, i: usize, j: usize, location: Location) -> Result<()> {
        self.check_index(i, j)?;
        let (gi, gj) = self.global(i, j);
        self.core.registry.erase(gi, gj, location);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifetimes
    // ------------------------------------------------------------------

    /// Record one consumption of the non-local tile `(i, j)`
    ///
    /// When the last accounted consumer ticks, every copy of the tile is
    /// erased and its counter removed. No-op for local tiles. Ticking more
    /// often than the broadcast ranges accounted for is
    /// [`Error::InvariantViolated`].
    pub fn tick(&self, i: usize, j: usize) -> Result<()> {
        self.check_index(i, j)?;
        if self.is_local(i, j) {
            return Ok(());
        }

        let (gi, gj) = self.global(i, j);
        let remaining = self.core.lives.decrement(gi, gj)?;
        if remaining == 0 {
            self.core.registry.erase(gi, gj, Location::Host);
            for d in 0..self.core.num_devices {
                self.core.registry.erase(gi, gj, Location::Device(d));
            }
            log::trace!("tile ({}, {}) expired and was reclaimed", gi, gj);
        }
        Ok(())
    }

    /// Remaining life of the non-local tile `(i, j)`, if it has a counter
    pub fn life(&self, i: usize, j: usize) -> Option<u64> {
        let (gi, gj) = self.global(i, j);
        self.core.lives.life(gi, gj)
    }

    /// Life counters whose tile no longer exists anywhere — always empty
    /// unless lifetime accounting has been corrupted
    pub fn check_lives(&self) -> Vec<((usize, usize), u64)> {
        self.core
            .lives
            .entries()
            .into_iter()
            .filter(|&((i, j), _)| self.core.registry.locations_of(i, j).is_empty())
            .collect()
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Broadcast tile `(i, j)` to the ranks owning `ranges`, with lifetime
    ///
    /// Collective: every rank that might be in the broadcast set must call
    /// this with the same arguments; ranks outside the set detect that from
    /// the distribution and return without transport. On ranks that do not
    /// own `(i, j)`, a host slot is materialized and its life set to the
    /// number of range cells local to the rank; each of those consumptions
    /// must [`Matrix::tick`] exactly once. With [`Target::Devices`], the
    /// delivered tile fans out to every device afterwards.
    pub fn tile_bcast(
        &self,
        i: usize,
        j: usize,
        ranges: &[TileRange],
        target: Target,
    ) -> Result<()> {
        self.check_index(i, j)?;
        if ranges.is_empty() {
            return Err(Error::InvalidArgument {
                arg: "ranges",
                reason: "broadcast needs at least one consumer range".into(),
            });
        }
        for r in ranges {
            if r.i1 > r.i2 || r.j1 > r.j2 || r.i2 >= self.mt || r.j2 >= self.nt {
                return Err(Error::InvalidArgument {
                    arg: "ranges",
                    reason: format!(
                        "range [{}..{}] x [{}..{}] outside a {} x {} view",
                        r.i1, r.i2, r.j1, r.j2, self.mt, self.nt
                    ),
                });
            }
        }

        // The broadcast set: the owner plus every rank owning a range cell.
        let root = self.owner_rank(i, j);
        let mut bcast_set = BTreeSet::new();
        bcast_set.insert(root);
        for r in ranges {
            for (ri, rj) in r.cells() {
                bcast_set.insert(self.owner_rank(ri, rj));
            }
        }
        if !bcast_set.contains(&self.core.rank) {
            return Ok(());
        }

        let (gi, gj) = self.global(i, j);

        if !self.is_local(i, j) {
            if !self.core.registry.contains(gi, gj, Location::Host) {
                let slot = Tile::new(self.row_height(i), self.col_width(j), &self.core.pool)?;
                self.core.registry.insert(gi, gj, Arc::new(slot));
            }
            let life: u64 = ranges
                .iter()
                .map(|r| {
                    r.cells()
                        .filter(|&(ri, rj)| self.is_local(ri, rj))
                        .count() as u64
                })
                .sum();
            self.core.lives.set(gi, gj, life);
        }

        if bcast_set.len() > 1 {
            let members: Vec<usize> = bcast_set.iter().copied().collect();
            let tile = self
                .core
                .registry
                .find(gi, gj, Location::Host)
                .ok_or(Error::NotResident {
                    i,
                    j,
                    location: Location::Host,
                })?;

            // The wire block is contiguous; a strided owner tile packs
            // before transport.
            let mut buf: Vec<T> = if self.core.rank == root {
                tile.pack()?
            } else {
                vec![T::zero(); tile.mb() * tile.nb()]
            };

            {
                let _transport = self.core.transport.lock();
                let sub = self.core.comm.group(&members)?;
                let sub_root = members.binary_search(&root).map_err(|_| {
                    Error::InvariantViolated(format!(
                        "broadcast root {} missing from its own set",
                        root
                    ))
                })?;
                sub.broadcast(bytemuck::cast_slice_mut(&mut buf), sub_root)?;
                // Dropping `sub` tears the group down.
            }

            if self.core.rank != root {
                tile.copy_from(&buf, tile.mb())?;
            }
            log::trace!(
                "tile ({}, {}) broadcast from rank {} to {} ranks",
                gi,
                gj,
                root,
                members.len()
            );
        }

        if target == Target::Devices {
            for d in 0..self.core.num_devices {
                self.copy_to_device(i, j, d)?;
            }
        }
        Ok(())
    }

    /// Blocking point-to-point send of tile `(i, j)`'s host copy to `dest`
    pub fn send(&self, i: usize, j: usize, dest: usize) -> Result<()> {
        self.check_index(i, j)?;
        let (gi, gj) = self.global(i, j);
        let tile = self
            .core
            .registry
            .find(gi, gj, Location::Host)
            .ok_or(Error::NotResident {
                i,
                j,
                location: Location::Host,
            })?;

        let _transport = self.core.transport.lock();
        if tile.stride() == tile.mb() {
            self.core
                .comm
                .send(bytemuck::cast_slice(tile.as_slice()), dest, TILE_TAG)
        } else {
            let packed = tile.pack()?;
            self.core
                .comm
                .send(bytemuck::cast_slice(&packed), dest, TILE_TAG)
        }
    }

    /// Blocking point-to-point receive of tile `(i, j)` from `src` into a
    /// fresh host slot
    ///
    /// Receiving into an already-resident slot is
    /// [`Error::InvariantViolated`]; explicit motion must clear it first.
    pub fn recv(&self, i: usize, j: usize, src: usize) -> Result<()> {
        self.recv_tile(i, j, src, false)
    }

    fn recv_tile(&self, i: usize, j: usize, src: usize, overwrite: bool) -> Result<()> {
        self.check_index(i, j)?;
        let (gi, gj) = self.global(i, j);

        if let Some(existing) = self.core.registry.find(gi, gj, Location::Host) {
            if !overwrite {
                return Err(Error::InvariantViolated(format!(
                    "receive into already-resident tile ({}, {})",
                    gi, gj
                )));
            }
            let mut buf = vec![T::zero(); existing.mb() * existing.nb()];
            {
                let _transport = self.core.transport.lock();
                self.core
                    .comm
                    .recv(bytemuck::cast_slice_mut(&mut buf), src, TILE_TAG)?;
            }
            return existing.copy_from(&buf, existing.mb());
        }

        let tile = Tile::new(self.row_height(i), self.col_width(j), &self.core.pool)?;
        // Fresh and unshared, so the wire can land straight in its block.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(tile.data_ptr() as *mut u8, tile.bytes())
        };
        {
            let _transport = self.core.transport.lock();
            self.core.comm.recv(bytes, src, TILE_TAG)?;
        }
        self.core.registry.insert(gi, gj, Arc::new(tile));
        Ok(())
    }

    /// Pull every stored tile to rank 0
    ///
    /// Rank 0 receives each tile it does not own from its owner (refreshing
    /// tiles it already holds copies of); other ranks send their local
    /// tiles. Collective over the whole communicator.
    pub fn gather(&self) -> Result<()> {
        for i in 0..self.mt {
            for j in self.core.shape.cols_for_row(i, self.nt) {
                if self.core.rank == 0 {
                    if !self.is_local(i, j) {
                        self.recv_tile(i, j, self.owner_rank(i, j), true)?;
                    }
                } else if self.is_local(i, j) {
                    self.send(i, j, 0)?;
                }
            }
        }
        Ok(())
    }
}

impl<T: Scalar, R: Runtime> std::fmt::Debug for Matrix<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("m", &self.core.m)
            .field("n", &self.core.n)
            .field("nb", &self.core.nb)
            .field("tiles", &(self.core.mt, self.core.nt))
            .field("view", &(self.it, self.jt, self.mt, self.nt))
            .field("rank", &self.core.rank)
            .field("world", &self.core.world)
            .field("devices", &self.core.num_devices)
            .finish()
    }
}
