//! Tile-to-rank and tile-to-device mapping
//!
//! Where a tile lives is policy, not mechanism: the matrix consults a
//! [`Distribution`] for the owning rank, the preferred device, and the tile
//! extents, and never assumes anything beyond purity and totality. The
//! default is 2-D block-cyclic over a process grid with round-robin device
//! placement; alternate layouts (1-D, cyclic-only, custom) drop in without
//! touching the core.

use crate::error::{Error, Result};

/// Logical `p x q` grid of cooperating ranks
///
/// Rank `r` sits at grid position `(r mod p, r / p)` — column-major rank
/// ordering, matching the default owner formula.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessGrid {
    p: usize,
    q: usize,
}

impl ProcessGrid {
    /// Create a `p x q` grid; both extents must be positive
    pub fn new(p: usize, q: usize) -> Result<Self> {
        if p == 0 || q == 0 {
            return Err(Error::InvalidArgument {
                arg: "p/q",
                reason: format!("process grid {}x{} has a zero extent", p, q),
            });
        }
        Ok(Self { p, q })
    }

    /// Grid rows
    #[inline]
    pub fn p(&self) -> usize {
        self.p
    }

    /// Grid columns
    #[inline]
    pub fn q(&self) -> usize {
        self.q
    }

    /// Number of ranks the grid covers
    #[inline]
    pub fn size(&self) -> usize {
        self.p * self.q
    }
}

/// The four mapping functions a tiled matrix is built on
///
/// Implementations must be pure and total over the global tile grid
/// `[0, mt) x [0, nt)`: same inputs, same answers, on every rank, for the
/// lifetime of the matrix. The core only consults them through the matrix.
pub trait Distribution: Send + Sync {
    /// Rank that owns tile `(i, j)`
    fn owner_rank(&self, i: usize, j: usize) -> usize;

    /// Device tile `(i, j)` prefers on its owner, `None` for the host
    fn device(&self, i: usize, j: usize) -> Option<usize>;

    /// Height in elements of tile row `i`
    fn row_height(&self, i: usize) -> usize;

    /// Width in elements of tile column `j`
    fn col_width(&self, j: usize) -> usize;
}

/// 2-D block-cyclic distribution over a process grid
///
/// Tile `(i, j)` goes to grid position `(i mod p, j mod q)`, i.e. rank
/// `(i mod p) + (j mod q) * p`, and to device `(j / q) mod D` on nodes with
/// `D > 0` devices. Edge tiles shrink to the matrix boundary.
#[derive(Clone, Debug)]
pub struct BlockCyclic {
    m: usize,
    n: usize,
    nb: usize,
    mt: usize,
    nt: usize,
    grid: ProcessGrid,
    devices: usize,
}

impl BlockCyclic {
    /// Block-cyclic layout for an `m x n` matrix in `nb`-sized tiles over
    /// `grid`, with `devices` devices per rank
    pub fn new(m: usize, n: usize, nb: usize, grid: ProcessGrid, devices: usize) -> Self {
        Self {
            m,
            n,
            nb,
            mt: m.div_ceil(nb),
            nt: n.div_ceil(nb),
            grid,
            devices,
        }
    }

    /// The process grid this layout maps onto
    #[inline]
    pub fn grid(&self) -> ProcessGrid {
        self.grid
    }
}

impl Distribution for BlockCyclic {
    fn owner_rank(&self, i: usize, j: usize) -> usize {
        (i % self.grid.p) + (j % self.grid.q) * self.grid.p
    }

    fn device(&self, _i: usize, j: usize) -> Option<usize> {
        if self.devices > 0 {
            Some((j / self.grid.q) % self.devices)
        } else {
            None
        }
    }

    fn row_height(&self, i: usize) -> usize {
        if i + 1 == self.mt {
            self.m - (self.mt - 1) * self.nb
        } else {
            self.nb
        }
    }

    fn col_width(&self, j: usize) -> usize {
        if j + 1 == self.nt {
            self.n - (self.nt - 1) * self.nb
        } else {
            self.nb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_cycles_over_grid() {
        let dist = BlockCyclic::new(16, 16, 4, ProcessGrid::new(2, 2).unwrap(), 0);
        assert_eq!(dist.owner_rank(0, 0), 0);
        assert_eq!(dist.owner_rank(1, 0), 1);
        assert_eq!(dist.owner_rank(0, 1), 2);
        assert_eq!(dist.owner_rank(1, 1), 3);
        assert_eq!(dist.owner_rank(2, 2), 0);
    }

    #[test]
    fn test_edge_tiles_shrink() {
        // 10 x 7 in 4-tiles: last row is 2 high, last column 3 wide.
        let dist = BlockCyclic::new(10, 7, 4, ProcessGrid::new(1, 1).unwrap(), 0);
        assert_eq!(dist.row_height(0), 4);
        assert_eq!(dist.row_height(2), 2);
        assert_eq!(dist.col_width(0), 4);
        assert_eq!(dist.col_width(1), 3);
    }

    #[test]
    fn test_device_round_robin() {
        let dist = BlockCyclic::new(32, 32, 4, ProcessGrid::new(1, 2).unwrap(), 2);
        assert_eq!(dist.device(0, 0), Some(0));
        assert_eq!(dist.device(0, 1), Some(0));
        assert_eq!(dist.device(0, 2), Some(1));
        assert_eq!(dist.device(0, 4), Some(0));

        let hostonly = BlockCyclic::new(32, 32, 4, ProcessGrid::new(1, 2).unwrap(), 0);
        assert_eq!(hostonly.device(3, 5), None);
    }
}
