//! Registry of materialized tile copies
//!
//! Each rank tracks every copy of every tile it currently holds in one
//! associative store keyed by `(tile_row, tile_col, location)`. The host
//! copy and any device copy of the same tile are independent
//! materializations; keeping them consistent is the caller's job through
//! the matrix motion operations.

use super::Tile;
use crate::runtime::{Location, Runtime};
use crate::scalar::Scalar;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Key = (usize, usize, Location);

/// Thread-safe map from `(tile_row, tile_col, location)` to a tile copy
///
/// Tiles are handed out as `Arc`s: the registry entry is the owning
/// reference, and erasing it releases the tile's block back to the pool as
/// soon as the last outstanding reference drops.
pub struct TileRegistry<T: Scalar, R: Runtime> {
    map: Mutex<HashMap<Key, Arc<Tile<T, R>>>>,
}

impl<T: Scalar, R: Runtime> TileRegistry<T, R> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the copy of `(i, j)` at `location`
    pub fn find(&self, i: usize, j: usize, location: Location) -> Option<Arc<Tile<T, R>>> {
        self.map.lock().get(&(i, j, location)).cloned()
    }

    /// True when a copy of `(i, j)` exists at `location`
    pub fn contains(&self, i: usize, j: usize, location: Location) -> bool {
        self.map.lock().contains_key(&(i, j, location))
    }

    /// Insert a copy, returning the entry it displaced, if any
    pub fn insert(
        &self,
        i: usize,
        j: usize,
        tile: Arc<Tile<T, R>>,
    ) -> Option<Arc<Tile<T, R>>> {
        let location = tile.location();
        self.map.lock().insert((i, j, location), tile)
    }

    /// Remove the copy of `(i, j)` at `location`; no-op when absent
    pub fn erase(&self, i: usize, j: usize, location: Location) -> Option<Arc<Tile<T, R>>> {
        self.map.lock().remove(&(i, j, location))
    }

    /// Every location currently holding a copy of `(i, j)`, in order
    pub fn locations_of(&self, i: usize, j: usize) -> Vec<Location> {
        let map = self.map.lock();
        let mut locations: Vec<Location> = map
            .keys()
            .filter(|&&(ki, kj, _)| ki == i && kj == j)
            .map(|&(_, _, loc)| loc)
            .collect();
        locations.sort_unstable();
        locations
    }

    /// Number of tile copies currently registered
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// True when no copies are registered
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl<T: Scalar, R: Runtime> Default for TileRegistry<T, R> {
    fn default() -> Self {
        Self::new()
    }
}
