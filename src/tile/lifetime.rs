//! Life counters for broadcast-received tiles
//!
//! A non-local tile delivered by broadcast is pinned on the receiving rank
//! with a life counter equal to the number of local consumers that still
//! need it. Each consumption ticks the counter down once; at zero the tile
//! is reclaimed from every location without any global coordination.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Table of `(tile_row, tile_col) -> remaining consumptions`
pub struct LifetimeTracker {
    lives: Mutex<HashMap<(usize, usize), u64>>,
}

impl LifetimeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            lives: Mutex::new(HashMap::new()),
        }
    }

    /// Set the life of `(i, j)`; a life of zero removes the counter
    pub fn set(&self, i: usize, j: usize, life: u64) {
        let mut lives = self.lives.lock();
        if life == 0 {
            lives.remove(&(i, j));
        } else {
            lives.insert((i, j), life);
        }
    }

    /// Remaining life of `(i, j)`, if a counter exists
    pub fn life(&self, i: usize, j: usize) -> Option<u64> {
        self.lives.lock().get(&(i, j)).copied()
    }

    /// Tick the counter of `(i, j)` down once, returning the remaining
    /// life. Reaching zero removes the counter.
    ///
    /// Decrementing a missing counter means a consumer ticked more times
    /// than the broadcast ranges accounted for; that is a programming error
    /// and reports `InvariantViolated` (asserting in checked builds).
    pub fn decrement(&self, i: usize, j: usize) -> Result<u64> {
        let mut lives = self.lives.lock();
        match lives.get_mut(&(i, j)) {
            Some(life) => {
                *life -= 1;
                let remaining = *life;
                if remaining == 0 {
                    lives.remove(&(i, j));
                }
                Ok(remaining)
            }
            None => {
                debug_assert!(false, "life counter for ({}, {}) went negative", i, j);
                Err(Error::InvariantViolated(format!(
                    "life counter for ({}, {}) went negative",
                    i, j
                )))
            }
        }
    }

    /// Drop the counter of `(i, j)` regardless of its value
    pub fn erase(&self, i: usize, j: usize) {
        self.lives.lock().remove(&(i, j));
    }

    /// Number of live counters
    pub fn len(&self) -> usize {
        self.lives.lock().len()
    }

    /// True when no counters are live
    pub fn is_empty(&self) -> bool {
        self.lives.lock().is_empty()
    }

    /// Snapshot of every live counter, for debug inspection
    pub fn entries(&self) -> Vec<((usize, usize), u64)> {
        let mut entries: Vec<_> = self
            .lives
            .lock()
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        entries.sort_unstable();
        entries
    }
}

impl Default for LifetimeTracker {
    fn default() -> Self {
        Self::new()
    }
}
