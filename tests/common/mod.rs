//! Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use tessera::comm::{Communicator, LocalComm};

/// Run `f` once per rank of a `size`-rank in-process world, one thread per
/// rank, propagating panics
pub fn spawn_world<F>(size: usize, f: F)
where
    F: Fn(usize, Arc<dyn Communicator>) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalComm::world(size)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let f = f.clone();
            thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn(move || f(rank, Arc::new(comm) as Arc<dyn Communicator>))
                .expect("failed to spawn rank thread")
        })
        .collect();
    for h in handles {
        h.join().expect("rank thread panicked");
    }
}

/// Communicator for single-rank tests
pub fn single_rank() -> Arc<dyn Communicator> {
    Arc::new(LocalComm::world(1).remove(0))
}

/// Cross-rank scratchpad for recording tile contents to compare later
pub type TileLog = Arc<Mutex<HashMap<(usize, usize), Vec<f64>>>>;

/// Empty tile log
pub fn tile_log() -> TileLog {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Column-major `n x n` identity
pub fn identity(n: usize) -> Vec<f64> {
    let mut a = vec![0.0; n * n];
    for k in 0..n {
        a[k * n + k] = 1.0;
    }
    a
}

/// Column-major `m x n` array with distinct entries
pub fn iota(m: usize, n: usize) -> Vec<f64> {
    (0..m * n).map(|k| k as f64 + 1.0).collect()
}
