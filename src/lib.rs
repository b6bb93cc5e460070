//! # tessera
//!
//! **Distributed tiled matrix substrate for accelerator-aware dense linear algebra.**
//!
//! tessera provides the data structure and coordination layer that tiled
//! numerical routines (factorizations, solves, multiplications,
//! eigen-decompositions) are built on: a matrix is carved into dense
//! column-major tiles, tiles are mapped onto a `p x q` process grid and onto
//! the devices of each node by a replaceable distribution, and copies of each
//! tile are tracked per location (host or device) so that routines move data
//! explicitly and reclaim remote tiles automatically.
//!
//! ## What's in the box
//!
//! - **Tiles**: fixed-size dense blocks backed by a slab pool, with explicit
//!   host/device copy primitives ([`tile::Tile`], [`tile::TilePool`])
//! - **Registry**: a per-rank map of every materialized tile copy, keyed by
//!   `(row, col, location)` ([`tile::TileRegistry`])
//! - **Distribution**: 2-D block-cyclic by default, user-replaceable through
//!   a trait ([`matrix::Distribution`], [`matrix::BlockCyclic`])
//! - **Broadcast with lifetime**: `tile_bcast` delivers a tile to exactly the
//!   ranks that will consume it and pins it with a life counter; `tick`
//!   releases it when the last local consumer is done ([`matrix::Matrix`])
//! - **Device scratch**: per-device streams, BLAS handle, and batch pointer
//!   arrays for batched kernels ([`matrix::DeviceContext`])
//!
//! Numerical kernels themselves are out of scope; they consume the
//! [`matrix::Matrix`] contract from above.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tessera::prelude::*;
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(CpuRuntime::new());
//! let comm: Arc<dyn Communicator> = Arc::new(LocalComm::world(1).remove(0));
//!
//! let a = Matrix::<f64, CpuRuntime>::random(
//!     8, 8, 2, StorageShape::Lower, ProcessGrid::new(1, 1)?, runtime, comm)?;
//!
//! let panel = a.submatrix(1, 3, 0, 0)?;
//! ```
//!
//! ## Feature flags
//!
//! - `rayon` (default): multi-threaded local tile fill/unload
//! - `cuda`: NVIDIA CUDA backend via cudarc

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comm;
pub mod error;
pub mod matrix;
pub mod runtime;
pub mod scalar;
pub mod tile;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::comm::{Communicator, LocalComm};
    pub use crate::error::{Error, Result};
    pub use crate::matrix::{
        BlockCyclic, DeviceContext, Distribution, Matrix, ProcessGrid, StorageShape, Target,
        TileRange,
    };
    pub use crate::runtime::{CpuRuntime, Location, Runtime};
    pub use crate::scalar::{Complex32, Complex64, Scalar};
    pub use crate::tile::{LifetimeTracker, Tile, TilePool, TileRegistry};

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::CudaRuntime;
}
