//! Rank-to-rank transport
//!
//! The substrate talks to its peers through the [`Communicator`] trait,
//! which is deliberately MPI-shaped: blocking point-to-point send/receive,
//! a collective broadcast, and group construction (a sub-communicator over
//! a subset of ranks, with rank translation). Any MPI-compatible transport
//! implements it directly; [`LocalComm`] ships with the crate and runs a
//! multi-rank world inside one process so protocol code is testable under
//! `cargo test`.
//!
//! # Serialization contract
//!
//! Implementations are not required to be callable from multiple threads of
//! one rank at once. The matrix layer serializes every transport call (send,
//! recv, broadcast, group construction and teardown) under a single per-rank
//! critical section, mirroring what thread-funneled transport libraries
//! demand.

mod local;

pub use local::LocalComm;

use crate::error::Result;

/// MPI-shaped transport endpoint for one rank
///
/// Messages are opaque byte blocks; the matrix layer always moves
/// contiguous `mb * nb` scalar blocks through them. Matching is by
/// program order per `(source, destination, tag)` edge, as in MPI.
pub trait Communicator: Send + Sync {
    /// This rank's index within the communicator
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator
    fn size(&self) -> usize;

    /// Blocking send of `buf` to `dest`
    fn send(&self, buf: &[u8], dest: usize, tag: u64) -> Result<()>;

    /// Blocking receive from `src` into `buf`; the incoming message must
    /// have exactly `buf.len()` bytes
    fn recv(&self, buf: &mut [u8], src: usize, tag: u64) -> Result<()>;

    /// Collective broadcast: `root`'s buffer contents replace everyone
    /// else's. Every member must call with the same `root`.
    fn broadcast(&self, buf: &mut [u8], root: usize) -> Result<()>;

    /// Build a sub-communicator over `ranks` (indices in this communicator,
    /// strictly ascending, containing the caller). Collective over exactly
    /// the listed ranks; ranks inside the group are renumbered by position.
    fn group(&self, ranks: &[usize]) -> Result<Box<dyn Communicator>>;
}
