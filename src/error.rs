//! Error types for tessera

use crate::runtime::Location;
use thiserror::Error;

/// Result type alias using tessera's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tessera operations
///
/// The taxonomy splits into recoverable conditions (`AllocFailed`,
/// `TransferFailed`) that unwind the current operation, and caller bugs
/// (`NotResident`, `InvalidArgument`, `InvariantViolated`); corrupted
/// lifetime accounting additionally trips a `debug_assert` in checked
/// builds. The core never retries silently.
#[derive(Error, Debug)]
pub enum Error {
    /// Tile pool exhausted or the backing allocator refused
    #[error("Allocation of {bytes} bytes failed at {location}")]
    AllocFailed {
        /// Requested size in bytes
        bytes: usize,
        /// Memory space the allocation targeted
        location: Location,
    },

    /// A host/device or rank-to-rank transfer returned a non-success status
    #[error("Transfer failed ({direction}): {reason}")]
    TransferFailed {
        /// Transfer direction, e.g. "host-to-device"
        direction: &'static str,
        /// Backend-reported failure
        reason: String,
    },

    /// A tile was requested at a location where no entry exists
    #[error("Tile ({i}, {j}) is not resident at {location}")]
    NotResident {
        /// Tile row index
        i: usize,
        /// Tile column index
        j: usize,
        /// Location that was queried
        location: Location,
    },

    /// Out-of-range bounds, ill-formed range, or mismatched construction
    /// parameters
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// A programming-error invariant was violated, e.g. a life counter
    /// decremented past zero or a receive into an already-resident slot
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// Transport-layer failure reported by the communicator
    #[error("Communication error: {0}")]
    Comm(String),

    /// CUDA driver error
    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),
}
