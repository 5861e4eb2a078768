use snafu::Snafu;

use crate::driver::TransferDirection;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device rejected an allocation request (out of memory, invalid size).
    #[snafu(display("allocation of {bytes} bytes failed: {reason}"))]
    Allocation { bytes: usize, reason: String },

    /// Free of an address that is not the base of a live allocation.
    #[snafu(display("free of unallocated device address {address:#x}"))]
    Free { address: u64 },

    /// A memory copy failed (invalid address, size mismatch, device fault).
    #[snafu(display("{direction} transfer of {bytes} bytes failed: {reason}"))]
    Transfer { direction: TransferDirection, bytes: usize, reason: String },

    /// Operation attempted without an active or matching context.
    #[snafu(display("context error: {reason}"))]
    Context { reason: String },

    #[snafu(display("synchronization failed: {reason}"))]
    Sync { reason: String },

    #[snafu(display("launch of '{function}' failed: {reason}"))]
    Launch { function: String, reason: String },

    /// Invalid device specification.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    #[snafu(display("function '{name}' not found"))]
    FunctionNotFound { name: String },

    #[cfg(feature = "cuda")]
    /// CUDA-specific errors.
    #[snafu(display("CUDA error: {source}"))]
    Cuda { source: cudarc::driver::DriverError },
}

impl Error {
    /// Whether this error came from an allocation request.
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::Allocation { .. })
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Self::Context { .. })
    }
}
