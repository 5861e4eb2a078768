//! Error types for device containers.

use snafu::Snafu;

/// Result type for container operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by buffers, arrays and values.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Driver-level failure (allocation, transfer, context, launch).
    #[snafu(display("device error: {source}"))]
    Device { source: kuda_device::Error },

    #[snafu(display("index {index} out of bounds for length {len}"))]
    IndexOutOfBounds { index: usize, len: usize },

    #[snafu(display("range {start}..{end} out of bounds for length {len}"))]
    InvalidRange { start: usize, end: usize, len: usize },

    /// A nested slot was never assigned an inner array.
    #[snafu(display("element {index} has not been initialized"))]
    UninitializedElement { index: usize },

    #[snafu(display("length mismatch: expected {expected}, got {actual}"))]
    LengthMismatch { expected: usize, actual: usize },
}

impl Error {
    /// The driver error behind this one, if any.
    pub fn device_error(&self) -> Option<&kuda_device::Error> {
        match self {
            Self::Device { source } => Some(source),
            _ => None,
        }
    }

    pub fn is_allocation(&self) -> bool {
        self.device_error().is_some_and(kuda_device::Error::is_allocation)
    }
}
