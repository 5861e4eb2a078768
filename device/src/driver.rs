//! The narrow boundary between kuda and a GPU driver.
//!
//! Everything above this module talks to the device only through [`Driver`].
//! Two implementations exist:
//! - [`HostDriver`](crate::host::HostDriver): device memory simulated in host RAM
//! - `CudaDriver` (feature `cuda`): the CUDA driver API via `cudarc`
//!
//! Memory operations take the ordinal of the device whose context issued them.
//! Callers normally go through [`Context`](crate::Context), which checks that the
//! context is still active before reaching the driver.

use std::fmt;

use crate::error::Result;
use crate::launch::{FunctionHandle, KernelArgs, LaunchConfig, StreamId};
use crate::pointer::RawDevicePtr;

/// Direction of a blocking memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HostToDevice => "host-to-device",
            Self::DeviceToHost => "device-to-host",
            Self::DeviceToDevice => "device-to-device",
        };
        f.write_str(name)
    }
}

/// Compute capability reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Operations a GPU driver binding must provide.
///
/// Implementations must be thread-safe; the objects built on top of them
/// (arrays, buffers) are not.
pub trait Driver: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn device_count(&self) -> Result<usize>;
    fn device_name(&self, ordinal: usize) -> Result<String>;
    fn compute_capability(&self, ordinal: usize) -> Result<ComputeCapability>;

    /// Create the context of device `ordinal`.
    ///
    /// Fails with a context error if the device already has an active context.
    fn begin_context(&self, ordinal: usize) -> Result<()>;

    /// Tear down the context of device `ordinal`, releasing its allocations.
    fn end_context(&self, ordinal: usize) -> Result<()>;

    /// Allocate `bytes` bytes of device memory. Zero bytes yields the null pointer.
    fn allocate(&self, ordinal: usize, bytes: usize) -> Result<RawDevicePtr>;

    /// Release an allocation obtained from [`Driver::allocate`].
    fn free(&self, ordinal: usize, ptr: RawDevicePtr) -> Result<()>;

    fn copy_host_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: &[u8]) -> Result<()>;
    fn copy_device_to_host(&self, ordinal: usize, dst: &mut [u8], src: RawDevicePtr) -> Result<()>;
    fn copy_device_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: RawDevicePtr, bytes: usize) -> Result<()>;

    /// Block until all work issued to device `ordinal` completed.
    fn synchronize(&self, ordinal: usize) -> Result<()>;

    /// Look up a loaded kernel by symbol name.
    fn function(&self, ordinal: usize, name: &str) -> Result<FunctionHandle>;

    fn create_stream(&self, ordinal: usize) -> Result<StreamId>;
    fn destroy_stream(&self, ordinal: usize, stream: StreamId) -> Result<()>;
    fn synchronize_stream(&self, ordinal: usize, stream: StreamId) -> Result<()>;

    /// Launch a kernel on `stream` ([`StreamId::DEFAULT`] for the null stream).
    fn launch(
        &self,
        ordinal: usize,
        function: FunctionHandle,
        config: &LaunchConfig,
        stream: StreamId,
        args: &KernelArgs,
    ) -> Result<()>;
}
