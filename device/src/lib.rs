//! Device access layer for kuda.
//!
//! Provides the driver boundary ([`Driver`]), a host-memory driver used for
//! testing and CPU-only builds, the CUDA driver (feature `cuda`), scoped
//! contexts, streams, launch parameters and the non-owning device pointers
//! every higher-level container is built on.

pub mod context;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod driver;
pub mod error;
pub mod host;
pub mod launch;
pub mod pointer;
pub mod registry;
pub mod stream;


pub use context::{Context, ContextGuard, Device};
#[cfg(feature = "cuda")]
pub use cuda::CudaDriver;
pub use driver::{ComputeCapability, Driver, TransferDirection};
pub use error::{Error, Result};
pub use host::{HostDriver, HostDriverConfig, HostKernel, HostMemory, HostMemoryStats};
pub use launch::{Dim3, Function, FunctionHandle, KernelArg, KernelArgs, LaunchConfig, StreamId};
pub use pointer::{DevicePtr, DevicePtrMut, RawDevicePtr};
pub use registry::{DeviceSpec, DriverRegistry, default_device, default_driver, get_device, get_driver, registry};
pub use stream::{Stream, StreamCallback};
