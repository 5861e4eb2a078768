//! Kernel launch configuration and argument lists.

use bytemuck::Pod;
use smallvec::SmallVec;

use crate::pointer::RawDevicePtr;

/// Grid or block extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of items covered by this extent.
    pub fn volume(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

/// Kernel launch parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of blocks per dimension.
    pub grid: Dim3,
    /// Number of threads per block per dimension.
    pub block: Dim3,
    /// Dynamic shared memory per block, in bytes.
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    /// Create 1D launch parameters.
    pub fn new_1d(grid: u32, block: u32) -> Self {
        Self { grid: grid.into(), block: block.into(), shared_mem_bytes: 0 }
    }

    /// Create 2D launch parameters.
    pub fn new_2d(grid: (u32, u32), block: (u32, u32)) -> Self {
        Self { grid: grid.into(), block: block.into(), shared_mem_bytes: 0 }
    }

    /// Create 3D launch parameters.
    pub fn new_3d(grid: (u32, u32, u32), block: (u32, u32, u32)) -> Self {
        Self { grid: grid.into(), block: block.into(), shared_mem_bytes: 0 }
    }

    /// Smallest 1D configuration with `block` threads per block covering `n` items.
    pub fn for_num_elems(n: u32, block: u32) -> Self {
        let block = block.max(1);
        Self::new_1d(n.div_ceil(block).max(1), block)
    }

    pub fn with_shared_mem(mut self, bytes: u32) -> Self {
        self.shared_mem_bytes = bytes;
        self
    }

    /// Total number of threads launched.
    pub fn total_threads(&self) -> u64 {
        self.grid.volume() * self.block.volume()
    }
}

/// Driver-side handle of a loaded kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u64);

/// A kernel resolved in a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    name: String,
    handle: FunctionHandle,
}

impl Function {
    pub fn new(name: impl Into<String>, handle: FunctionHandle) -> Self {
        Self { name: name.into(), handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> FunctionHandle {
        self.handle
    }
}

/// Driver-side stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl StreamId {
    /// The implicit, synchronizing stream.
    pub const DEFAULT: StreamId = StreamId(0);
}

/// One kernel argument as passed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    /// Plain-old-data scalar, stored as its native bytes.
    Scalar(SmallVec<[u8; 16]>),
    /// Device address.
    Pointer(RawDevicePtr),
}

impl KernelArg {
    /// Reinterpret a scalar argument as `T`; `None` on pointer or size mismatch.
    pub fn as_scalar<T: Pod>(&self) -> Option<T> {
        match self {
            Self::Scalar(bytes) if bytes.len() == std::mem::size_of::<T>() => {
                Some(bytemuck::pod_read_unaligned(bytes.as_slice()))
            }
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<RawDevicePtr> {
        match self {
            Self::Pointer(ptr) => Some(*ptr),
            Self::Scalar(_) => None,
        }
    }

    /// Bytes handed to the driver for this argument.
    pub fn bytes(&self) -> SmallVec<[u8; 16]> {
        match self {
            Self::Scalar(bytes) => bytes.clone(),
            Self::Pointer(ptr) => SmallVec::from_slice(&ptr.address().to_ne_bytes()),
        }
    }
}

/// Ordered kernel argument list.
///
/// ```ignore
/// let mut args = KernelArgs::new();
/// args.push_scalar(5.0f32).push_pointer(x.as_raw()).push_scalar(256u32);
/// ctx.launch(&mult, &LaunchConfig::new_1d(8, 32), &args)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelArgs {
    args: Vec<KernelArg>,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scalar<T: Pod>(&mut self, value: T) -> &mut Self {
        self.args.push(KernelArg::Scalar(SmallVec::from_slice(bytemuck::bytes_of(&value))));
        self
    }

    pub fn push_pointer(&mut self, ptr: RawDevicePtr) -> &mut Self {
        self.args.push(KernelArg::Pointer(ptr));
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn as_slice(&self) -> &[KernelArg] {
        &self.args
    }
}
