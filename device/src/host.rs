//! Driver that simulates device memory in host RAM.
//!
//! Allocations live in a table keyed by their (fake) device address, so every
//! copy is bounds-checked against the allocation that contains it. Kernels are
//! plain Rust closures registered by name and executed synchronously by
//! [`Driver::launch`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bon::bon;
use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};
use snafu::{OptionExt, ensure};

use crate::driver::{ComputeCapability, Driver, TransferDirection};
use crate::error::{
    AllocationSnafu, ContextSnafu, FreeSnafu, FunctionNotFoundSnafu, InvalidDeviceSnafu, LaunchSnafu, Result,
    TransferSnafu,
};
use crate::launch::{FunctionHandle, KernelArg, KernelArgs, LaunchConfig, StreamId};
use crate::pointer::RawDevicePtr;

const BASE_ADDRESS: u64 = 0x7f00_0000_0000;

/// Host driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDriverConfig {
    /// Upper bound on live allocated bytes across all devices.
    pub memory_limit: usize,
    /// Alignment of returned addresses, in bytes.
    pub alignment: usize,
    pub device_count: usize,
    pub device_name: String,
    pub compute_capability: ComputeCapability,
    pub max_threads_per_block: u32,
}

impl Default for HostDriverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl HostDriverConfig {
    /// Create a host driver configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = 1 << 30)] memory_limit: usize,
        #[builder(default = 256)] alignment: usize,
        #[builder(default = 1)] device_count: usize,
        #[builder(into, default = String::from("kuda host device"))] device_name: String,
        #[builder(default = ComputeCapability::new(8, 0))] compute_capability: ComputeCapability,
        #[builder(default = 1024)] max_threads_per_block: u32,
    ) -> Self {
        Self {
            memory_limit,
            alignment: alignment.max(1).next_power_of_two(),
            device_count,
            device_name,
            compute_capability,
            max_threads_per_block,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KUDA_HOST_MEMORY_LIMIT` - Memory limit in bytes (default: 1 GiB)
    /// * `KUDA_HOST_DEVICES` - Number of simulated devices (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let memory_limit =
            std::env::var("KUDA_HOST_MEMORY_LIMIT").ok().and_then(|s| s.parse().ok()).unwrap_or(defaults.memory_limit);
        let device_count =
            std::env::var("KUDA_HOST_DEVICES").ok().and_then(|s| s.parse().ok()).unwrap_or(defaults.device_count);
        Self { memory_limit, device_count, ..defaults }
    }
}

/// Kernel body run by the host driver.
pub type HostKernel = Arc<dyn Fn(&mut HostMemory<'_>, &LaunchConfig, &[KernelArg]) -> Result<()> + Send + Sync>;

struct Allocation {
    ordinal: usize,
    data: Box<[u8]>,
}

/// Allocation counters, for leak and double-free checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostMemoryStats {
    pub live_allocations: usize,
    pub allocated_bytes: usize,
    pub total_allocations: u64,
    pub total_frees: u64,
}

#[derive(Default)]
struct HostState {
    allocations: BTreeMap<u64, Allocation>,
    next_address: u64,
    stats: HostMemoryStats,
    active_contexts: HashSet<usize>,
    streams: HashSet<(usize, u64)>,
    next_stream: u64,
}

impl HostState {
    fn require_context(&self, ordinal: usize) -> Result<()> {
        ensure!(
            self.active_contexts.contains(&ordinal),
            ContextSnafu { reason: format!("no active context on host device {ordinal}") }
        );
        Ok(())
    }

    fn memory(&mut self) -> HostMemory<'_> {
        HostMemory { allocations: &mut self.allocations }
    }
}

/// Device memory view handed to host kernels.
pub struct HostMemory<'a> {
    allocations: &'a mut BTreeMap<u64, Allocation>,
}

impl HostMemory<'_> {
    /// Locate `bytes` bytes at `ptr`: (allocation base, offset inside it).
    fn locate(&self, ptr: RawDevicePtr, bytes: usize, direction: TransferDirection) -> Result<(u64, usize)> {
        let address = ptr.address();
        let (&base, allocation) = self.allocations.range(..=address).next_back().context(TransferSnafu {
            direction,
            bytes,
            reason: format!("address {ptr} is not device memory"),
        })?;
        let start = (address - base) as usize;
        ensure!(
            start.checked_add(bytes).is_some_and(|end| end <= allocation.data.len()),
            TransferSnafu {
                direction,
                bytes,
                reason: format!(
                    "range {ptr}+{bytes} exceeds allocation {base:#x} of {} bytes",
                    allocation.data.len()
                ),
            }
        );
        Ok((base, start))
    }

    fn read_bytes(&self, src: RawDevicePtr, dst: &mut [u8], direction: TransferDirection) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let (base, start) = self.locate(src, dst.len(), direction)?;
        dst.copy_from_slice(&self.allocations[&base].data[start..start + dst.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, dst: RawDevicePtr, src: &[u8], direction: TransferDirection) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let (base, start) = self.locate(dst, src.len(), direction)?;
        let allocation = self.allocations.get_mut(&base).expect("located allocation exists");
        allocation.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy(&mut self, dst: RawDevicePtr, src: RawDevicePtr, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let (base, start) = self.locate(src, bytes, TransferDirection::DeviceToDevice)?;
        self.locate(dst, bytes, TransferDirection::DeviceToDevice)?;
        let staging = self.allocations[&base].data[start..start + bytes].to_vec();
        self.write_bytes(dst, &staging, TransferDirection::DeviceToDevice)
    }

    /// Read `count` elements starting at `ptr`.
    pub fn read<T: Pod>(&self, ptr: RawDevicePtr, count: usize) -> Result<Vec<T>> {
        let bytes = count.checked_mul(size_of::<T>()).unwrap_or(usize::MAX);
        if bytes > 0 {
            self.locate(ptr, bytes, TransferDirection::DeviceToDevice)?;
        }
        let mut values = vec![T::zeroed(); count];
        self.read_bytes(ptr, bytemuck::cast_slice_mut(&mut values), TransferDirection::DeviceToDevice)?;
        Ok(values)
    }

    /// Write `values` starting at `ptr`.
    pub fn write<T: Pod>(&mut self, ptr: RawDevicePtr, values: &[T]) -> Result<()> {
        self.write_bytes(ptr, bytemuck::cast_slice(values), TransferDirection::DeviceToDevice)
    }
}

/// Host-memory implementation of [`Driver`].
pub struct HostDriver {
    config: HostDriverConfig,
    state: Mutex<HostState>,
    kernels: RwLock<Vec<(String, HostKernel)>>,
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new(HostDriverConfig::default())
    }
}

impl HostDriver {
    pub fn new(config: HostDriverConfig) -> Self {
        let state = HostState { next_address: BASE_ADDRESS, next_stream: 1, ..HostState::default() };
        Self { config, state: Mutex::new(state), kernels: RwLock::new(Vec::new()) }
    }

    pub fn config(&self) -> &HostDriverConfig {
        &self.config
    }

    /// Make `kernel` resolvable under `name`; a later registration shadows an earlier one.
    pub fn register_kernel(
        &self,
        name: impl Into<String>,
        kernel: impl Fn(&mut HostMemory<'_>, &LaunchConfig, &[KernelArg]) -> Result<()> + Send + Sync + 'static,
    ) -> FunctionHandle {
        let mut kernels = self.kernels.write();
        kernels.push((name.into(), Arc::new(kernel)));
        FunctionHandle(kernels.len() as u64)
    }

    pub fn stats(&self) -> HostMemoryStats {
        self.state.lock().stats
    }

    /// Bytes currently held by live allocations.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().stats.allocated_bytes
    }

    fn check_ordinal(&self, ordinal: usize) -> Result<()> {
        ensure!(ordinal < self.config.device_count, InvalidDeviceSnafu { device: format!("HOST:{ordinal}") });
        Ok(())
    }

    fn check_launch_config(&self, name: &str, config: &LaunchConfig) -> Result<()> {
        let block = config.block.volume();
        ensure!(
            config.grid.volume() > 0 && block > 0,
            LaunchSnafu { function: name, reason: "grid and block extents must be non-zero" }
        );
        ensure!(
            block <= u64::from(self.config.max_threads_per_block),
            LaunchSnafu {
                function: name,
                reason: format!("{block} threads per block exceeds {}", self.config.max_threads_per_block),
            }
        );
        Ok(())
    }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "HOST"
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.config.device_count)
    }

    fn device_name(&self, ordinal: usize) -> Result<String> {
        self.check_ordinal(ordinal)?;
        Ok(format!("{} {ordinal}", self.config.device_name))
    }

    fn compute_capability(&self, ordinal: usize) -> Result<ComputeCapability> {
        self.check_ordinal(ordinal)?;
        Ok(self.config.compute_capability)
    }

    fn begin_context(&self, ordinal: usize) -> Result<()> {
        self.check_ordinal(ordinal)?;
        let mut state = self.state.lock();
        ensure!(
            state.active_contexts.insert(ordinal),
            ContextSnafu { reason: format!("host device {ordinal} already has an active context") }
        );
        Ok(())
    }

    fn end_context(&self, ordinal: usize) -> Result<()> {
        let mut state = self.state.lock();
        ensure!(
            state.active_contexts.remove(&ordinal),
            ContextSnafu { reason: format!("host device {ordinal} has no active context") }
        );

        // Context teardown releases whatever the context still owns.
        let orphaned: Vec<u64> =
            state.allocations.iter().filter(|(_, a)| a.ordinal == ordinal).map(|(&base, _)| base).collect();
        for base in orphaned {
            if let Some(allocation) = state.allocations.remove(&base) {
                state.stats.live_allocations -= 1;
                state.stats.allocated_bytes -= allocation.data.len();
            }
        }
        state.streams.retain(|&(owner, _)| owner != ordinal);
        Ok(())
    }

    fn allocate(&self, ordinal: usize, bytes: usize) -> Result<RawDevicePtr> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        if bytes == 0 {
            return Ok(RawDevicePtr::null());
        }

        let available = self.config.memory_limit.saturating_sub(state.stats.allocated_bytes);
        ensure!(
            bytes <= available,
            AllocationSnafu { bytes, reason: format!("out of memory ({available} bytes available)") }
        );

        let base = state.next_address;
        let stride = bytes.next_multiple_of(self.config.alignment) as u64;
        state.next_address += stride;
        state.allocations.insert(base, Allocation { ordinal, data: vec![0u8; bytes].into_boxed_slice() });
        state.stats.live_allocations += 1;
        state.stats.allocated_bytes += bytes;
        state.stats.total_allocations += 1;
        Ok(RawDevicePtr::from_address(base))
    }

    fn free(&self, ordinal: usize, ptr: RawDevicePtr) -> Result<()> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        if ptr.is_null() {
            return Ok(());
        }

        let allocation = state.allocations.remove(&ptr.address()).context(FreeSnafu { address: ptr.address() })?;
        state.stats.live_allocations -= 1;
        state.stats.allocated_bytes -= allocation.data.len();
        state.stats.total_frees += 1;
        Ok(())
    }

    fn copy_host_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        state.memory().write_bytes(dst, src, TransferDirection::HostToDevice)
    }

    fn copy_device_to_host(&self, ordinal: usize, dst: &mut [u8], src: RawDevicePtr) -> Result<()> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        state.memory().read_bytes(src, dst, TransferDirection::DeviceToHost)
    }

    fn copy_device_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: RawDevicePtr, bytes: usize) -> Result<()> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        state.memory().copy(dst, src, bytes)
    }

    fn synchronize(&self, ordinal: usize) -> Result<()> {
        // Every operation already completed when its call returned.
        self.state.lock().require_context(ordinal)
    }

    fn function(&self, ordinal: usize, name: &str) -> Result<FunctionHandle> {
        self.state.lock().require_context(ordinal)?;
        let kernels = self.kernels.read();
        let index = kernels.iter().rposition(|(kernel, _)| kernel == name).context(FunctionNotFoundSnafu { name })?;
        Ok(FunctionHandle(index as u64 + 1))
    }

    fn create_stream(&self, ordinal: usize) -> Result<StreamId> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        let id = state.next_stream;
        state.next_stream += 1;
        state.streams.insert((ordinal, id));
        Ok(StreamId(id))
    }

    fn destroy_stream(&self, ordinal: usize, stream: StreamId) -> Result<()> {
        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        ensure!(
            state.streams.remove(&(ordinal, stream.0)),
            ContextSnafu { reason: format!("stream {} does not belong to host device {ordinal}", stream.0) }
        );
        Ok(())
    }

    fn synchronize_stream(&self, ordinal: usize, stream: StreamId) -> Result<()> {
        let state = self.state.lock();
        state.require_context(ordinal)?;
        ensure!(
            stream == StreamId::DEFAULT || state.streams.contains(&(ordinal, stream.0)),
            ContextSnafu { reason: format!("stream {} does not belong to host device {ordinal}", stream.0) }
        );
        Ok(())
    }

    fn launch(
        &self,
        ordinal: usize,
        function: FunctionHandle,
        config: &LaunchConfig,
        stream: StreamId,
        args: &KernelArgs,
    ) -> Result<()> {
        let (name, kernel) = {
            let kernels = self.kernels.read();
            let index = (function.0 as usize).checked_sub(1);
            let (name, kernel) = index
                .and_then(|index| kernels.get(index))
                .context(FunctionNotFoundSnafu { name: format!("<handle {}>", function.0) })?;
            (name.clone(), Arc::clone(kernel))
        };
        self.check_launch_config(&name, config)?;

        let mut state = self.state.lock();
        state.require_context(ordinal)?;
        ensure!(
            stream == StreamId::DEFAULT || state.streams.contains(&(ordinal, stream.0)),
            LaunchSnafu { function: name.as_str(), reason: format!("unknown stream {}", stream.0) }
        );

        kernel(&mut state.memory(), config, args.as_slice())
            .map_err(|error| LaunchSnafu { function: name.as_str(), reason: error.to_string() }.build())
    }
}

impl fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDriver")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("kernels", &self.kernels.read().len())
            .finish()
    }
}
