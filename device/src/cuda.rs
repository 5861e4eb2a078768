//! CUDA driver API backend via `cudarc`.

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::sync::Arc;

use cudarc::driver::{CudaContext, result, sys};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, ensure};

use crate::driver::{ComputeCapability, Driver, TransferDirection};
use crate::error::{
    AllocationSnafu, ContextSnafu, CudaSnafu, FunctionNotFoundSnafu, LaunchSnafu, Result, SyncSnafu, TransferSnafu,
};
use crate::launch::{FunctionHandle, KernelArgs, LaunchConfig, StreamId};
use crate::pointer::RawDevicePtr;

/// Raw driver handles are plain pointers owned by the CUDA context that created
/// them; the driver API is thread-safe for them once that context is bound.
#[derive(Clone, Copy)]
struct Raw<T>(T);

unsafe impl<T> Send for Raw<T> {}
unsafe impl<T> Sync for Raw<T> {}

#[derive(Default)]
struct DeviceState {
    context: Option<Arc<CudaContext>>,
    streams: HashMap<u64, Raw<sys::CUstream>>,
    functions: Vec<(String, Raw<sys::CUfunction>)>,
    next_stream: u64,
}

/// CUDA implementation of [`Driver`].
#[derive(Debug, Default)]
pub struct CudaDriver {
    devices: Mutex<HashMap<usize, DeviceState>>,
}

impl std::fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("active", &self.context.is_some())
            .field("streams", &self.streams.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl CudaDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the context of `ordinal` to the calling thread and run `body`.
    fn with_bound<R>(&self, ordinal: usize, body: impl FnOnce(&mut DeviceState) -> Result<R>) -> Result<R> {
        let mut devices = self.devices.lock();
        let state = devices
            .get_mut(&ordinal)
            .filter(|state| state.context.is_some())
            .context(ContextSnafu { reason: format!("no active context on CUDA device {ordinal}") })?;
        if let Some(context) = &state.context {
            context.bind_to_thread().context(CudaSnafu)?;
        }
        body(state)
    }

    /// Load a PTX image into the active context of `ordinal` and register `names`.
    pub fn load_ptx(&self, ordinal: usize, ptx: &str, names: &[&str]) -> Result<()> {
        let image = CString::new(ptx)
            .map_err(|_| ContextSnafu { reason: "PTX source contains an interior NUL byte" }.build())?;
        self.with_bound(ordinal, |state| {
            // SAFETY: `image` is a NUL-terminated PTX string alive for the call.
            let module = unsafe { result::module::load_data(image.as_ptr() as *const c_void) }.context(CudaSnafu)?;
            for name in names {
                let symbol = CString::new(*name)
                    .map_err(|_| FunctionNotFoundSnafu { name: *name }.build())?;
                // SAFETY: `module` was just loaded in the bound context.
                let function = unsafe { result::module::get_function(module, symbol) }.context(CudaSnafu)?;
                state.functions.push((name.to_string(), Raw(function)));
            }
            Ok(())
        })
    }

    fn stream(state: &DeviceState, stream: StreamId) -> Option<sys::CUstream> {
        if stream == StreamId::DEFAULT {
            return Some(std::ptr::null_mut());
        }
        state.streams.get(&stream.0).map(|raw| raw.0)
    }
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "CUDA"
    }

    fn device_count(&self) -> Result<usize> {
        let count = CudaContext::device_count().context(CudaSnafu)?;
        Ok(count.max(0) as usize)
    }

    fn device_name(&self, ordinal: usize) -> Result<String> {
        let context = CudaContext::new(ordinal).context(CudaSnafu)?;
        context.name().context(CudaSnafu)
    }

    fn compute_capability(&self, ordinal: usize) -> Result<ComputeCapability> {
        type Attribute = sys::CUdevice_attribute;
        let context = CudaContext::new(ordinal).context(CudaSnafu)?;
        let major = context.attribute(Attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR).context(CudaSnafu)?;
        let minor = context.attribute(Attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR).context(CudaSnafu)?;
        Ok(ComputeCapability::new(major as u32, minor as u32))
    }

    fn begin_context(&self, ordinal: usize) -> Result<()> {
        let mut devices = self.devices.lock();
        let state = devices.entry(ordinal).or_default();
        ensure!(
            state.context.is_none(),
            ContextSnafu { reason: format!("CUDA device {ordinal} already has an active context") }
        );
        let context = CudaContext::new(ordinal).context(CudaSnafu)?;
        state.context = Some(context);
        state.next_stream = 1;
        Ok(())
    }

    fn end_context(&self, ordinal: usize) -> Result<()> {
        let mut devices = self.devices.lock();
        let state = devices
            .remove(&ordinal)
            .filter(|state| state.context.is_some())
            .context(ContextSnafu { reason: format!("CUDA device {ordinal} has no active context") })?;
        for (_, stream) in state.streams {
            // SAFETY: streams are destroyed once, before their context is released.
            unsafe { result::stream::destroy(stream.0) }.context(CudaSnafu)?;
        }
        Ok(())
    }

    fn allocate(&self, ordinal: usize, bytes: usize) -> Result<RawDevicePtr> {
        if bytes == 0 {
            return Ok(RawDevicePtr::null());
        }
        self.with_bound(ordinal, |_| {
            // SAFETY: a context is bound to this thread.
            let ptr = unsafe { result::malloc_sync(bytes) }
                .map_err(|e| AllocationSnafu { bytes, reason: e.to_string() }.build())?;
            Ok(RawDevicePtr::from_address(ptr))
        })
    }

    fn free(&self, ordinal: usize, ptr: RawDevicePtr) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        self.with_bound(ordinal, |_| {
            // SAFETY: caller contract of `Context::free`.
            unsafe { result::free_sync(ptr.address()) }.context(CudaSnafu)
        })
    }

    fn copy_host_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        self.with_bound(ordinal, |_| {
            // SAFETY: blocking copy; `src` outlives the call.
            unsafe { result::memcpy_htod_sync(dst.address(), src) }.map_err(|e| {
                TransferSnafu { direction: TransferDirection::HostToDevice, bytes: src.len(), reason: e.to_string() }
                    .build()
            })
        })
    }

    fn copy_device_to_host(&self, ordinal: usize, dst: &mut [u8], src: RawDevicePtr) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let bytes = dst.len();
        self.with_bound(ordinal, |_| {
            // SAFETY: blocking copy into an exclusively borrowed host slice.
            unsafe { result::memcpy_dtoh_sync(dst, src.address()) }.map_err(|e| {
                TransferSnafu { direction: TransferDirection::DeviceToHost, bytes, reason: e.to_string() }.build()
            })
        })
    }

    fn copy_device_to_device(&self, ordinal: usize, dst: RawDevicePtr, src: RawDevicePtr, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.with_bound(ordinal, |_| {
            // SAFETY: both ranges belong to the bound context (caller contract).
            unsafe { result::memcpy_dtod_sync(dst.address(), src.address(), bytes) }.map_err(|e| {
                TransferSnafu { direction: TransferDirection::DeviceToDevice, bytes, reason: e.to_string() }.build()
            })
        })
    }

    fn synchronize(&self, ordinal: usize) -> Result<()> {
        self.with_bound(ordinal, |state| match &state.context {
            Some(context) => context.synchronize().map_err(|e| SyncSnafu { reason: e.to_string() }.build()),
            None => Ok(()),
        })
    }

    fn function(&self, ordinal: usize, name: &str) -> Result<FunctionHandle> {
        self.with_bound(ordinal, |state| {
            let index =
                state.functions.iter().rposition(|(symbol, _)| symbol == name).context(FunctionNotFoundSnafu { name })?;
            Ok(FunctionHandle(index as u64 + 1))
        })
    }

    fn create_stream(&self, ordinal: usize) -> Result<StreamId> {
        self.with_bound(ordinal, |state| {
            #[allow(unused_unsafe)]
            let stream =
                unsafe { result::stream::create(result::stream::StreamKind::NonBlocking) }.context(CudaSnafu)?;
            let id = state.next_stream;
            state.next_stream += 1;
            state.streams.insert(id, Raw(stream));
            Ok(StreamId(id))
        })
    }

    fn destroy_stream(&self, ordinal: usize, stream: StreamId) -> Result<()> {
        self.with_bound(ordinal, |state| {
            let raw = state
                .streams
                .remove(&stream.0)
                .context(ContextSnafu { reason: format!("unknown stream {}", stream.0) })?;
            // SAFETY: removed from the table, so destroyed exactly once.
            unsafe { result::stream::destroy(raw.0) }.context(CudaSnafu)
        })
    }

    fn synchronize_stream(&self, ordinal: usize, stream: StreamId) -> Result<()> {
        self.with_bound(ordinal, |state| {
            let raw = Self::stream(state, stream)
                .context(ContextSnafu { reason: format!("unknown stream {}", stream.0) })?;
            // SAFETY: `raw` is null (default stream) or a live stream of the bound context.
            unsafe { result::stream::synchronize(raw) }.map_err(|e| SyncSnafu { reason: e.to_string() }.build())
        })
    }

    fn launch(
        &self,
        ordinal: usize,
        function: FunctionHandle,
        config: &LaunchConfig,
        stream: StreamId,
        args: &KernelArgs,
    ) -> Result<()> {
        self.with_bound(ordinal, |state| {
            let (name, raw_function) = (function.0 as usize)
                .checked_sub(1)
                .and_then(|index| state.functions.get(index))
                .context(FunctionNotFoundSnafu { name: format!("<handle {}>", function.0) })?;
            let raw_stream = Self::stream(state, stream)
                .context(LaunchSnafu { function: name.as_str(), reason: format!("unknown stream {}", stream.0) })?;

            // Each parameter pointer refers to that argument's bytes.
            let mut storage: Vec<_> = args.as_slice().iter().map(|arg| arg.bytes()).collect();
            let mut params: Vec<*mut c_void> =
                storage.iter_mut().map(|bytes| bytes.as_mut_ptr() as *mut c_void).collect();

            let grid = (config.grid.x, config.grid.y, config.grid.z);
            let block = (config.block.x, config.block.y, config.block.z);
            // SAFETY: `params` matches the kernel signature by caller contract and
            // `storage` outlives the launch call.
            unsafe {
                result::launch_kernel(raw_function.0, grid, block, config.shared_mem_bytes, raw_stream, &mut params)
            }
            .map_err(|e| LaunchSnafu { function: name.as_str(), reason: e.to_string() }.build())
        })
    }
}
