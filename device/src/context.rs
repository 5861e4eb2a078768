//! Devices and scoped contexts.
//!
//! A [`Context`] binds host control flow to one device. It is an explicit,
//! cheaply clonable handle passed to every device-touching operation; there is
//! no process-wide "current context". Contexts are acquired with
//! [`Device::begin_context`] (a guard that ends the context on drop) or
//! [`Device::with_context`] (a closure scope).
//!
//! # Example
//!
//! ```ignore
//! let driver: Arc<dyn Driver> = Arc::new(HostDriver::default());
//! let device = Device::get(driver, 0)?;
//! let sum = device.with_context(|ctx| {
//!     let ptr = DevicePtrMut::<f32>::allocate(ctx, 4)?;
//!     // ...
//!     Ok(())
//! })?;
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use snafu::ensure;

use crate::driver::{ComputeCapability, Driver};
use crate::error::{ContextSnafu, InvalidDeviceSnafu, Result};
use crate::launch::{Function, KernelArgs, LaunchConfig, StreamId};
use crate::pointer::RawDevicePtr;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A device exposed by a driver.
#[derive(Clone)]
pub struct Device {
    driver: Arc<dyn Driver>,
    ordinal: usize,
}

impl Device {
    /// Number of devices the driver exposes.
    pub fn count(driver: &dyn Driver) -> Result<usize> {
        driver.device_count()
    }

    /// Device `ordinal` of `driver`.
    pub fn get(driver: Arc<dyn Driver>, ordinal: usize) -> Result<Self> {
        let count = driver.device_count()?;
        ensure!(ordinal < count, InvalidDeviceSnafu { device: format!("{}:{ordinal}", driver.name()) });
        Ok(Self { driver, ordinal })
    }

    /// All devices of `driver`.
    pub fn all(driver: Arc<dyn Driver>) -> Result<Vec<Self>> {
        let count = driver.device_count()?;
        Ok((0..count).map(|ordinal| Self { driver: Arc::clone(&driver), ordinal }).collect())
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn name(&self) -> Result<String> {
        self.driver.device_name(self.ordinal)
    }

    pub fn compute_capability(&self) -> Result<ComputeCapability> {
        self.driver.compute_capability(self.ordinal)
    }

    /// Create a context on this device.
    ///
    /// The context stays active until the returned guard is dropped or
    /// [`ContextGuard::end`] is called. A device accepts one active context at a time.
    pub fn begin_context(&self) -> Result<ContextGuard> {
        self.driver.begin_context(self.ordinal)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = self.ordinal, context = id, driver = self.driver.name(), "context begun");
        let context = Context {
            inner: Arc::new(ContextInner { device: self.clone(), id, active: AtomicBool::new(true) }),
        };
        Ok(ContextGuard { context: Some(context) })
    }

    /// Run `body` inside a fresh context.
    ///
    /// The context is synchronized and ended when `body` returns, including
    /// when it returns an error.
    pub fn with_context<R>(&self, body: impl FnOnce(&Context) -> Result<R>) -> Result<R> {
        let guard = self.begin_context()?;
        let result = body(&*guard)?;
        guard.end()?;
        Ok(result)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.driver, &other.driver) && self.ordinal == other.ordinal
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("driver", &self.driver.name()).field("ordinal", &self.ordinal).finish()
    }
}

struct ContextInner {
    device: Device,
    id: u64,
    active: AtomicBool,
}

/// Handle to an execution context on one device.
///
/// Clones refer to the same context. Once the context ended, every operation
/// through any clone fails with a context error.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same context.
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn driver(&self) -> &dyn Driver {
        &*self.inner.device.driver
    }

    fn ordinal(&self) -> usize {
        self.inner.device.ordinal
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        ensure!(self.is_active(), ContextSnafu { reason: format!("context {} has ended", self.inner.id) });
        Ok(())
    }

    pub fn allocate(&self, bytes: usize) -> Result<RawDevicePtr> {
        self.ensure_active()?;
        let ptr = self.driver().allocate(self.ordinal(), bytes)?;
        tracing::debug!(context = self.inner.id, bytes, address = %ptr, "device allocation");
        Ok(ptr)
    }

    /// # Safety
    ///
    /// `ptr` must be a live allocation of this context, released only once.
    pub unsafe fn free(&self, ptr: RawDevicePtr) -> Result<()> {
        self.ensure_active()?;
        tracing::debug!(context = self.inner.id, address = %ptr, "device free");
        self.driver().free(self.ordinal(), ptr)
    }

    pub fn copy_host_to_device(&self, dst: RawDevicePtr, src: &[u8]) -> Result<()> {
        self.ensure_active()?;
        tracing::trace!(context = self.inner.id, bytes = src.len(), dst = %dst, "host-to-device copy");
        self.driver().copy_host_to_device(self.ordinal(), dst, src)
    }

    pub fn copy_device_to_host(&self, dst: &mut [u8], src: RawDevicePtr) -> Result<()> {
        self.ensure_active()?;
        tracing::trace!(context = self.inner.id, bytes = dst.len(), src = %src, "device-to-host copy");
        self.driver().copy_device_to_host(self.ordinal(), dst, src)
    }

    pub fn copy_device_to_device(&self, dst: RawDevicePtr, src: RawDevicePtr, bytes: usize) -> Result<()> {
        self.ensure_active()?;
        tracing::trace!(context = self.inner.id, bytes, dst = %dst, src = %src, "device-to-device copy");
        self.driver().copy_device_to_device(self.ordinal(), dst, src, bytes)
    }

    /// Block until all work issued in this context completed.
    pub fn synchronize(&self) -> Result<()> {
        self.ensure_active()?;
        self.driver().synchronize(self.ordinal())
    }

    /// Resolve a loaded kernel by name.
    pub fn function(&self, name: &str) -> Result<Function> {
        self.ensure_active()?;
        let handle = self.driver().function(self.ordinal(), name)?;
        Ok(Function::new(name, handle))
    }

    /// Launch on the default stream. Failures surface at this call.
    pub fn launch(&self, function: &Function, config: &LaunchConfig, args: &KernelArgs) -> Result<()> {
        self.launch_on(StreamId::DEFAULT, function, config, args)
    }

    pub(crate) fn launch_on(
        &self,
        stream: StreamId,
        function: &Function,
        config: &LaunchConfig,
        args: &KernelArgs,
    ) -> Result<()> {
        self.ensure_active()?;
        tracing::debug!(
            context = self.inner.id,
            kernel.name = function.name(),
            grid = ?config.grid,
            block = ?config.block,
            stream = stream.0,
            "kernel launch"
        );
        self.driver().launch(self.ordinal(), function.handle(), config, stream, args)
    }

    pub(crate) fn create_stream(&self) -> Result<StreamId> {
        self.ensure_active()?;
        self.driver().create_stream(self.ordinal())
    }

    pub(crate) fn destroy_stream(&self, stream: StreamId) -> Result<()> {
        self.ensure_active()?;
        self.driver().destroy_stream(self.ordinal(), stream)
    }

    pub(crate) fn synchronize_stream(&self, stream: StreamId) -> Result<()> {
        self.ensure_active()?;
        self.driver().synchronize_stream(self.ordinal(), stream)
    }

    fn end(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let synced = self.driver().synchronize(self.ordinal());
        let ended = self.driver().end_context(self.ordinal());
        tracing::debug!(context = self.inner.id, device = self.ordinal(), "context ended");
        synced.and(ended)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Owns the lifetime of a context; ends it on drop.
pub struct ContextGuard {
    context: Option<Context>,
}

impl ContextGuard {
    /// Synchronize and end the context, reporting failures.
    pub fn end(mut self) -> Result<()> {
        match self.context.take() {
            Some(context) => context.end(),
            None => Ok(()),
        }
    }
}

impl Deref for ContextGuard {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.context.as_ref().expect("context guard used after end")
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(error) = context.end() {
                tracing::warn!(context = context.id(), %error, "failed to end context");
            }
        }
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard").field("context", &self.context).finish()
    }
}
