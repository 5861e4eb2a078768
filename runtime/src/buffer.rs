//! Owned device allocations.

use std::fmt;

use bytemuck::Pod;
use kuda_device::error::ContextSnafu;
use kuda_device::{Context, DevicePtr, DevicePtrMut};
use snafu::{ResultExt, ensure};

use crate::error::{DeviceSnafu, IndexOutOfBoundsSnafu, InvalidRangeSnafu, Result};

/// Owns exactly one device allocation of `len` elements of `T`.
///
/// The allocation is made on construction and released when the buffer is
/// dropped. A buffer outliving its context skips the release: ending a
/// context already returns everything it allocated.
pub struct DeviceBuffer<T: Pod> {
    ptr: DevicePtrMut<T>,
    len: usize,
    context: Context,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Allocate room for `len` elements. Contents are unspecified.
    pub fn new(ctx: &Context, len: usize) -> Result<Self> {
        let ptr = DevicePtrMut::allocate(ctx, len).context(DeviceSnafu)?;
        tracing::trace!(context = ctx.id(), len, elem.size = size_of::<T>(), address = %ptr.as_raw(), "buffer allocated");
        Ok(Self { ptr, len, context: ctx.clone() })
    }

    /// Allocate and upload `values`.
    pub fn from_host(ctx: &Context, values: &[T]) -> Result<Self> {
        // On upload failure `buffer` is dropped here, releasing the allocation.
        let buffer = Self::new(ctx, values.len())?;
        unsafe { buffer.ptr.copy_from_host(ctx, values) }.context(DeviceSnafu)?;
        Ok(buffer)
    }

    /// Fresh buffer holding a device-side copy of this one.
    pub fn duplicate(&self) -> Result<Self> {
        self.duplicate_range(0, self.len)
    }

    /// Fresh buffer holding a device-side copy of `len` elements starting at `offset`.
    pub fn duplicate_range(&self, offset: usize, len: usize) -> Result<Self> {
        self.check_range(offset, len)?;
        let copy = Self::new(&self.context, len)?;
        unsafe { copy.ptr.copy_from_device(&self.context, self.as_ptr().advanced(offset as isize), len) }
            .context(DeviceSnafu)?;
        Ok(copy)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn as_ptr(&self) -> DevicePtr<T> {
        self.ptr.as_const()
    }

    pub fn as_mut_ptr(&mut self) -> DevicePtrMut<T> {
        self.ptr
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        self.ptr.get(&self.context, index).context(DeviceSnafu)
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        unsafe { self.ptr.set(&self.context, index, value) }.context(DeviceSnafu)
    }

    pub fn copy_to_host(&self) -> Result<Vec<T>> {
        self.copy_range_to_host(0, self.len)
    }

    pub fn copy_range_to_host(&self, offset: usize, len: usize) -> Result<Vec<T>> {
        self.check_range(offset, len)?;
        self.as_ptr().advanced(offset as isize).to_vec(&self.context, len).context(DeviceSnafu)
    }

    /// Overwrite `values.len()` elements starting at `offset`.
    pub fn copy_from_host(&mut self, offset: usize, values: &[T]) -> Result<()> {
        self.check_range(offset, values.len())?;
        unsafe { self.ptr.advanced(offset as isize).copy_from_host(&self.context, values) }.context(DeviceSnafu)
    }

    /// Copy `len` elements of `src` starting at `src_offset` to `offset`.
    pub fn copy_from_buffer(
        &mut self,
        offset: usize,
        src: &DeviceBuffer<T>,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.check_range(offset, len)?;
        src.check_range(src_offset, len)?;
        if !self.context.same_as(&src.context) {
            let reason = format!("buffers belong to contexts {} and {}", self.context.id(), src.context.id());
            return Err(ContextSnafu { reason }.build()).context(DeviceSnafu);
        }
        unsafe {
            self.ptr.advanced(offset as isize).copy_from_device(
                &self.context,
                src.as_ptr().advanced(src_offset as isize),
                len,
            )
        }
        .context(DeviceSnafu)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(index < self.len, IndexOutOfBoundsSnafu { index, len: self.len });
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len);
        ensure!(
            end.is_some_and(|end| end <= self.len),
            InvalidRangeSnafu { start: offset, end: end.unwrap_or(usize::MAX), len: self.len }
        );
        Ok(())
    }
}

impl<T: Pod> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if !self.context.is_active() {
            tracing::trace!(address = %self.ptr.as_raw(), "context ended before buffer drop; skipping free");
            return;
        }
        if let Err(error) = unsafe { self.ptr.deallocate(&self.context) } {
            tracing::warn!(address = %self.ptr.as_raw(), %error, "failed to free device buffer");
        }
    }
}

impl<T: Pod> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("context", &self.context.id())
            .finish()
    }
}
