//! Untyped and typed device pointers.
//!
//! Pointers never own memory. [`RawDevicePtr`] is a bare address with byte
//! arithmetic; [`DevicePtr`] and [`DevicePtrMut`] attach an element type and
//! perform blocking transfers through a [`Context`].
//!
//! Every element access through a typed pointer is a full driver transfer.
//! Callers that touch many elements should batch through
//! [`DevicePtr::copy_to_host`] / [`DevicePtrMut::copy_from_host`] instead.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;
use snafu::OptionExt;

use crate::context::Context;
use crate::driver::TransferDirection;
use crate::error::{AllocationSnafu, Result, TransferSnafu};

/// Untyped device address.
///
/// Either null or inside a live allocation; arithmetic is unchecked and the
/// caller keeps it within the owning allocation.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawDevicePtr(u64);

impl RawDevicePtr {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn from_address(address: u64) -> Self {
        Self(address)
    }

    pub const fn address(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Request `bytes` bytes from the device allocator of `ctx`.
    pub fn allocate(ctx: &Context, bytes: usize) -> Result<Self> {
        ctx.allocate(bytes)
    }

    /// Release the allocation starting at this address.
    ///
    /// # Safety
    ///
    /// `self` must come from [`RawDevicePtr::allocate`] on the same context and
    /// must not have been released already. No pointer into the allocation may
    /// be used afterwards.
    pub unsafe fn deallocate(self, ctx: &Context) -> Result<()> {
        unsafe { ctx.free(self) }
    }

    /// Offset by `bytes` bytes.
    pub const fn offset(self, bytes: isize) -> Self {
        Self(self.0.wrapping_add_signed(bytes as i64))
    }

    pub const fn cast<T>(self) -> DevicePtr<T> {
        DevicePtr::from_raw(self)
    }

    /// Reinterpret as a mutable typed pointer.
    ///
    /// # Safety
    ///
    /// Writes through the result bypass any copy-on-write bookkeeping of the
    /// owner of this address.
    pub const unsafe fn cast_mut<T>(self) -> DevicePtrMut<T> {
        unsafe { DevicePtrMut::from_raw(self) }
    }
}

impl fmt::Debug for RawDevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDevicePtr({:#x})", self.0)
    }
}

impl fmt::Display for RawDevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Size of `count` elements in bytes, `None` on overflow.
fn byte_len<T>(count: usize) -> Option<usize> {
    count.checked_mul(size_of::<T>())
}

const fn element_offset<T>(count: isize) -> isize {
    count * size_of::<T>() as isize
}

/// Read-only typed device pointer.
pub struct DevicePtr<T> {
    raw: RawDevicePtr,
    _marker: PhantomData<*const T>,
}

impl<T> DevicePtr<T> {
    pub const fn from_raw(raw: RawDevicePtr) -> Self {
        Self { raw, _marker: PhantomData }
    }

    pub const fn null() -> Self {
        Self::from_raw(RawDevicePtr::null())
    }

    pub const fn as_raw(self) -> RawDevicePtr {
        self.raw
    }

    pub const fn is_null(self) -> bool {
        self.raw.is_null()
    }

    /// Offset by `count` elements.
    pub const fn advanced(self, count: isize) -> Self {
        Self::from_raw(self.raw.offset(element_offset::<T>(count)))
    }
}

impl<T: Pod> DevicePtr<T> {
    /// Read the element this pointer addresses.
    pub fn load(self, ctx: &Context) -> Result<T> {
        self.get(ctx, 0)
    }

    /// Read element `index`: one device-to-host transfer.
    pub fn get(self, ctx: &Context, index: usize) -> Result<T> {
        let mut value = T::zeroed();
        ctx.copy_device_to_host(bytemuck::bytes_of_mut(&mut value), self.advanced(index as isize).raw)?;
        Ok(value)
    }

    /// Fill `dst` from `dst.len()` consecutive device elements.
    pub fn copy_to_host(self, ctx: &Context, dst: &mut [T]) -> Result<()> {
        ctx.copy_device_to_host(bytemuck::cast_slice_mut(dst), self.raw)
    }

    /// Read `count` consecutive device elements into a new vector.
    pub fn to_vec(self, ctx: &Context, count: usize) -> Result<Vec<T>> {
        let mut host = vec![T::zeroed(); count];
        self.copy_to_host(ctx, &mut host)?;
        Ok(host)
    }
}

/// Mutable typed device pointer.
pub struct DevicePtrMut<T> {
    raw: RawDevicePtr,
    _marker: PhantomData<*mut T>,
}

impl<T> DevicePtrMut<T> {
    /// # Safety
    ///
    /// The caller vouches that writes through this pointer are allowed for every
    /// element it will touch.
    pub const unsafe fn from_raw(raw: RawDevicePtr) -> Self {
        Self { raw, _marker: PhantomData }
    }

    pub const fn as_raw(self) -> RawDevicePtr {
        self.raw
    }

    pub const fn as_const(self) -> DevicePtr<T> {
        DevicePtr::from_raw(self.raw)
    }

    pub const fn is_null(self) -> bool {
        self.raw.is_null()
    }

    /// Offset by `count` elements.
    pub const fn advanced(self, count: isize) -> Self {
        Self { raw: self.raw.offset(element_offset::<T>(count)), _marker: PhantomData }
    }

    /// Allocate room for `capacity` elements.
    pub fn allocate(ctx: &Context, capacity: usize) -> Result<Self> {
        let bytes = byte_len::<T>(capacity).context(AllocationSnafu { bytes: usize::MAX, reason: "size overflow" })?;
        let raw = RawDevicePtr::allocate(ctx, bytes)?;
        Ok(Self { raw, _marker: PhantomData })
    }

    /// # Safety
    ///
    /// Same contract as [`RawDevicePtr::deallocate`].
    pub unsafe fn deallocate(self, ctx: &Context) -> Result<()> {
        unsafe { self.raw.deallocate(ctx) }
    }
}

impl<T: Pod> DevicePtrMut<T> {
    pub fn load(self, ctx: &Context) -> Result<T> {
        self.as_const().load(ctx)
    }

    pub fn get(self, ctx: &Context, index: usize) -> Result<T> {
        self.as_const().get(ctx, index)
    }

    pub fn copy_to_host(self, ctx: &Context, dst: &mut [T]) -> Result<()> {
        self.as_const().copy_to_host(ctx, dst)
    }

    pub fn to_vec(self, ctx: &Context, count: usize) -> Result<Vec<T>> {
        self.as_const().to_vec(ctx, count)
    }

    /// Write the element this pointer addresses.
    ///
    /// # Safety
    ///
    /// The element must lie inside a live allocation the caller may mutate.
    pub unsafe fn store(self, ctx: &Context, value: T) -> Result<()> {
        unsafe { self.set(ctx, 0, value) }
    }

    /// Write element `index`: one host-to-device transfer.
    ///
    /// # Safety
    ///
    /// Element `index` must lie inside a live allocation the caller may mutate.
    pub unsafe fn set(self, ctx: &Context, index: usize, value: T) -> Result<()> {
        ctx.copy_host_to_device(self.advanced(index as isize).raw, bytemuck::bytes_of(&value))
    }

    /// Upload `src` to the `src.len()` elements starting here.
    ///
    /// # Safety
    ///
    /// The destination range must lie inside a live allocation the caller may mutate.
    pub unsafe fn copy_from_host(self, ctx: &Context, src: &[T]) -> Result<()> {
        ctx.copy_host_to_device(self.raw, bytemuck::cast_slice(src))
    }

    /// Copy `count` elements from `src` on the device.
    ///
    /// # Safety
    ///
    /// Both ranges must lie inside live allocations; the destination must be
    /// mutable by the caller. Overlapping ranges give unspecified contents.
    pub unsafe fn copy_from_device(self, ctx: &Context, src: DevicePtr<T>, count: usize) -> Result<()> {
        let bytes = byte_len::<T>(count).context(TransferSnafu {
            direction: TransferDirection::DeviceToDevice,
            bytes: usize::MAX,
            reason: "size overflow",
        })?;
        ctx.copy_device_to_device(self.raw, src.as_raw(), bytes)
    }
}

macro_rules! impl_pointer_traits {
    ($($ptr:ident),*) => {$(
        impl<T> Clone for $ptr<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $ptr<T> {}

        impl<T> PartialEq for $ptr<T> {
            fn eq(&self, other: &Self) -> bool {
                self.raw == other.raw
            }
        }

        impl<T> Eq for $ptr<T> {}

        impl<T> fmt::Debug for $ptr<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>({:#x})", stringify!($ptr), std::any::type_name::<T>(), self.raw.address())
            }
        }
    )*};
}

impl_pointer_traits!(DevicePtr, DevicePtrMut);

impl<T> From<DevicePtrMut<T>> for DevicePtr<T> {
    fn from(ptr: DevicePtrMut<T>) -> Self {
        ptr.as_const()
    }
}
