//! Single-element device values, backed by a length-one [`DeviceArray`].

use std::fmt;

use kuda_device::{Context, DevicePtr, DevicePtrMut};

use crate::array::DeviceArray;
use crate::element::DeviceElement;
use crate::error::Result;

/// A single element in device memory, with the same copy-on-write semantics
/// as [`DeviceArray`].
///
/// Handles returned by [`DeviceArray::element`] share the array's storage until
/// either side is written.
pub struct DeviceValue<T: DeviceElement> {
    array: DeviceArray<T>,
}

impl<T: DeviceElement> DeviceValue<T> {
    pub fn new(ctx: &Context, value: T) -> Result<Self> {
        Ok(Self::from_array(DeviceArray::from_iter_in(ctx, [value])?))
    }

    /// `array` must have exactly one element.
    pub(crate) fn from_array(array: DeviceArray<T>) -> Self {
        debug_assert_eq!(array.len(), 1);
        Self { array }
    }

    /// Read the value: one device-to-host transfer.
    pub fn get(&self) -> Result<T> {
        self.array.get(0)
    }

    /// Write the value, copying it first if the storage is shared.
    pub fn set(&mut self, value: T) -> Result<()> {
        self.array.set(0, value)
    }

    pub fn update(&mut self, f: impl FnOnce(T) -> T) -> Result<()> {
        self.array.update(0, f)
    }

    pub fn context(&self) -> &Context {
        self.array.context()
    }

    pub fn is_unique(&self) -> bool {
        self.array.is_unique()
    }

    pub fn as_device_ptr(&self) -> DevicePtr<T::Slot> {
        self.array.as_device_ptr()
    }

    /// Copy-on-write first; see [`DeviceArray::as_device_ptr_mut`].
    pub fn as_device_ptr_mut(&mut self) -> Result<DevicePtrMut<T::Slot>> {
        self.array.as_device_ptr_mut()
    }

    pub fn as_array(&self) -> &DeviceArray<T> {
        &self.array
    }

    pub fn into_array(self) -> DeviceArray<T> {
        self.array
    }
}

impl<T: DeviceElement> Clone for DeviceValue<T> {
    fn clone(&self) -> Self {
        Self { array: self.array.clone() }
    }
}

impl<T: DeviceElement> From<DeviceValue<T>> for DeviceArray<T> {
    fn from(value: DeviceValue<T>) -> Self {
        value.into_array()
    }
}

impl<T: DeviceElement> fmt::Debug for DeviceValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceValue").field(&self.array).finish()
    }
}
