//! Passing arrays and values to kernels.

use kuda_device::KernelArgs;

use crate::array::DeviceArray;
use crate::element::DeviceElement;
use crate::error::Result;
use crate::value::DeviceValue;

/// Push device containers onto a [`KernelArgs`] list.
///
/// Read-only arguments are passed as-is and may share memory with other
/// handles, so kernels must not write through them. Arguments a kernel writes
/// go through the `_mut` variants, which split shared storage first.
pub trait ArrayArgs {
    fn push_array<T: DeviceElement>(&mut self, array: &DeviceArray<T>) -> &mut Self;

    fn push_array_mut<T: DeviceElement>(&mut self, array: &mut DeviceArray<T>) -> Result<&mut Self>;

    fn push_value<T: DeviceElement>(&mut self, value: &DeviceValue<T>) -> &mut Self;

    fn push_value_mut<T: DeviceElement>(&mut self, value: &mut DeviceValue<T>) -> Result<&mut Self>;
}

impl ArrayArgs for KernelArgs {
    fn push_array<T: DeviceElement>(&mut self, array: &DeviceArray<T>) -> &mut Self {
        self.push_pointer(array.as_device_ptr().as_raw())
    }

    fn push_array_mut<T: DeviceElement>(&mut self, array: &mut DeviceArray<T>) -> Result<&mut Self> {
        let ptr = array.as_device_ptr_mut()?;
        Ok(self.push_pointer(ptr.as_raw()))
    }

    fn push_value<T: DeviceElement>(&mut self, value: &DeviceValue<T>) -> &mut Self {
        self.push_pointer(value.as_device_ptr().as_raw())
    }

    fn push_value_mut<T: DeviceElement>(&mut self, value: &mut DeviceValue<T>) -> Result<&mut Self> {
        let ptr = value.as_device_ptr_mut()?;
        Ok(self.push_pointer(ptr.as_raw()))
    }
}
