//! What an array element looks like on the device and on the host.
//!
//! Plain-old-data values are written to device memory as-is. An array stored
//! inside another array is written as an [`ArrayDescriptor`] (device address and
//! length), while the outer array keeps the inner handle alive on the host.

use bytemuck::{Pod, Zeroable};
use snafu::OptionExt;

use crate::array::DeviceArray;
use crate::error::{Result, UninitializedElementSnafu};

/// Element type of a [`DeviceArray`].
pub trait DeviceElement: Sized + 'static {
    /// Representation in device memory.
    type Slot: Pod;
    /// Host-side state kept alive alongside each slot.
    type Retained: Clone + Default;

    fn into_slot(self) -> (Self::Slot, Self::Retained);

    /// Rebuild the element at `index` from its slot and retained state.
    fn from_slot(slot: Self::Slot, retained: &Self::Retained, index: usize) -> Result<Self>;
}

impl<T: Pod> DeviceElement for T {
    type Slot = T;
    type Retained = ();

    fn into_slot(self) -> (T, ()) {
        (self, ())
    }

    fn from_slot(slot: T, _: &(), _: usize) -> Result<T> {
        Ok(slot)
    }
}

/// Device-side view of an inner array: what a kernel sees for each element
/// of a nested array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ArrayDescriptor {
    pub address: u64,
    pub len: u64,
}

impl<U: DeviceElement> DeviceElement for DeviceArray<U> {
    type Slot = ArrayDescriptor;
    type Retained = Option<DeviceArray<U>>;

    fn into_slot(self) -> (ArrayDescriptor, Option<DeviceArray<U>>) {
        let descriptor = self.descriptor();
        (descriptor, Some(self))
    }

    fn from_slot(_: ArrayDescriptor, retained: &Option<DeviceArray<U>>, index: usize) -> Result<Self> {
        retained.clone().context(UninitializedElementSnafu { index })
    }
}
