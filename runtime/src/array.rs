//! Copy-on-write device arrays.
//!
//! A [`DeviceArray`] behaves like a value: cloning it is cheap and shares the
//! device allocation, and the first mutation through a handle whose storage is
//! shared copies that handle's elements into a fresh allocation. Other handles
//! never observe the write.
//!
//! Slices are views (offset and length) into the same storage and take part in
//! the same sharing. Reads never copy.
//!
//! ```ignore
//! let a = device_array![&ctx; 1, 2, 3, 4, 5]?;
//! let mut b = a.clone();            // shares storage
//! b.set(0, 10)?;                    // b gets its own allocation
//! assert_eq!(a.copy_to_host()?, [1, 2, 3, 4, 5]);
//! assert_eq!(b.copy_to_host()?, [10, 2, 3, 4, 5]);
//! ```

use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::rc::Rc;

use kuda_device::{Context, DevicePtr, DevicePtrMut};
use snafu::ensure;

use crate::buffer::DeviceBuffer;
use crate::element::{ArrayDescriptor, DeviceElement};
use crate::error::{IndexOutOfBoundsSnafu, InvalidRangeSnafu, LengthMismatchSnafu, Result};
use crate::value::DeviceValue;

/// One allocation plus the host-side state of its elements.
struct Storage<T: DeviceElement> {
    buffer: DeviceBuffer<T::Slot>,
    retained: Vec<T::Retained>,
}

impl<T: DeviceElement> Storage<T> {
    /// Copy `len` elements starting at `offset` into a new storage.
    fn split(&self, offset: usize, len: usize) -> Result<Self> {
        let buffer = self.buffer.duplicate_range(offset, len)?;
        Ok(Self { buffer, retained: self.retained[offset..offset + len].to_vec() })
    }
}

/// Value-semantic array in device memory.
///
/// Not `Send`: the sharing state is an `Rc` strong count, so the uniqueness test
/// made before every write cannot race with a clone on another thread.
pub struct DeviceArray<T: DeviceElement> {
    storage: Rc<Storage<T>>,
    offset: usize,
    len: usize,
}

impl<T: DeviceElement> DeviceArray<T> {
    /// Allocate `len` elements without initializing them.
    pub fn with_capacity(ctx: &Context, len: usize) -> Result<Self> {
        let buffer = DeviceBuffer::new(ctx, len)?;
        let retained = vec![T::Retained::default(); len];
        Ok(Self::from_storage(Storage { buffer, retained }))
    }

    /// Allocate `values.len()` elements and upload `values`.
    pub fn from_host(ctx: &Context, values: &[T]) -> Result<Self>
    where
        T: Clone,
    {
        Self::from_iter_in(ctx, values.iter().cloned())
    }

    /// Upload the elements of `values`.
    pub fn from_iter_in(ctx: &Context, values: impl IntoIterator<Item = T>) -> Result<Self> {
        let (slots, retained): (Vec<T::Slot>, Vec<T::Retained>) = values.into_iter().map(T::into_slot).unzip();
        let buffer = DeviceBuffer::from_host(ctx, &slots)?;
        Ok(Self::from_storage(Storage { buffer, retained }))
    }

    fn from_storage(storage: Storage<T>) -> Self {
        let len = storage.buffer.len();
        Self { storage: Rc::new(storage), offset: 0, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn context(&self) -> &Context {
        self.storage.buffer.context()
    }

    /// Whether no other handle shares this array's storage.
    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.storage) == 1
    }

    pub fn shares_storage_with(&self, other: &DeviceArray<T>) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }

    /// Download the whole array.
    pub fn copy_to_host(&self) -> Result<Vec<T>> {
        let slots = self.storage.buffer.copy_range_to_host(self.offset, self.len)?;
        let retained = &self.storage.retained[self.offset..self.offset + self.len];
        slots
            .into_iter()
            .zip(retained)
            .enumerate()
            .map(|(index, (slot, retained))| T::from_slot(slot, retained, index))
            .collect()
    }

    /// Read element `index`.
    ///
    /// Plain values are snapshots: later writes to the array do not change them.
    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let slot = self.storage.buffer.get(self.offset + index)?;
        T::from_slot(slot, &self.storage.retained[self.offset + index], index)
    }

    /// Handle to element `index` that shares this array's storage.
    pub fn element(&self, index: usize) -> Result<DeviceValue<T>> {
        self.check_index(index)?;
        Ok(DeviceValue::from_array(self.view(index, 1)))
    }

    /// Write element `index`, copying the storage first if it is shared.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        let (slot, retained) = value.into_slot();
        let (offset, storage) = self.make_unique()?;
        storage.buffer.set(offset + index, slot)?;
        storage.retained[offset + index] = retained;
        Ok(())
    }

    /// Write element `index` from the device-resident `value`, without a host round trip.
    pub fn assign_element(&mut self, index: usize, value: &DeviceValue<T>) -> Result<()> {
        self.check_index(index)?;
        // Keep the source storage alive across a possible split of ours.
        let source = value.as_array().clone();
        let (offset, storage) = self.make_unique()?;
        storage.buffer.copy_from_buffer(offset + index, &source.storage.buffer, source.offset, 1)?;
        storage.retained[offset + index] = source.storage.retained[source.offset].clone();
        Ok(())
    }

    /// Replace element `index` with `f(old)`.
    pub fn update(&mut self, index: usize, f: impl FnOnce(T) -> T) -> Result<()> {
        let value = self.get(index)?;
        self.set(index, f(value))
    }

    /// Overwrite the whole array from host memory. `values` must have the array's length.
    pub fn copy_from_host(&mut self, values: &[T]) -> Result<()>
    where
        T: Clone,
    {
        ensure!(values.len() == self.len, LengthMismatchSnafu { expected: self.len, actual: values.len() });
        let (slots, retained): (Vec<T::Slot>, Vec<T::Retained>) =
            values.iter().cloned().map(T::into_slot).unzip();
        let (offset, storage) = self.make_unique()?;
        storage.buffer.copy_from_host(offset, &slots)?;
        storage.retained[offset..offset + slots.len()].clone_from_slice(&retained);
        Ok(())
    }

    /// View of `range`, sharing this array's storage.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => self.len,
        };
        ensure!(start <= end && end <= self.len, InvalidRangeSnafu { start, end, len: self.len });
        Ok(self.view(start, end - start))
    }

    /// Fold over the elements on the host.
    pub fn fold<B>(&self, init: B, f: impl FnMut(B, T) -> B) -> Result<B> {
        Ok(self.copy_to_host()?.into_iter().fold(init, f))
    }

    /// Map the elements on the host.
    pub fn map<R>(&self, f: impl FnMut(T) -> R) -> Result<Vec<R>> {
        Ok(self.copy_to_host()?.into_iter().map(f).collect())
    }

    /// Map the elements on the host, keeping the `Some` results.
    pub fn filter_map<R>(&self, f: impl FnMut(T) -> Option<R>) -> Result<Vec<R>> {
        Ok(self.copy_to_host()?.into_iter().filter_map(f).collect())
    }

    /// Read-only device pointer to the first element.
    ///
    /// Other handles may share the memory: nothing may be written through it.
    pub fn as_device_ptr(&self) -> DevicePtr<T::Slot> {
        self.storage.buffer.as_ptr().advanced(self.offset as isize)
    }

    /// Writable device pointer to the first element.
    ///
    /// The storage is made unique first, so writes through the pointer are seen
    /// by this handle only. The pointer is valid until the next operation that
    /// may copy this array (another mutation after a clone) or its drop.
    pub fn as_device_ptr_mut(&mut self) -> Result<DevicePtrMut<T::Slot>> {
        let (offset, storage) = self.make_unique()?;
        Ok(storage.buffer.as_mut_ptr().advanced(offset as isize))
    }

    pub(crate) fn descriptor(&self) -> ArrayDescriptor {
        ArrayDescriptor { address: self.as_device_ptr().as_raw().address(), len: self.len as u64 }
    }

    fn view(&self, offset: usize, len: usize) -> Self {
        Self { storage: Rc::clone(&self.storage), offset: self.offset + offset, len }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(index < self.len, IndexOutOfBoundsSnafu { index, len: self.len });
        Ok(())
    }

    /// Give this handle exclusive storage, copying its elements if the current
    /// storage is shared. Returns the handle's offset into that storage, which
    /// is reset to 0 by a split.
    fn make_unique(&mut self) -> Result<(usize, &mut Storage<T>)> {
        if Rc::get_mut(&mut self.storage).is_none() {
            let storage = self.storage.split(self.offset, self.len)?;
            tracing::trace!(
                context = self.context().id(),
                len = self.len,
                shared_by = Rc::strong_count(&self.storage),
                "copy-on-write split"
            );
            self.storage = Rc::new(storage);
            self.offset = 0;
        }
        let storage = Rc::get_mut(&mut self.storage).expect("freshly split storage is uniquely owned");
        Ok((self.offset, storage))
    }
}

impl<U: DeviceElement> DeviceArray<DeviceArray<U>> {
    /// Download every inner array.
    pub fn copy_to_host_nested(&self) -> Result<Vec<Vec<U>>> {
        self.copy_to_host()?.iter().map(DeviceArray::copy_to_host).collect()
    }
}

impl<T: DeviceElement> Clone for DeviceArray<T> {
    /// Share the storage; no device work.
    fn clone(&self) -> Self {
        self.view(0, self.len)
    }
}

impl<T: DeviceElement> fmt::Debug for DeviceArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("element", &std::any::type_name::<T>())
            .field("address", &self.as_device_ptr().as_raw())
            .field("len", &self.len)
            .field("shared_by", &Rc::strong_count(&self.storage))
            .finish()
    }
}

/// Build a [`DeviceArray`] from element expressions.
///
/// ```ignore
/// let xs = device_array![&ctx; 1.0f32, 2.0, 3.0]?;
/// let zeros = device_array![&ctx; 0u32; 128]?;
/// ```
#[macro_export]
macro_rules! device_array {
    ($ctx:expr; $value:expr; $len:expr) => {
        $crate::DeviceArray::from_iter_in($ctx, ::std::iter::repeat_n($value, $len))
    };
    ($ctx:expr; $($value:expr),* $(,)?) => {
        $crate::DeviceArray::from_iter_in($ctx, [$($value),*])
    };
}
