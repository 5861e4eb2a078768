//! Device-memory containers with value semantics.
//!
//! [`DeviceArray`] and [`DeviceValue`] live in GPU memory but behave like
//! ordinary Rust values: clones share one allocation until one of them is
//! written, at which point the writer gets its own copy (copy-on-write).
//! [`DeviceBuffer`] is the single owner of every allocation they use.
//!
//! Arrays can be nested (`DeviceArray<DeviceArray<f32>>`): the outer allocation
//! holds an [`ArrayDescriptor`] per element and keeps the inner arrays alive.
//! Copying an outer array never copies the inner ones.

pub mod args;
pub mod array;
pub mod buffer;
pub mod element;
pub mod error;
pub mod value;

#[cfg(test)]
pub mod test;

pub use args::ArrayArgs;
pub use array::DeviceArray;
pub use buffer::DeviceBuffer;
pub use element::{ArrayDescriptor, DeviceElement};
pub use error::*;
pub use value::DeviceValue;
