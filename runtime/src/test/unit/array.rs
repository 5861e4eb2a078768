use kuda_device::HostDriverConfig;
use test_case::test_case;

use crate::test::{host_context, host_context_with};
use crate::{DeviceArray, Error, device_array};

#[test]
fn test_scenario_round_trip() {
    let (_, ctx) = host_context();
    let a = DeviceArray::from_host(&ctx, &[1i64, 2, 3, 4, 5]).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_scenario_copy_then_write() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1i64, 2, 3, 4, 5].unwrap();
    let mut b = a.clone();
    b.set(0, 3).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(b.copy_to_host().unwrap(), vec![3, 2, 3, 4, 5]);
}

#[test]
fn test_scenario_slice_then_parent_write() {
    let (_, ctx) = host_context();
    let mut a = device_array![&ctx; 1i64, 2, 3, 4, 5].unwrap();
    let s = a.slice(1..=3).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![2, 3, 4]);

    a.set(1, 20).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![2, 3, 4]);
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 20, 3, 4, 5]);
}

#[test]
fn test_clone_shares_until_write() {
    let (driver, ctx) = host_context();
    let a = device_array![&ctx; 1u32, 2, 3].unwrap();
    let mut b = a.clone();
    assert!(a.shares_storage_with(&b));
    assert!(!a.is_unique());
    assert_eq!(driver.stats().live_allocations, 1);

    b.set(2, 30).unwrap();
    assert!(!a.shares_storage_with(&b));
    assert!(a.is_unique() && b.is_unique());
    assert_eq!(driver.stats().live_allocations, 2);

    // Unique again: later writes stay in place.
    let address = b.as_device_ptr();
    b.set(0, 10).unwrap();
    assert_eq!(b.as_device_ptr(), address);
    assert_eq!(driver.stats().live_allocations, 2);
}

#[test]
fn test_value_independence_both_directions() {
    let (_, ctx) = host_context();
    let mut a = device_array![&ctx; 0i32; 4].unwrap();
    let mut b = a.clone();
    a.set(1, 11).unwrap();
    b.set(2, 22).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![0, 11, 0, 0]);
    assert_eq!(b.copy_to_host().unwrap(), vec![0, 0, 22, 0]);
}

#[test]
fn test_sharing_is_real_before_write() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1.0f32, 2.0, 3.0].unwrap();
    let b = a.clone();
    let alias = unsafe { a.as_device_ptr().as_raw().cast_mut::<f32>() };
    unsafe { alias.set(&ctx, 1, 42.0).unwrap() };
    assert_eq!(a.get(1).unwrap(), 42.0);
    assert_eq!(b.get(1).unwrap(), 42.0);
}

#[test]
fn test_read_is_snapshot() {
    let (_, ctx) = host_context();
    let mut v = device_array![&ctx; 1u8, 2, 3, 4].unwrap();
    let read = v.get(2).unwrap();
    assert_eq!(read, 3);
    v.set(2, 30).unwrap();
    assert_eq!(read, 3);
    assert_eq!(v.get(2).unwrap(), 30);
}

#[test]
fn test_slice_is_live_until_split() {
    let (_, ctx) = host_context();
    let mut a = device_array![&ctx; 1i16, 2, 3, 4, 5].unwrap();
    let s = a.slice(2..).unwrap();
    assert!(s.shares_storage_with(&a));

    let raw = unsafe { a.as_device_ptr().as_raw().cast_mut::<i16>() };
    unsafe { raw.set(&ctx, 3, 40).unwrap() };
    assert_eq!(s.copy_to_host().unwrap(), vec![3, 40, 5]);

    a.set(4, 50).unwrap();
    unsafe { a.as_device_ptr().as_raw().cast_mut::<i16>().set(&ctx, 2, 30).unwrap() };
    assert_eq!(s.copy_to_host().unwrap(), vec![3, 40, 5]);
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 30, 40, 50]);
}

#[test]
fn test_slice_write_copies_only_its_range() {
    let (driver, ctx) = host_context();
    let a = device_array![&ctx; 0u64; 1000].unwrap();
    let mut s = a.slice(10..13).unwrap();
    let bytes = driver.allocated_bytes();

    s.set(0, 7).unwrap();
    assert_eq!(driver.allocated_bytes(), bytes + 3 * 8);
    assert_eq!(s.copy_to_host().unwrap(), vec![7, 0, 0]);
    assert_eq!(a.get(10).unwrap(), 0);
}

#[test]
fn test_offset_slice_set_after_split() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1i32, 2, 3, 4, 5].unwrap();
    let mut s = a.slice(1..4).unwrap();
    s.set(0, 7).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![7, 3, 4]);
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4, 5]);

    let mut t = a.slice(3..).unwrap();
    let ptr = t.as_device_ptr_mut().unwrap();
    assert_eq!(ptr.as_const(), t.as_device_ptr());
    unsafe { ptr.set(&ctx, 1, 50).unwrap() };
    assert_eq!(t.copy_to_host().unwrap(), vec![4, 50]);
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_offset_slice_bulk_writes_after_split() {
    let (_, ctx) = host_context();
    let a = DeviceArray::from_iter_in(&ctx, 0u32..100).unwrap();

    let mut s = a.slice(90..93).unwrap();
    s.copy_from_host(&[7, 8, 9]).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![7, 8, 9]);

    let mut t = a.slice(50..52).unwrap();
    t.assign_element(1, &a.element(0).unwrap()).unwrap();
    assert_eq!(t.copy_to_host().unwrap(), vec![50, 0]);

    assert_eq!(a.copy_to_host().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_unique_offset_slice_keeps_offset() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1u8, 2, 3, 4].unwrap();
    let mut s = a.slice(2..).unwrap();
    drop(a);
    let start = s.as_device_ptr();
    assert_eq!(s.as_device_ptr_mut().unwrap().as_const(), start);
    s.copy_from_host(&[30, 40]).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![30, 40]);
}

#[test]
fn test_capacity_overflow_is_allocation_error() {
    let (driver, ctx) = host_context();
    let error = DeviceArray::<u32>::with_capacity(&ctx, usize::MAX / 2).unwrap_err();
    assert!(error.is_allocation(), "{error}");
    assert_eq!(driver.stats().total_allocations, 0);
}

#[test]
fn test_unique_slice_writes_in_place() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1i32, 2, 3, 4].unwrap();
    let mut s = a.slice(1..3).unwrap();
    drop(a);
    assert!(s.is_unique());
    s.set(1, 30).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![2, 30]);
}

#[test_case(3..2 ; "reversed")]
#[test_case(0..6 ; "past end")]
#[test_case(6..6 ; "empty past end")]
fn test_invalid_slice(range: std::ops::Range<usize>) {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 0u8; 5].unwrap();
    assert!(matches!(a.slice(range), Err(Error::InvalidRange { len: 5, .. })));
}

#[test]
fn test_slice_of_slice() {
    let (_, ctx) = host_context();
    let a = DeviceArray::from_iter_in(&ctx, 0u32..10).unwrap();
    let s = a.slice(2..8).unwrap().slice(1..=2).unwrap();
    assert_eq!(s.copy_to_host().unwrap(), vec![3, 4]);
    assert_eq!(s.len(), 2);
    assert!(a.slice(..).unwrap().shares_storage_with(&a));
    assert!(a.slice(5..5).unwrap().is_empty());
}

#[test]
fn test_index_out_of_bounds() {
    let (_, ctx) = host_context();
    let mut a = device_array![&ctx; 1u8, 2].unwrap();
    assert!(matches!(a.get(2), Err(Error::IndexOutOfBounds { index: 2, len: 2 })));
    assert!(matches!(a.set(5, 0), Err(Error::IndexOutOfBounds { index: 5, len: 2 })));
    assert!(a.element(2).is_err());
}

#[test]
fn test_update() {
    let (_, ctx) = host_context();
    let mut a = device_array![&ctx; 1.5f64, 2.5].unwrap();
    a.update(1, |x| x * 2.0).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![1.5, 5.0]);
}

#[test]
fn test_host_combinators() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1i32, -2, 3, -4, 5].unwrap();
    assert_eq!(a.fold(0, |acc, x| acc + x).unwrap(), 3);
    assert_eq!(a.map(|x| x * x).unwrap(), vec![1, 4, 9, 16, 25]);
    assert_eq!(a.filter_map(|x| u32::try_from(x).ok()).unwrap(), vec![1, 3, 5]);
}

#[test]
fn test_copy_from_host() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 0u16; 3].unwrap();
    let mut b = a.clone();
    b.copy_from_host(&[4, 5, 6]).unwrap();
    assert_eq!(a.copy_to_host().unwrap(), vec![0, 0, 0]);
    assert_eq!(b.copy_to_host().unwrap(), vec![4, 5, 6]);
    assert!(matches!(b.copy_from_host(&[1]), Err(Error::LengthMismatch { expected: 3, actual: 1 })));
}

#[test]
fn test_as_device_ptr_mut_splits_first() {
    let (_, ctx) = host_context();
    let a = device_array![&ctx; 1u32, 2, 3].unwrap();
    let mut b = a.clone();
    let ptr = b.as_device_ptr_mut().unwrap();
    assert_ne!(ptr.as_const(), a.as_device_ptr());
    unsafe { ptr.set(&ctx, 0, 100).unwrap() };
    assert_eq!(a.copy_to_host().unwrap(), vec![1, 2, 3]);
    assert_eq!(b.copy_to_host().unwrap(), vec![100, 2, 3]);
}

#[test]
fn test_allocation_failure() {
    let (driver, ctx) = host_context_with(HostDriverConfig::builder().memory_limit(64).build());
    let error = DeviceArray::<u64>::with_capacity(&ctx, 9).unwrap_err();
    assert!(error.is_allocation(), "{error}");
    assert_eq!(driver.allocated_bytes(), 0);

    // A copy-on-write split that does not fit fails and leaves the handle untouched.
    let a = DeviceArray::<u64>::with_capacity(&ctx, 5).unwrap();
    let mut b = a.clone();
    let error = b.set(0, 1).unwrap_err();
    assert!(error.is_allocation(), "{error}");
    assert!(b.shares_storage_with(&a));
    assert_eq!(driver.allocated_bytes(), 40);
}

#[test]
fn test_storage_freed_with_last_handle() {
    let (driver, ctx) = host_context();
    let a = device_array![&ctx; 1u32, 2, 3].unwrap();
    let s = a.slice(1..).unwrap();
    let c = a.clone();
    drop(a);
    drop(c);
    assert_eq!(driver.stats().live_allocations, 1);
    drop(s);
    let stats = driver.stats();
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.total_frees, stats.total_allocations);
}

#[test]
fn test_empty_literal() {
    let (_, ctx) = host_context();
    let a: DeviceArray<f32> = device_array![&ctx;].unwrap();
    assert!(a.is_empty());
    assert!(a.copy_to_host().unwrap().is_empty());
}
