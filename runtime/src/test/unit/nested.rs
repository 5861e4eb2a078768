use crate::test::host_context;
use crate::{ArrayDescriptor, DeviceArray, Error, device_array};

#[test]
fn test_nested_literal_reads() {
    let (_, ctx) = host_context();
    let rows = [
        [[1.0f32, 0.0], [1.0, 2.0], [1.0, 3.0], [1.0, 4.0], [1.0, 5.0]],
        [[1.0, 2.0], [1.0, 2.0], [1.0, 3.0], [1.0, 4.0], [1.0, 5.0]],
    ];
    let vv: DeviceArray<DeviceArray<DeviceArray<f32>>> = DeviceArray::from_iter_in(
        &ctx,
        rows.iter().map(|row| {
            DeviceArray::from_iter_in(&ctx, row.iter().map(|pair| DeviceArray::from_host(&ctx, pair).unwrap()))
                .unwrap()
        }),
    )
    .unwrap();

    assert_eq!(vv.get(0).unwrap().get(1).unwrap().copy_to_host().unwrap(), vec![1.0, 2.0]);
    assert_eq!(vv.get(1).unwrap().get(4).unwrap().copy_to_host().unwrap(), vec![1.0, 5.0]);
    let row1 = vv.get(1).unwrap().copy_to_host_nested().unwrap();
    assert_eq!(row1, vec![vec![1.0, 2.0], vec![1.0, 2.0], vec![1.0, 3.0], vec![1.0, 4.0], vec![1.0, 5.0]]);
}

#[test]
fn test_nested_handles() {
    let (_, ctx) = host_context();
    let inner0 = device_array![&ctx; 1.0f32, 2.0, 3.0].unwrap();
    let inner1 = device_array![&ctx; 4.0f32, 5.0, 6.0].unwrap();
    let vv1 = device_array![&ctx; inner0, inner1].unwrap();

    assert_eq!(vv1.get(0).unwrap().copy_to_host().unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(vv1.get(1).unwrap().copy_to_host().unwrap(), vec![4.0, 5.0, 6.0]);
    for (row, expected) in [(0, [1.0, 2.0, 3.0]), (1, [4.0, 5.0, 6.0])] {
        let inner = vv1.get(row).unwrap();
        for (col, value) in expected.into_iter().enumerate() {
            assert_eq!(inner.element(col).unwrap().get().unwrap(), value);
        }
    }
}

#[test]
fn test_descriptors_point_at_inner_arrays() {
    let (_, ctx) = host_context();
    let inner = device_array![&ctx; 1u32, 2, 3, 4].unwrap();
    let tail = inner.slice(1..).unwrap();
    let outer = device_array![&ctx; inner.clone(), tail.clone()].unwrap();

    let descriptors: Vec<ArrayDescriptor> = outer.as_device_ptr().to_vec(&ctx, 2).unwrap();
    assert_eq!(descriptors[0], ArrayDescriptor { address: inner.as_device_ptr().as_raw().address(), len: 4 });
    assert_eq!(descriptors[1], ArrayDescriptor { address: tail.as_device_ptr().as_raw().address(), len: 3 });
}

#[test]
fn test_nested_mutation_does_not_write_through() {
    let (_, ctx) = host_context();
    let mut outer = device_array![&ctx; device_array![&ctx; 1i32, 2].unwrap()].unwrap();

    let mut inner = outer.get(0).unwrap();
    inner.set(0, 10).unwrap();
    assert_eq!(outer.copy_to_host_nested().unwrap(), vec![vec![1, 2]]);
    assert_eq!(inner.copy_to_host().unwrap(), vec![10, 2]);

    outer.set(0, inner).unwrap();
    assert_eq!(outer.copy_to_host_nested().unwrap(), vec![vec![10, 2]]);
}

#[test]
fn test_outer_copy_is_shallow() {
    let (driver, ctx) = host_context();
    let outer = device_array![&ctx; device_array![&ctx; 1u8].unwrap(), device_array![&ctx; 2u8].unwrap()].unwrap();
    let allocations = driver.stats().live_allocations;

    let mut copy = outer.clone();
    copy.set(1, device_array![&ctx; 20u8].unwrap()).unwrap();
    // New outer storage plus the new inner array; the untouched inner array is shared.
    assert_eq!(driver.stats().live_allocations, allocations + 2);
    assert!(copy.get(0).unwrap().shares_storage_with(&outer.get(0).unwrap()));
    assert_eq!(outer.copy_to_host_nested().unwrap(), vec![vec![1], vec![2]]);
    assert_eq!(copy.copy_to_host_nested().unwrap(), vec![vec![1], vec![20]]);
}

#[test]
fn test_inner_arrays_live_as_long_as_outer() {
    let (driver, ctx) = host_context();
    let outer = {
        let inner = device_array![&ctx; 5u64; 8].unwrap();
        device_array![&ctx; inner].unwrap()
    };
    assert_eq!(driver.stats().live_allocations, 2);
    assert_eq!(outer.get(0).unwrap().copy_to_host().unwrap(), vec![5; 8]);
    drop(outer);
    assert_eq!(driver.stats().live_allocations, 0);
}

#[test]
fn test_uninitialized_nested_slot() {
    let (_, ctx) = host_context();
    let mut outer = DeviceArray::<DeviceArray<f32>>::with_capacity(&ctx, 2).unwrap();
    assert!(matches!(outer.get(1), Err(Error::UninitializedElement { index: 1 })));
    outer.set(1, device_array![&ctx; 1.0f32].unwrap()).unwrap();
    assert!(matches!(outer.copy_to_host(), Err(Error::UninitializedElement { index: 0 })));
    assert_eq!(outer.slice(1..).unwrap().copy_to_host_nested().unwrap(), vec![vec![1.0]]);
}
