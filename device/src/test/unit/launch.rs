use test_case::test_case;

use crate::{Dim3, KernelArg, KernelArgs, LaunchConfig, RawDevicePtr};

#[test_case(LaunchConfig::new_1d(4, 256), 1024 ; "1d")]
#[test_case(LaunchConfig::new_2d((2, 3), (16, 16)), 1536 ; "2d")]
#[test_case(LaunchConfig::new_3d((1, 2, 2), (8, 8, 2)), 512 ; "3d")]
fn test_total_threads(config: LaunchConfig, expected: u64) {
    assert_eq!(config.total_threads(), expected);
}

#[test_case(1000, 256, 4 ; "rounds up")]
#[test_case(1024, 256, 4 ; "exact")]
#[test_case(1, 128, 1 ; "single element")]
fn test_for_num_elems(n: u32, block: u32, grid: u32) {
    let config = LaunchConfig::for_num_elems(n, block);
    assert_eq!(config.grid, Dim3::new(grid, 1, 1));
    assert_eq!(config.block, Dim3::new(block, 1, 1));
    assert_eq!(config.shared_mem_bytes, 0);
}

#[test]
fn test_dim3_conversions() {
    assert_eq!(Dim3::default(), Dim3::new(1, 1, 1));
    assert_eq!(Dim3::from(7), Dim3::new(7, 1, 1));
    assert_eq!(Dim3::from((2, 3)), Dim3::new(2, 3, 1));
    assert_eq!(Dim3::from((2, 3, 4)).volume(), 24);
}

#[test]
fn test_kernel_args_keep_order_and_bytes() {
    let ptr = RawDevicePtr::from_address(0xdead_0000);
    let mut args = KernelArgs::new();
    args.push_scalar(2.5f32).push_pointer(ptr).push_scalar(3u64);

    assert_eq!(args.len(), 3);
    let slice = args.as_slice();
    assert_eq!(slice[0].as_scalar::<f32>(), Some(2.5));
    assert_eq!(slice[0].as_scalar::<u64>(), None);
    assert_eq!(slice[1].as_pointer(), Some(ptr));
    assert_eq!(slice[1].bytes().as_slice(), &0xdead_0000u64.to_ne_bytes());
    assert!(matches!(&slice[2], KernelArg::Scalar(bytes) if bytes.len() == 8));
}
