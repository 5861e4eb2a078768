use std::sync::Arc;

use crate::test::host_device;
use crate::{ComputeCapability, Context, Device, Driver, Error, HostDriver, HostDriverConfig};

#[test]
fn test_device_queries() {
    let driver = Arc::new(HostDriver::new(HostDriverConfig::builder().device_count(3).build()));
    assert_eq!(Device::count(&*driver).unwrap(), 3);
    let devices = Device::all(driver.clone()).unwrap();
    assert_eq!(devices.len(), 3);
    assert_eq!(devices[2].ordinal(), 2);
    assert_eq!(devices[1].compute_capability().unwrap(), ComputeCapability::new(8, 0));
    assert_eq!(devices[0], Device::get(driver.clone(), 0).unwrap());
}

#[test]
fn test_invalid_ordinal() {
    let driver = Arc::new(HostDriver::default());
    let error = Device::get(driver, 1).unwrap_err();
    assert!(matches!(&error, Error::InvalidDevice { device } if device == "HOST:1"), "{error}");
}

#[test]
fn test_second_context_is_rejected() {
    let (_, device) = host_device();
    let first = device.begin_context().unwrap();
    let error = device.begin_context().unwrap_err();
    assert!(error.is_context(), "{error}");
    first.end().unwrap();
    assert!(device.begin_context().is_ok());
}

#[test]
fn test_guard_drop_ends_context() {
    let (driver, device) = host_device();
    let ctx = {
        let guard = device.begin_context().unwrap();
        guard.allocate(32).unwrap();
        Context::clone(&guard)
    };
    assert!(!ctx.is_active());
    assert_eq!(driver.allocated_bytes(), 0);
    let error = ctx.allocate(4).unwrap_err();
    assert!(error.is_context(), "{error}");
}

#[test]
fn test_with_context_ends_on_error() {
    let (driver, device) = host_device();
    let mut escaped = None;
    let result: crate::Result<()> = device.with_context(|ctx| {
        escaped = Some(ctx.clone());
        ctx.allocate(16)?;
        Err(Error::Sync { reason: "kernel fault".into() })
    });
    assert!(matches!(result, Err(Error::Sync { .. })));

    let ctx = escaped.unwrap();
    assert!(!ctx.is_active());
    assert!(driver.begin_context(0).is_ok());
}

#[test]
fn test_with_context_returns_body_value() {
    let (_, device) = host_device();
    let (id, active) = device.with_context(|ctx| Ok((ctx.id(), ctx.is_active()))).unwrap();
    assert!(id > 0);
    assert!(active);
}

#[test]
fn test_clones_share_context() {
    let (_, device) = host_device();
    let guard = device.begin_context().unwrap();
    let a = Context::clone(&guard);
    let b = a.clone();
    assert!(a.same_as(&b));
    assert_eq!(a.device(), &device);
    guard.end().unwrap();
    assert!(!b.is_active());
}
