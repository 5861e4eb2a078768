use std::sync::Arc;

use kuda_device::{ContextGuard, Device, HostDriver, HostDriverConfig};


/// Host driver with an active context on its first device.
pub fn host_context() -> (Arc<HostDriver>, ContextGuard) {
    host_context_with(HostDriverConfig::default())
}

pub fn host_context_with(config: HostDriverConfig) -> (Arc<HostDriver>, ContextGuard) {
    let driver = Arc::new(HostDriver::new(config));
    let guard = Device::get(driver.clone(), 0).unwrap().begin_context().unwrap();
    (driver, guard)
}
