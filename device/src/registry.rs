use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::context::Device;
use crate::driver::Driver;
use crate::error::{Error, InvalidDeviceSnafu, Result};
use crate::host::{HostDriver, HostDriverConfig};

/// Environment variable naming the default device.
pub const DEVICE_ENV: &str = "KUDA_DEVICE";

/// Which driver a device belongs to, and its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSpec {
    Host { ordinal: usize },
    Cuda { ordinal: usize },
}

/// Driver family of a [`DeviceSpec`]; one driver instance is cached per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DriverKind {
    Host,
    Cuda,
}

impl DeviceSpec {
    /// Parse a device string.
    ///
    /// Examples:
    /// - "HOST" -> DeviceSpec::Host { ordinal: 0 }
    /// - "CUDA:1" -> DeviceSpec::Cuda { ordinal: 1 }
    /// - "gpu" -> DeviceSpec::Cuda { ordinal: 0 }
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let (name, ordinal) = match upper.split_once(':') {
            Some((name, ordinal)) => {
                let ordinal = ordinal.parse().map_err(|_| Error::InvalidDevice { device: s.to_string() })?;
                (name, ordinal)
            }
            None => (upper.as_str(), 0),
        };

        match name {
            "HOST" | "CPU" => Ok(DeviceSpec::Host { ordinal }),
            "CUDA" | "GPU" => Ok(DeviceSpec::Cuda { ordinal }),
            _ => InvalidDeviceSnafu { device: s }.fail(),
        }
    }

    pub fn ordinal(&self) -> usize {
        match *self {
            DeviceSpec::Host { ordinal } | DeviceSpec::Cuda { ordinal } => ordinal,
        }
    }

    fn kind(&self) -> DriverKind {
        match self {
            DeviceSpec::Host { .. } => DriverKind::Host,
            DeviceSpec::Cuda { .. } => DriverKind::Cuda,
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Host { ordinal } => write!(f, "HOST:{ordinal}"),
            DeviceSpec::Cuda { ordinal } => write!(f, "CUDA:{ordinal}"),
        }
    }
}

pub struct DriverRegistry {
    drivers: RwLock<HashMap<DriverKind, Arc<dyn Driver>>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: RwLock::new(HashMap::new()) }
    }

    /// Get or create the driver serving `spec`.
    pub fn driver(&self, spec: &DeviceSpec) -> Result<Arc<dyn Driver>> {
        let kind = spec.kind();
        {
            let drivers = self.drivers.read();
            if let Some(driver) = drivers.get(&kind) {
                return Ok(Arc::clone(driver));
            }
        }

        let mut drivers = self.drivers.write();
        if let Some(driver) = drivers.get(&kind) {
            return Ok(Arc::clone(driver));
        }

        let driver = Self::create_driver(spec)?;
        tracing::debug!(driver = driver.name(), "driver registered");
        drivers.insert(kind, Arc::clone(&driver));
        Ok(driver)
    }

    /// Resolve `spec` to a device, checking its ordinal against the driver.
    pub fn device(&self, spec: &DeviceSpec) -> Result<Device> {
        Device::get(self.driver(spec)?, spec.ordinal())
    }

    /// Resolve a device string such as `"CUDA:0"`.
    pub fn get_device(&self, device: &str) -> Result<Device> {
        self.device(&DeviceSpec::parse(device)?)
    }

    fn create_driver(spec: &DeviceSpec) -> Result<Arc<dyn Driver>> {
        match spec {
            DeviceSpec::Host { .. } => Ok(Arc::new(HostDriver::new(HostDriverConfig::from_env()))),
            #[cfg(feature = "cuda")]
            DeviceSpec::Cuda { .. } => Ok(Arc::new(crate::cuda::CudaDriver::new())),
            #[cfg(not(feature = "cuda"))]
            DeviceSpec::Cuda { .. } => {
                InvalidDeviceSnafu { device: format!("{spec} (built without the `cuda` feature)") }.fail()
            }
        }
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry").field("drivers", &self.drivers.read().keys().collect::<Vec<_>>()).finish()
    }
}

/// Global driver registry instance.
static REGISTRY: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::new);

/// Get the global driver registry.
pub fn registry() -> &'static DriverRegistry {
    &REGISTRY
}

/// Convenience function to get a device by string.
pub fn get_device(device: &str) -> Result<Device> {
    registry().get_device(device)
}

/// Driver for a device string, e.g. `"HOST"` or `"CUDA:0"`.
pub fn get_driver(device: &str) -> Result<Arc<dyn Driver>> {
    registry().driver(&DeviceSpec::parse(device)?)
}

/// Device named by `KUDA_DEVICE`, or the first host device.
pub fn default_device() -> Result<Device> {
    match std::env::var(DEVICE_ENV) {
        Ok(device) => get_device(&device),
        Err(_) => registry().device(&DeviceSpec::Host { ordinal: 0 }),
    }
}

/// Driver named by `KUDA_DEVICE`, or the host driver.
pub fn default_driver() -> Result<Arc<dyn Driver>> {
    Ok(Arc::clone(default_device()?.driver()))
}
