//! Transport registry and device lookup.
//!
//! The registry owns every known [`TransportLayer`] and turns a
//! [`DeviceSelector`] into an open [`DeviceHandle`].
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use camctl::hardware::{DeviceSelector, MockTransport, TransportRegistry};
//!
//! let mut registry = TransportRegistry::new();
//! registry.register(Arc::new(MockTransport::new(2)));
//!
//! for device in registry.enumerate_devices(None).await? {
//!     println!("{} {}", device.serial_number, device.model_name);
//! }
//!
//! let handle = registry.open_device(&"serial:21000001".parse()?).await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use super::capabilities::TransportLayer;
use super::descriptor::{DeviceDescriptor, TransportDescriptor};
use super::handle::DeviceHandle;
use crate::error::{CamError, CamResult, DriverErrorKind};

// =============================================================================
// Device Selection
// =============================================================================

/// How to pick a device among the enumerated ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Exact descriptor (matched by full name).
    Descriptor(DeviceDescriptor),
    /// Host name or IP address.
    Host(String),
    /// Model name.
    Model(String),
    /// Serial number.
    Serial(String),
    /// User-defined name.
    UserName(String),
    /// Serial number, user-defined name, full name or friendly name.
    Any(String),
}

impl FromStr for DeviceSelector {
    type Err = CamError;

    /// Parse `host:<name>`, `model:<name>`, `serial:<sn>`, `name:<user name>`
    /// or a bare value (matched against every identifying field).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CamError::NotFound("empty device selector".into()));
        }
        let selector = match s.split_once(':') {
            Some(("host", v)) => DeviceSelector::Host(v.to_string()),
            Some(("model", v)) => DeviceSelector::Model(v.to_string()),
            Some(("serial", v)) => DeviceSelector::Serial(v.to_string()),
            Some(("name", v)) => DeviceSelector::UserName(v.to_string()),
            _ => DeviceSelector::Any(s.to_string()),
        };
        Ok(selector)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Descriptor(d) => write!(f, "{}", d.full_name),
            DeviceSelector::Host(v) => write!(f, "host:{}", v),
            DeviceSelector::Model(v) => write!(f, "model:{}", v),
            DeviceSelector::Serial(v) => write!(f, "serial:{}", v),
            DeviceSelector::UserName(v) => write!(f, "name:{}", v),
            DeviceSelector::Any(v) => f.write_str(v),
        }
    }
}

/// Resolve a host name or address to its IP addresses.
async fn resolve_host(host: &str) -> CamResult<HashSet<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(HashSet::from([ip]));
    }
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| CamError::NotFound(format!("cannot resolve host '{}': {}", host, e)))?;
    Ok(addrs.map(|addr| addr.ip()).collect())
}

// =============================================================================
// TransportRegistry
// =============================================================================

/// Registry of available transports.
#[derive(Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn TransportLayer>>,
}

impl TransportRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport.
    pub fn register(&mut self, transport: Arc<dyn TransportLayer>) {
        let descriptor = transport.descriptor();
        info!(
            device_class = %descriptor.device_class,
            transport = %descriptor.friendly_name,
            "transport registered"
        );
        self.transports.push(transport);
    }

    /// Describe every registered transport.
    pub fn enumerate_transports(&self) -> Vec<TransportDescriptor> {
        self.transports.iter().map(|t| t.descriptor()).collect()
    }

    /// List devices, optionally restricted to one device class.
    pub async fn enumerate_devices(&self, device_class: Option<&str>) -> CamResult<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();
        for (transport, _) in self.transports_for(device_class) {
            let found = transport.enumerate_devices().await.map_err(|e| {
                CamError::device_io(
                    format!("enumerate {}", transport.descriptor().device_class),
                    e,
                )
            })?;
            devices.extend(found);
        }
        Ok(devices)
    }

    fn transports_for<'a>(
        &'a self,
        device_class: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a Arc<dyn TransportLayer>, TransportDescriptor)> + 'a {
        self.transports
            .iter()
            .map(|t| (t, t.descriptor()))
            .filter(move |(_, d)| device_class.map_or(true, |class| d.device_class == class))
    }

    /// Find the first device matching `selector` and the transport serving it.
    pub async fn find_device(
        &self,
        selector: &DeviceSelector,
    ) -> CamResult<(Arc<dyn TransportLayer>, DeviceDescriptor)> {
        let hosts = match selector {
            DeviceSelector::Host(host) => resolve_host(host).await?,
            _ => HashSet::new(),
        };

        for (transport, _) in self.transports_for(None) {
            let devices = transport
                .enumerate_devices()
                .await
                .map_err(|e| CamError::device_io("enumerate devices", e))?;
            let matched = devices.into_iter().find(|d| match selector {
                DeviceSelector::Descriptor(wanted) => d.full_name == wanted.full_name,
                DeviceSelector::Host(_) => d.ip_address.is_some_and(|ip| hosts.contains(&ip)),
                DeviceSelector::Model(model) => &d.model_name == model,
                DeviceSelector::Serial(serial) => &d.serial_number == serial,
                DeviceSelector::UserName(name) => &d.user_defined_name == name,
                DeviceSelector::Any(value) => {
                    [&d.serial_number, &d.user_defined_name, &d.full_name, &d.friendly_name]
                        .into_iter()
                        .any(|field| field == value)
                }
            });
            if let Some(device) = matched {
                return Ok((Arc::clone(transport), device));
            }
        }
        Err(CamError::NotFound(format!("no device matches '{}'", selector)))
    }

    /// Open the first device matching `selector`.
    pub async fn open_device(&self, selector: &DeviceSelector) -> CamResult<DeviceHandle> {
        let (transport, descriptor) = self.find_device(selector).await?;
        let device = transport.open(&descriptor).await.map_err(|e| match e.kind {
            DriverErrorKind::NotFound => CamError::NotFound(format!("{}: {}", descriptor.full_name, e)),
            _ => CamError::device_io(format!("open {}", descriptor.full_name), e),
        })?;
        debug!(device = %descriptor.full_name, selector = %selector, "device opened");
        Ok(DeviceHandle::new(device))
    }
}
