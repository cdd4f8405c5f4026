//! Transport and device descriptors.
//!
//! Descriptors are plain data: what a transport reports about itself and
//! about the devices it can reach, before anything is opened.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

/// Description of a transport layer (one per device class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportDescriptor {
    /// Device class served by this transport (`GigEVision`, `Usb3Vision`, `Emulation`).
    pub device_class: String,
    /// Short name.
    pub friendly_name: String,
    /// Unique name.
    pub full_name: String,
    /// Vendor.
    pub vendor_name: String,
}

impl TransportDescriptor {
    /// Rows for info tables, in display order.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DeviceClass", self.device_class.clone()),
            ("FriendlyName", self.friendly_name.clone()),
            ("FullName", self.full_name.clone()),
            ("VendorName", self.vendor_name.clone()),
        ]
    }
}

/// Description of a device reachable through a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Unique name within the transport.
    pub full_name: String,
    /// Name assigned by the operator (may be empty).
    pub user_defined_name: String,
    /// Model.
    pub model_name: String,
    /// Transport factory that produced the descriptor.
    pub device_factory: String,
    /// Short name.
    pub friendly_name: String,
    /// Device class (matches the transport's).
    pub device_class: String,
    /// Vendor.
    pub vendor_name: String,
    /// Serial number.
    pub serial_number: String,
    /// Network address, for network transports.
    pub ip_address: Option<IpAddr>,
    /// Hardware address, for network transports.
    pub mac_address: Option<String>,
}

impl DeviceDescriptor {
    /// Rows for info tables, in display order. Missing addresses render empty.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("FullName", self.full_name.clone()),
            ("UserDefinedName", self.user_defined_name.clone()),
            ("ModelName", self.model_name.clone()),
            ("DeviceFactory", self.device_factory.clone()),
            ("FriendlyName", self.friendly_name.clone()),
            ("DeviceClass", self.device_class.clone()),
            ("VendorName", self.vendor_name.clone()),
            ("SerialNumber", self.serial_number.clone()),
            (
                "IpAddress",
                self.ip_address.map(|ip| ip.to_string()).unwrap_or_default(),
            ),
            ("MacAddress", self.mac_address.clone().unwrap_or_default()),
        ]
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.friendly_name, self.serial_number)
    }
}

/// One entry of a device's information block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    /// Text entry.
    Text(String),
    /// Integer entry.
    Integer(i64),
    /// Float entry.
    Float(f64),
    /// Flag entry.
    Flag(bool),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Text(s) => f.write_str(s),
            InfoValue::Integer(v) => write!(f, "{}", v),
            InfoValue::Float(v) => write!(f, "{}", v),
            InfoValue::Flag(v) => write!(f, "{}", v),
        }
    }
}
